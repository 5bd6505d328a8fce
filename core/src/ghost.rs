//! Ghost-recording playback: timestamped pose samples and interpolation.
//!
//! A recording is a captured trace of a real player completion. The runner
//! engine uses it two ways: the recording's duration is the player's best
//! time (the base for the completion interval), and sampling it at a
//! progress fraction animates the visual runner along the recorded route.

use std::time::Duration;

use crate::Pose;

/// One captured pose at an offset into the recording.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GhostSample {
    timestamp: Duration,
    pose: Pose,
}

impl GhostSample {
    /// Creates a sample at the given offset into the recording.
    #[must_use]
    pub const fn new(timestamp: Duration, pose: Pose) -> Self {
        Self { timestamp, pose }
    }

    /// Offset of the sample into the recording.
    #[must_use]
    pub const fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Captured pose.
    #[must_use]
    pub const fn pose(&self) -> Pose {
        self.pose
    }
}

/// A completed-run trace: total duration plus ordered pose samples.
#[derive(Clone, Debug, PartialEq)]
pub struct GhostRecording {
    duration: Duration,
    samples: Vec<GhostSample>,
}

impl GhostRecording {
    /// Creates a recording from its completion duration and samples.
    ///
    /// Samples are sorted by timestamp so lookups can binary-search.
    #[must_use]
    pub fn new(duration: Duration, mut samples: Vec<GhostSample>) -> Self {
        samples.sort_by_key(GhostSample::timestamp);
        Self { duration, samples }
    }

    /// Duration of the recorded completion; the player's best time.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// Number of captured samples.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Samples the recorded route at a progress fraction in `[0, 1]`.
    ///
    /// Progress at or below zero yields the first sample, at or above one
    /// the last. In between, the two samples bracketing
    /// `progress * duration` are interpolated linearly in position and
    /// along the shortest arc in heading. Returns `None` for an empty
    /// recording.
    #[must_use]
    pub fn sample_at(&self, progress: f64) -> Option<Pose> {
        let first = self.samples.first()?;
        if self.samples.len() == 1 || progress <= 0.0 {
            return Some(first.pose());
        }
        let last = self.samples[self.samples.len() - 1];
        if progress >= 1.0 {
            return Some(last.pose());
        }

        let duration_ms = self.duration.as_millis() as f64;
        let target = Duration::from_millis((progress * duration_ms) as u64);

        let upper_index = match self
            .samples
            .binary_search_by_key(&target, GhostSample::timestamp)
        {
            Ok(index) => return Some(self.samples[index].pose()),
            Err(index) => index.min(self.samples.len() - 1),
        };
        let lower_index = upper_index.saturating_sub(1);

        let lower = self.samples[lower_index];
        let upper = self.samples[upper_index];
        if lower.timestamp() == upper.timestamp() {
            return Some(lower.pose());
        }

        let span = upper.timestamp().saturating_sub(lower.timestamp());
        let offset = target.saturating_sub(lower.timestamp());
        let t = offset.as_millis() as f64 / span.as_millis() as f64;

        let from = lower.pose();
        let to = upper.pose();
        Some(Pose::new(
            lerp(from.x(), to.x(), t),
            lerp(from.y(), to.y(), t),
            lerp(from.z(), to.z(), t),
            lerp_angle(from.yaw(), to.yaw(), t as f32),
        ))
    }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

fn lerp_angle(a: f32, b: f32, t: f32) -> f32 {
    let a = normalize_angle(a);
    let b = normalize_angle(b);

    let mut diff = b - a;
    if diff > 180.0 {
        diff -= 360.0;
    } else if diff < -180.0 {
        diff += 360.0;
    }

    normalize_angle(a + diff * t)
}

fn normalize_angle(angle: f32) -> f32 {
    let mut angle = angle % 360.0;
    if angle > 180.0 {
        angle -= 360.0;
    } else if angle < -180.0 {
        angle += 360.0;
    }
    angle
}

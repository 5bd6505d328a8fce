//! Completion pacing: speed multipliers and run-interval arithmetic.
//!
//! A runner completes its course at the owner's recorded best time scaled
//! down by a speed multiplier. The multiplier combines the purchased speed
//! level with the course's per-completion bonus multiplier.

use std::time::Duration;

/// Fractional speed gained per purchased speed level.
pub const SPEED_LEVEL_STEP: f64 = 0.25;

/// Smallest interval between completions regardless of multipliers.
pub const MIN_COMPLETION_INTERVAL: Duration = Duration::from_millis(1);

/// Combined speed multiplier for a runner.
///
/// Non-finite or non-positive bonus multipliers are treated as neutral so
/// that a corrupt economy value can never stall or explode the pace.
#[must_use]
pub fn speed_multiplier(speed_level: u32, bonus_multiplier: f64) -> f64 {
    let bonus = if bonus_multiplier.is_finite() && bonus_multiplier > 0.0 {
        bonus_multiplier
    } else {
        1.0
    };
    (1.0 + f64::from(speed_level) * SPEED_LEVEL_STEP) * bonus
}

/// Interval between two completions given the recorded best time.
///
/// The recorded duration is divided by the multiplier and floored at one
/// millisecond so elapsed-time division stays well defined.
#[must_use]
pub fn completion_interval(recording_duration: Duration, multiplier: f64) -> Duration {
    let scaled = recording_duration.as_millis() as f64 / multiplier;
    if !scaled.is_finite() || scaled <= 1.0 {
        return MIN_COMPLETION_INTERVAL;
    }
    Duration::from_millis(scaled as u64).max(MIN_COMPLETION_INTERVAL)
}

/// Whole completions contained in the elapsed time since the run cursor.
///
/// The remainder stays with the cursor, so partial progress toward the
/// next completion is never discarded.
#[must_use]
pub fn completions_elapsed(elapsed: Duration, interval: Duration) -> u64 {
    let interval = interval.max(MIN_COMPLETION_INTERVAL);
    elapsed.as_millis() as u64 / interval.as_millis() as u64
}

/// Fraction of the way through the current completion, in `[0, 1)`.
#[must_use]
pub fn run_progress(elapsed: Duration, interval: Duration) -> f64 {
    let interval = interval.max(MIN_COMPLETION_INTERVAL);
    let remainder = elapsed.as_millis() as u64 % interval.as_millis() as u64;
    remainder as f64 / interval.as_millis() as f64
}

#[cfg(test)]
mod tests {
    use super::{
        completion_interval, completions_elapsed, run_progress, speed_multiplier,
        MIN_COMPLETION_INTERVAL,
    };
    use std::time::Duration;

    #[test]
    fn doubled_multiplier_halves_the_interval() {
        let interval = completion_interval(Duration::from_millis(60_000), 2.0);
        assert_eq!(interval, Duration::from_millis(30_000));
    }

    #[test]
    fn interval_never_increases_with_speed_level() {
        let recording = Duration::from_millis(45_000);
        let mut previous = completion_interval(recording, speed_multiplier(0, 1.0));
        for level in 1..=20 {
            let next = completion_interval(recording, speed_multiplier(level, 1.0));
            assert!(next <= previous, "level {level} lengthened the interval");
            previous = next;
        }
    }

    #[test]
    fn interval_never_increases_with_bonus_multiplier() {
        let recording = Duration::from_millis(45_000);
        let mut previous = completion_interval(recording, speed_multiplier(3, 1.0));
        for step in 1..=10 {
            let bonus = 1.0 + f64::from(step) * 0.5;
            let next = completion_interval(recording, speed_multiplier(3, bonus));
            assert!(next <= previous, "bonus {bonus} lengthened the interval");
            previous = next;
        }
    }

    #[test]
    fn interval_is_floored_at_one_millisecond() {
        assert_eq!(
            completion_interval(Duration::from_millis(1), 1_000_000.0),
            MIN_COMPLETION_INTERVAL
        );
        assert_eq!(
            completion_interval(Duration::ZERO, 1.0),
            MIN_COMPLETION_INTERVAL
        );
    }

    #[test]
    fn degenerate_bonus_multiplier_is_neutral() {
        assert_eq!(speed_multiplier(2, 0.0), speed_multiplier(2, 1.0));
        assert_eq!(speed_multiplier(2, -3.0), speed_multiplier(2, 1.0));
        assert_eq!(speed_multiplier(2, f64::NAN), speed_multiplier(2, 1.0));
    }

    #[test]
    fn elapsed_time_yields_whole_completions_and_keeps_the_remainder() {
        let interval = Duration::from_millis(30_000);
        let elapsed = Duration::from_millis(95_000);
        assert_eq!(completions_elapsed(elapsed, interval), 3);
        let progress = run_progress(elapsed, interval);
        assert!((progress - 5_000.0 / 30_000.0).abs() < 1.0e-9);
    }

    #[test]
    fn completions_match_whether_elapsed_arrives_in_one_tick_or_many() {
        let interval = Duration::from_millis(7_000);
        let total = Duration::from_millis(50_000);

        let at_once = completions_elapsed(total, interval);

        let mut cursor = Duration::ZERO;
        let mut split = 0;
        let mut clock = Duration::ZERO;
        while clock < total {
            clock += Duration::from_millis(16);
            let settled = completions_elapsed(clock - cursor, interval);
            split += settled;
            cursor += interval * settled as u32;
        }
        let tail = completions_elapsed(total - cursor, interval);

        assert_eq!(at_once, split + tail);
    }
}

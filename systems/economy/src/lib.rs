#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Economic ticker: settles completed runs and animates runner entities.
//!
//! Every tick, each active runner's elapsed time since its completion
//! cursor is divided by its completion interval. Whole completions become
//! a settlement (coins, lifetime earnings, multiplier growth) and the
//! cursor advances by exactly the settled multiples, so partial progress
//! is never lost across ticks. The remainder drives ghost-interpolated
//! movement of the visual entity.

use pacer_core::{
    pace, Command, Course, CourseId, EntityHandle, GhostRecording, PlayerId, RunnerKey,
    Timestamp, WorldTask,
};
use pacer_world::query::{RunnerSnapshot, RunnerView};

/// Reward amounts owed to a player after a batch of settled runs.
///
/// All runs in the batch are priced at the multiplier in force when the
/// batch settles; growth applies after pricing. Each field is credited
/// independently and best-effort by the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct Settlement {
    /// Player owed the rewards.
    pub player: PlayerId,
    /// Course the runs completed.
    pub course: CourseId,
    /// Number of runs settled in the batch.
    pub completions: u64,
    /// Coins to credit.
    pub coins: f64,
    /// Lifetime-earnings amount to credit.
    pub total_earned: f64,
    /// Course-multiplier growth to apply.
    pub multiplier_growth: f64,
}

/// Read access to the reward parameters of the economy collaborator.
pub trait RewardRates {
    /// External speed bonus multiplier for the player.
    fn bonus_multiplier(&self, player: PlayerId) -> f64;

    /// Reward paid per completed run at the current course multiplier.
    fn payout_per_run(&self, player: PlayerId, course: &CourseId) -> f64;

    /// Multiplier growth earned per completed run at the given tier.
    fn multiplier_increment(&self, player: PlayerId, tier: u32) -> f64;
}

impl<T> RewardRates for T
where
    T: pacer_core::EconomyBank + ?Sized,
{
    fn bonus_multiplier(&self, player: PlayerId) -> f64 {
        pacer_core::EconomyBank::bonus_multiplier(self, player)
    }

    fn payout_per_run(&self, player: PlayerId, course: &CourseId) -> f64 {
        pacer_core::EconomyBank::payout_per_run(self, player, course)
    }

    fn multiplier_increment(&self, player: PlayerId, tier: u32) -> f64 {
        pacer_core::EconomyBank::multiplier_increment(self, player, tier)
    }
}

/// Pure system that emits settlements, cursor advances, and move tasks.
#[derive(Debug, Default)]
pub struct Economy;

impl Economy {
    /// Creates the economic ticker.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Processes one tick for every runner in the view.
    ///
    /// `recording` resolves the owner's ghost trace for a course and
    /// `course` resolves course definitions; runners whose trace or course
    /// is missing settle nothing and stay put until one appears.
    /// `handle_usable` gates movement of the visual entity.
    #[allow(clippy::too_many_arguments)]
    pub fn handle<R, C, F, B>(
        &self,
        now: Timestamp,
        view: &RunnerView,
        rates: &B,
        recording: R,
        course: C,
        handle_usable: F,
        out: &mut Vec<Command>,
        out_tasks: &mut Vec<WorldTask>,
        out_settlements: &mut Vec<Settlement>,
    ) where
        R: Fn(&RunnerKey) -> Option<GhostRecording>,
        C: Fn(&CourseId) -> Option<Course>,
        F: Fn(EntityHandle) -> bool,
        B: RewardRates + ?Sized,
    {
        for snapshot in view.iter() {
            if snapshot.waiting {
                // Waiting runners accrue nothing; the cursor follows the
                // clock so no back-payout lands when the flag clears.
                out.push(Command::AdvanceRunner {
                    key: snapshot.key.clone(),
                    completions: 0,
                    cursor: now,
                });
            }

            let Some(trace) = recording(&snapshot.key) else {
                continue;
            };
            let Some(course) = course(snapshot.key.course()) else {
                continue;
            };

            let multiplier = pace::speed_multiplier(
                snapshot.speed_level,
                rates.bonus_multiplier(snapshot.key.owner()),
            );
            let interval = pace::completion_interval(trace.duration(), multiplier);
            let elapsed = now.saturating_duration_since(snapshot.run_cursor);

            // Movement is independent of settlement: a waiting runner's
            // entity still follows its trace, held at the cycle position
            // its clock-bound cursor implies.
            if !snapshot.waiting {
                let completions = pace::completions_elapsed(elapsed, interval);
                self.settle(snapshot, rates, interval, completions, out, out_settlements);
            }

            self.animate(snapshot, &trace, &course, elapsed, interval, &handle_usable, out, out_tasks);
        }
    }

    /// Emits the settlement and cursor advance for a batch of completions.
    fn settle<B>(
        &self,
        snapshot: &RunnerSnapshot,
        rates: &B,
        interval: std::time::Duration,
        completions: u64,
        out: &mut Vec<Command>,
        out_settlements: &mut Vec<Settlement>,
    ) where
        B: RewardRates + ?Sized,
    {
        if completions == 0 {
            return;
        }
        let player = snapshot.key.owner();
        let per_run = rates.payout_per_run(player, snapshot.key.course());
        let reward = per_run * completions as f64;
        let growth = rates.multiplier_increment(player, snapshot.tier) * completions as f64;
        out_settlements.push(Settlement {
            player,
            course: snapshot.key.course().clone(),
            completions,
            coins: reward,
            total_earned: reward,
            multiplier_growth: growth,
        });
        out.push(Command::AdvanceRunner {
            key: snapshot.key.clone(),
            completions,
            cursor: snapshot.run_cursor.advance_by(interval, completions),
        });
    }

    /// Issues a move toward the ghost pose for the current run fraction.
    ///
    /// Moves are suppressed while the pose matches the last issued one, so
    /// a stationary sample stretch does not flood the entity store.
    #[allow(clippy::too_many_arguments)]
    fn animate<F>(
        &self,
        snapshot: &RunnerSnapshot,
        trace: &GhostRecording,
        course: &Course,
        elapsed: std::time::Duration,
        interval: std::time::Duration,
        handle_usable: &F,
        out: &mut Vec<Command>,
        out_tasks: &mut Vec<WorldTask>,
    ) where
        F: Fn(EntityHandle) -> bool,
    {
        let Some(handle) = snapshot.handle else {
            return;
        };
        if snapshot.invalid_since.is_some() || !handle_usable(handle) {
            return;
        }

        let progress = pace::run_progress(elapsed, interval);
        let Some(pose) = trace.sample_at(progress) else {
            return;
        };
        if snapshot
            .previous_pose
            .is_some_and(|previous| previous.approx_eq(pose))
        {
            return;
        }

        out_tasks.push(WorldTask::Move {
            key: snapshot.key.clone(),
            world: course.world().clone(),
            handle,
            pose,
        });
        out.push(Command::TrackPose {
            key: snapshot.key.clone(),
            pose: Some(pose),
        });
    }
}

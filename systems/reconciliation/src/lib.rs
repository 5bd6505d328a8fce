#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Reconciliation system that keeps runner records aligned with progress.
//!
//! On a throttled cadence it diffs the eligible (player, course) set
//! against the world's runner records, emitting create, sync, and remove
//! commands, and repairs runners whose entity handles have gone unusable.

use std::time::Duration;

use pacer_core::{Command, CourseId, EntityHandle, PlayerId, RunnerKey, Timestamp};
use pacer_world::query::RunnerView;

/// Configuration parameters required to construct the reconciliation system.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    refresh_period: Duration,
    recovery_threshold: Duration,
}

impl Config {
    /// Creates a configuration from the refresh cadence and the time an
    /// entity may stay unusable before a forced respawn.
    #[must_use]
    pub const fn new(refresh_period: Duration, recovery_threshold: Duration) -> Self {
        Self {
            refresh_period,
            recovery_threshold,
        }
    }
}

/// One (player, course) pair that currently qualifies for a runner.
///
/// Eligibility is resolved by the caller: the owner is online in the
/// course world, automation is unlocked, and the course is known. A
/// missing ghost recording does not disqualify the pair; such a runner
/// simply earns nothing until a recording appears.
#[derive(Clone, Debug, PartialEq)]
pub struct EligibleRunner {
    /// Key of the qualifying pair.
    pub key: RunnerKey,
    /// Speed level reported by the progress collaborator.
    pub speed_level: u32,
    /// Quality tier reported by the progress collaborator.
    pub tier: u32,
}

/// Pure system that emits commands reconciling records with eligibility.
#[derive(Debug)]
pub struct Reconciliation {
    config: Config,
    last_refresh: Option<Timestamp>,
}

impl Reconciliation {
    /// Creates a new reconciliation system using the supplied configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            last_refresh: None,
        }
    }

    /// Diffs eligibility against the runner view and emits commands.
    ///
    /// Runs at most once per refresh period; ticks inside the period emit
    /// nothing. `handle_usable` reports whether an entity handle can drive
    /// its entity right now, `active_course` reports the course a player
    /// is personally mid-run on, and `near_start` whether the owner stands
    /// close to the course start.
    pub fn handle<F, G, N>(
        &mut self,
        now: Timestamp,
        eligible: &[EligibleRunner],
        view: &RunnerView,
        handle_usable: F,
        active_course: G,
        near_start: N,
        out: &mut Vec<Command>,
    ) where
        F: Fn(EntityHandle) -> bool,
        G: Fn(PlayerId) -> Option<CourseId>,
        N: Fn(&RunnerKey) -> bool,
    {
        if let Some(last) = self.last_refresh {
            if now.saturating_duration_since(last) < self.config.refresh_period {
                return;
            }
        }
        self.last_refresh = Some(now);

        if eligible.is_empty() {
            if !view.is_empty() {
                out.push(Command::RemoveAllRunners);
            }
            return;
        }

        for wanted in eligible {
            if view.iter().all(|snapshot| snapshot.key != wanted.key) {
                out.push(Command::CreateRunner {
                    key: wanted.key.clone(),
                    speed_level: wanted.speed_level,
                    tier: wanted.tier,
                    now,
                });
            }
        }

        for snapshot in view.iter() {
            let Some(wanted) = eligible.iter().find(|e| e.key == snapshot.key) else {
                out.push(Command::RemoveRunner {
                    key: snapshot.key.clone(),
                });
                continue;
            };

            if wanted.speed_level != snapshot.speed_level || wanted.tier != snapshot.tier {
                out.push(Command::SyncRunner {
                    key: snapshot.key.clone(),
                    speed_level: wanted.speed_level,
                    tier: wanted.tier,
                });
            }

            let owner_running = active_course(snapshot.key.owner())
                .is_some_and(|course| &course == snapshot.key.course());
            if owner_running != snapshot.waiting {
                out.push(Command::SetWaiting {
                    key: snapshot.key.clone(),
                    waiting: owner_running,
                });
            }

            self.repair_entity(now, snapshot, &handle_usable, &near_start, out);
        }
    }

    fn repair_entity<F, N>(
        &self,
        now: Timestamp,
        snapshot: &pacer_world::query::RunnerSnapshot,
        handle_usable: &F,
        near_start: &N,
        out: &mut Vec<Command>,
    ) where
        F: Fn(EntityHandle) -> bool,
        N: Fn(&RunnerKey) -> bool,
    {
        let Some(handle) = snapshot.handle else {
            return;
        };

        if handle_usable(handle) {
            if snapshot.invalid_since.is_some() {
                out.push(Command::ClearEntityInvalid {
                    key: snapshot.key.clone(),
                });
            }
            return;
        }

        match snapshot.invalid_since {
            None => out.push(Command::MarkEntityInvalid {
                key: snapshot.key.clone(),
                now,
            }),
            Some(since) => {
                // Respawn only alongside the owner: far from the start the
                // entity is plausibly sitting in an unloaded region, and a
                // premature respawn would duplicate it once it reloads.
                if now.saturating_duration_since(since) >= self.config.recovery_threshold
                    && near_start(&snapshot.key)
                {
                    out.push(Command::ForceRespawn {
                        key: snapshot.key.clone(),
                    });
                }
            }
        }
    }
}

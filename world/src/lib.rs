#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Authoritative runner state for Pacer Ascend.
//!
//! The world owns every runner record plus the set of entities whose
//! despawn is still in flight. All mutation flows through [`apply`]; the
//! systems and the runtime observe state only through [`query`].

use std::collections::BTreeMap;

use pacer_core::{
    Command, EntityHandle, Event, Pose, RunnerIdentity, RunnerKey, Timestamp,
};

/// Authoritative state of every automated runner.
#[derive(Debug, Default)]
pub struct World {
    runners: BTreeMap<RunnerKey, Runner>,
    departing: BTreeMap<RunnerIdentity, EntityHandle>,
}

impl World {
    /// Creates an empty world with no runners and no pending despawns.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug)]
struct Runner {
    speed_level: u32,
    tier: u32,
    waiting: bool,
    spawning: bool,
    handle: Option<EntityHandle>,
    identity: Option<RunnerIdentity>,
    invalid_since: Option<Timestamp>,
    run_cursor: Timestamp,
    runs_completed: u64,
    previous_pose: Option<Pose>,
}

impl Runner {
    fn created(speed_level: u32, tier: u32, now: Timestamp) -> Self {
        Self {
            speed_level,
            tier,
            waiting: false,
            spawning: false,
            handle: None,
            identity: None,
            invalid_since: None,
            run_cursor: now,
            runs_completed: 0,
            previous_pose: None,
        }
    }

    /// Clears the entity half of the record, leaving progress untouched.
    fn release_entity(&mut self) -> (Option<EntityHandle>, Option<RunnerIdentity>) {
        self.invalid_since = None;
        self.previous_pose = None;
        (self.handle.take(), self.identity.take())
    }
}

/// Applies the provided command to the world, mutating state deterministically.
pub fn apply(world: &mut World, command: Command, out_events: &mut Vec<Event>) {
    match command {
        Command::CreateRunner {
            key,
            speed_level,
            tier,
            now,
        } => {
            if world.runners.contains_key(&key) {
                return;
            }
            let _ = world
                .runners
                .insert(key.clone(), Runner::created(speed_level, tier, now));
            out_events.push(Event::RunnerCreated { key });
        }
        Command::SyncRunner {
            key,
            speed_level,
            tier,
        } => {
            if let Some(runner) = world.runners.get_mut(&key) {
                runner.speed_level = speed_level;
                if runner.tier != tier {
                    runner.tier = tier;
                    out_events.push(Event::RespawnRequired {
                        key,
                        handle: runner.handle,
                        identity: runner.identity,
                    });
                }
            }
        }
        Command::RemoveRunner { key } => {
            if let Some(runner) = world.runners.remove(&key) {
                remember_departure(world, &runner);
                out_events.push(Event::RunnerRemoved {
                    key,
                    handle: runner.handle,
                    identity: runner.identity,
                });
            }
        }
        Command::RemoveAllRunners => {
            let drained = std::mem::take(&mut world.runners);
            for (key, runner) in drained {
                remember_departure(world, &runner);
                out_events.push(Event::RunnerRemoved {
                    key,
                    handle: runner.handle,
                    identity: runner.identity,
                });
            }
        }
        Command::SetWaiting { key, waiting } => {
            if let Some(runner) = world.runners.get_mut(&key) {
                runner.waiting = waiting;
            }
        }
        Command::MarkEntityInvalid { key, now } => {
            if let Some(runner) = world.runners.get_mut(&key) {
                if runner.invalid_since.is_none() {
                    runner.invalid_since = Some(now);
                    out_events.push(Event::EntityInvalidated { key });
                }
            }
        }
        Command::ClearEntityInvalid { key } => {
            if let Some(runner) = world.runners.get_mut(&key) {
                if runner.invalid_since.take().is_some() {
                    out_events.push(Event::EntityRecovered { key });
                }
            }
        }
        Command::ForceRespawn { key } => {
            if let Some(runner) = world.runners.get_mut(&key) {
                runner.invalid_since = None;
                if runner.handle.is_some() {
                    out_events.push(Event::RespawnRequired {
                        key,
                        handle: runner.handle,
                        identity: runner.identity,
                    });
                }
            }
        }
        Command::BeginSpawn { key } => {
            if let Some(runner) = world.runners.get_mut(&key) {
                runner.spawning = true;
            }
        }
        Command::ResolveSpawn { key, grant } => match world.runners.get_mut(&key) {
            Some(runner) => {
                runner.spawning = false;
                match grant {
                    Some(grant) => {
                        runner.handle = Some(grant.handle);
                        runner.identity = Some(grant.identity);
                        runner.invalid_since = None;
                        runner.previous_pose = None;
                        out_events.push(Event::SpawnResolved {
                            key,
                            succeeded: true,
                        });
                    }
                    None => out_events.push(Event::SpawnResolved {
                        key,
                        succeeded: false,
                    }),
                }
            }
            // The runner vanished while its spawn was in flight. The granted
            // entity has no owner now, so its identity goes straight into
            // the orphan track.
            None => {
                if let Some(grant) = grant {
                    out_events.push(Event::IdentityOrphaned {
                        identity: grant.identity,
                    });
                }
            }
        },
        Command::ReleaseHandle { key } => {
            if let Some(runner) = world.runners.get_mut(&key) {
                let (handle, identity) = runner.release_entity();
                if let (Some(handle), Some(identity)) = (handle, identity) {
                    let _ = world.departing.insert(identity, handle);
                }
            }
        }
        Command::ResolveDespawn {
            identity,
            confirmed,
        } => {
            let _ = world.departing.remove(&identity);
            if !confirmed {
                out_events.push(Event::IdentityOrphaned { identity });
            }
        }
        Command::AdvanceRunner {
            key,
            completions,
            cursor,
        } => {
            if let Some(runner) = world.runners.get_mut(&key) {
                runner.run_cursor = runner.run_cursor.max(cursor);
                runner.runs_completed = runner.runs_completed.saturating_add(completions);
                if completions > 0 {
                    out_events.push(Event::RunsSettled { key, completions });
                }
            }
        }
        Command::TrackPose { key, pose } => {
            if let Some(runner) = world.runners.get_mut(&key) {
                runner.previous_pose = pose;
            }
        }
    }
}

fn remember_departure(world: &mut World, runner: &Runner) {
    if let (Some(handle), Some(identity)) = (runner.handle, runner.identity) {
        let _ = world.departing.insert(identity, handle);
    }
}

/// Query functions that provide read-only access to the world state.
pub mod query {
    use std::collections::BTreeSet;

    use super::World;
    use pacer_core::{EntityHandle, Pose, RunnerIdentity, RunnerKey, Timestamp};

    /// Captures a read-only view of every runner in deterministic order.
    #[must_use]
    pub fn runner_view(world: &World) -> RunnerView {
        let snapshots = world
            .runners
            .iter()
            .map(|(key, runner)| snapshot_of(key, runner))
            .collect();
        RunnerView { snapshots }
    }

    /// Captures a snapshot of a single runner, if it exists.
    #[must_use]
    pub fn runner_snapshot(world: &World, key: &RunnerKey) -> Option<RunnerSnapshot> {
        world
            .runners
            .get(key)
            .map(|runner| snapshot_of(key, runner))
    }

    /// Number of runner records currently held.
    #[must_use]
    pub fn runner_count(world: &World) -> usize {
        world.runners.len()
    }

    /// Identities that still denote engine-owned entities.
    ///
    /// Covers runners with a confirmed spawn plus entities whose despawn
    /// is in flight. The orphan detection scan must never flag these.
    #[must_use]
    pub fn active_identities(world: &World) -> BTreeSet<RunnerIdentity> {
        let mut identities: BTreeSet<RunnerIdentity> =
            world.departing.keys().copied().collect();
        identities.extend(
            world
                .runners
                .values()
                .filter_map(|runner| runner.identity),
        );
        identities
    }

    /// Entities whose despawn is in flight, keyed by identity.
    #[must_use]
    pub fn departing_entities(world: &World) -> Vec<(RunnerIdentity, EntityHandle)> {
        world
            .departing
            .iter()
            .map(|(identity, handle)| (*identity, *handle))
            .collect()
    }

    fn snapshot_of(key: &RunnerKey, runner: &super::Runner) -> RunnerSnapshot {
        RunnerSnapshot {
            key: key.clone(),
            speed_level: runner.speed_level,
            tier: runner.tier,
            waiting: runner.waiting,
            spawning: runner.spawning,
            handle: runner.handle,
            identity: runner.identity,
            invalid_since: runner.invalid_since,
            run_cursor: runner.run_cursor,
            runs_completed: runner.runs_completed,
            previous_pose: runner.previous_pose,
        }
    }

    /// Read-only snapshot describing all runners.
    #[derive(Clone, Debug)]
    pub struct RunnerView {
        snapshots: Vec<RunnerSnapshot>,
    }

    impl RunnerView {
        /// Iterator over the captured runner snapshots in key order.
        pub fn iter(&self) -> impl Iterator<Item = &RunnerSnapshot> {
            self.snapshots.iter()
        }

        /// Consumes the view, yielding the underlying snapshots.
        #[must_use]
        pub fn into_vec(self) -> Vec<RunnerSnapshot> {
            self.snapshots
        }

        /// Number of snapshots captured.
        #[must_use]
        pub fn len(&self) -> usize {
            self.snapshots.len()
        }

        /// Reports whether the view holds no snapshots.
        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.snapshots.is_empty()
        }
    }

    /// Immutable representation of a single runner's state used for queries.
    #[derive(Clone, Debug, PartialEq)]
    pub struct RunnerSnapshot {
        /// Owner and course the runner automates.
        pub key: RunnerKey,
        /// Current speed upgrade level.
        pub speed_level: u32,
        /// Current cosmetic quality tier.
        pub tier: u32,
        /// Whether the runner skips economic ticks.
        pub waiting: bool,
        /// Whether a spawn request is in flight.
        pub spawning: bool,
        /// Handle of the materialised entity, if any.
        pub handle: Option<EntityHandle>,
        /// Durable identity of the materialised entity, if any.
        pub identity: Option<RunnerIdentity>,
        /// When the handle was first observed unusable, if it still is.
        pub invalid_since: Option<Timestamp>,
        /// Completion cursor; the instant the last settled run ended.
        pub run_cursor: Timestamp,
        /// Total runs settled over the record's lifetime.
        pub runs_completed: u64,
        /// Pose last issued to the entity, if any since the last reset.
        pub previous_pose: Option<Pose>,
    }
}

#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Tick-driven runtime that hosts the runner engine.
//!
//! Each tick runs the pure systems against the authoritative world,
//! applies their commands, and executes the resulting entity tasks on
//! per-world queues so the external store is only touched from its
//! owning world's execution context. The runtime also owns the orphan
//! tracker and its ledger, closing the loop across process restarts.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use pacer_core::{
    Command, CourseCatalog, DespawnOutcome, EconomyBank, EntityStore, EntityStoreError, Event,
    GhostSource, PlayerId, Presence, ProgressSource, RunTracker, RunnerIdentity, RunnerKey,
    TaskCompletion, Timestamp, Visibility, WorldId, WorldTask,
};
use pacer_system_economy::{Economy, Settlement};
use pacer_system_lifecycle::Lifecycle;
use pacer_system_orphan_cleanup::{inspect, EncounteredEntity, Ledger, Tracker};
use pacer_system_reconciliation::{Config as ReconciliationConfig, EligibleRunner, Reconciliation};
use pacer_world::{apply, query, World};
use tracing::{debug, info, warn};

/// Minimum gap between repeated move-failure warnings for one runner.
const MOVE_WARN_PERIOD: Duration = Duration::from_secs(10);

/// Tunable parameters of the runtime.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Cadence of the tick loop.
    pub tick: Duration,
    /// Cadence of the reconciliation refresh.
    pub refresh_period: Duration,
    /// Time an entity may stay unusable before a forced respawn.
    pub recovery_threshold: Duration,
    /// How close the owner must stand to a course start before a broken
    /// entity is forcibly respawned.
    pub near_spawn_distance: f64,
    /// Path of the orphan ledger file.
    pub ledger_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(16),
            refresh_period: Duration::from_millis(1_000),
            recovery_threshold: Duration::from_millis(3_000),
            near_spawn_distance: 128.0,
            ledger_path: PathBuf::from("orphan_runners.json"),
        }
    }
}

/// Collaborators supplied by the hosting environment.
///
/// Every external dependency of the engine enters through this struct;
/// the engine holds no other channel to the outside world.
pub struct Host {
    /// Course definitions.
    pub catalog: Box<dyn CourseCatalog + Send>,
    /// Player automation progress.
    pub progress: Box<dyn ProgressSource + Send>,
    /// Online players and their whereabouts.
    pub presence: Box<dyn Presence + Send>,
    /// Captured ghost recordings.
    pub ghosts: Box<dyn GhostSource + Send>,
    /// Reward parameters and credit operations.
    pub bank: Box<dyn EconomyBank + Send>,
    /// The crash-unsafe entity store.
    pub store: Box<dyn EntityStore + Send>,
    /// Per-viewer entity visibility.
    pub visibility: Box<dyn Visibility + Send>,
    /// Which players are personally mid-run.
    pub runs: Box<dyn RunTracker + Send>,
}

/// The runner engine: world, systems, task queues, and orphan tracking.
pub struct Engine {
    config: EngineConfig,
    host: Host,
    world: World,
    reconciliation: Reconciliation,
    economy: Economy,
    lifecycle: Lifecycle,
    tracker: Tracker,
    ledger: Ledger,
    queues: BTreeMap<WorldId, VecDeque<WorldTask>>,
    move_warns: HashMap<RunnerKey, Timestamp>,
}

impl Engine {
    /// Boots the engine, consuming any orphan ledger a previous process
    /// left behind.
    pub fn new(config: EngineConfig, host: Host) -> anyhow::Result<Self> {
        let ledger = Ledger::new(&config.ledger_path);
        let tracker = Tracker::new();
        let recovered = ledger
            .consume()
            .context("failed to consume orphan ledger")?;
        if !recovered.is_empty() {
            info!(count = recovered.len(), "recovered orphan identities from ledger");
        }
        tracker.adopt_all(recovered);

        let reconciliation = Reconciliation::new(ReconciliationConfig::new(
            config.refresh_period,
            config.recovery_threshold,
        ));

        Ok(Self {
            config,
            host,
            world: World::new(),
            reconciliation,
            economy: Economy::new(),
            lifecycle: Lifecycle::new(),
            tracker,
            ledger,
            queues: BTreeMap::new(),
            move_warns: HashMap::new(),
        })
    }

    /// Runs the tick loop until `stop` is raised, then shuts down.
    pub fn run(&mut self, stop: &AtomicBool) -> anyhow::Result<()> {
        while !stop.load(Ordering::Relaxed) {
            let _ = self.tick(Timestamp::now());
            std::thread::sleep(self.config.tick);
        }
        self.shutdown(Timestamp::now())
    }

    /// Processes one engine tick, returning the events it produced.
    pub fn tick(&mut self, now: Timestamp) -> Vec<Event> {
        let mut events = Vec::new();

        self.reconcile(now, &mut events);
        self.settle(now, &mut events);
        let seen = events.clone();
        self.drive_lifecycle(&seen, &mut events);

        self.adopt_orphans(&events);
        self.scan_for_orphans();

        let completions = self.drain_queues(now);
        let mut commands = Vec::new();
        for completion in completions {
            match completion {
                TaskCompletion::Spawned { key, grant } => {
                    commands.push(Command::ResolveSpawn { key, grant });
                }
                TaskCompletion::Despawned {
                    identity,
                    confirmed,
                } => {
                    commands.push(Command::ResolveDespawn {
                        identity,
                        confirmed,
                    });
                }
                TaskCompletion::OrphanRemoved { identity, removed } => {
                    self.tracker.resolve(identity, removed);
                }
            }
        }
        self.apply_all(commands, &mut events);
        self.adopt_orphans(&events);

        events
    }

    /// Retires every runner, writing the orphan ledger before anything
    /// despawns.
    ///
    /// Every identity believed live goes into the ledger up front, so a
    /// crash partway through teardown still leaves them on record for
    /// the next process. After the despawns run, the ledger is rewritten
    /// with only the identities that could not be confirmed gone.
    pub fn shutdown(&mut self, now: Timestamp) -> anyhow::Result<()> {
        info!("shutting down runner engine");
        let mut tracked = query::active_identities(&self.world);
        tracked.extend(self.tracker.awaiting());
        self.ledger
            .store(&tracked)
            .context("failed to persist orphan ledger")?;

        let mut events = Vec::new();
        apply(&mut self.world, Command::RemoveAllRunners, &mut events);
        let seen = events.clone();
        self.drive_lifecycle(&seen, &mut events);

        let completions = self.drain_queues(now);
        let mut commands = Vec::new();
        for completion in completions {
            match completion {
                TaskCompletion::Despawned {
                    identity,
                    confirmed,
                } => commands.push(Command::ResolveDespawn {
                    identity,
                    confirmed,
                }),
                TaskCompletion::OrphanRemoved { identity, removed } => {
                    self.tracker.resolve(identity, removed);
                }
                TaskCompletion::Spawned { key, grant } => {
                    commands.push(Command::ResolveSpawn { key, grant });
                }
            }
        }
        self.apply_all(commands, &mut events);
        self.adopt_orphans(&events);

        self.ledger
            .store(&self.tracker.awaiting())
            .context("failed to persist orphan ledger")
    }

    /// Read-only access to the authoritative world, for inspection.
    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Number of identities currently awaiting orphan cleanup.
    #[must_use]
    pub fn orphans_awaiting(&self) -> usize {
        self.tracker.awaiting_len()
    }

    fn reconcile(&mut self, now: Timestamp, events: &mut Vec<Event>) {
        let eligible = self.eligible_runners();
        let view = query::runner_view(&self.world);
        let mut commands = Vec::new();
        {
            let store = &self.host.store;
            let runs = &self.host.runs;
            let presence = &self.host.presence;
            let catalog = &self.host.catalog;
            let near_distance = self.config.near_spawn_distance;
            self.reconciliation.handle(
                now,
                &eligible,
                &view,
                |handle| store.is_usable(handle),
                |player| runs.active_course(player),
                |key| owner_near_start(presence.as_ref(), catalog.as_ref(), key, near_distance),
                &mut commands,
            );
        }
        self.apply_all(commands, events);
    }

    fn settle(&mut self, now: Timestamp, events: &mut Vec<Event>) {
        let view = query::runner_view(&self.world);
        let mut commands = Vec::new();
        let mut tasks = Vec::new();
        let mut settlements = Vec::new();
        {
            let ghosts = &self.host.ghosts;
            let catalog = &self.host.catalog;
            let store = &self.host.store;
            self.economy.handle(
                now,
                &view,
                self.host.bank.as_ref(),
                |key| ghosts.recording(key.owner(), key.course()).cloned(),
                |id| catalog.course(id).cloned(),
                |handle| store.is_usable(handle),
                &mut commands,
                &mut tasks,
                &mut settlements,
            );
        }
        self.apply_all(commands, events);
        self.credit(settlements);
        self.enqueue(tasks);
    }

    fn drive_lifecycle(&mut self, events_in: &[Event], events: &mut Vec<Event>) {
        let view = query::runner_view(&self.world);
        let mut commands = Vec::new();
        let mut tasks = Vec::new();
        {
            let catalog = &self.host.catalog;
            self.lifecycle.handle(
                events_in,
                &view,
                |id| catalog.course(id).cloned(),
                &mut commands,
                &mut tasks,
            );
        }
        self.apply_all(commands, events);
        self.enqueue(tasks);
    }

    fn scan_for_orphans(&mut self) {
        let pending = self.tracker.pending();
        if pending.is_empty() {
            return;
        }
        let encountered: Vec<EncounteredEntity> = self
            .host
            .store
            .marked_entities()
            .into_iter()
            .map(|(world, handle, identity)| EncounteredEntity {
                identity,
                handle,
                world,
            })
            .collect();
        let active = query::active_identities(&self.world);
        let mut tasks = Vec::new();
        inspect(&encountered, &pending, &active, &mut tasks);
        self.enqueue(tasks);
    }

    /// Executes every queued task, one world's queue at a time.
    fn drain_queues(&mut self, now: Timestamp) -> Vec<TaskCompletion> {
        let mut completions = Vec::new();
        let queues = std::mem::take(&mut self.queues);
        for (_, queue) in queues {
            for task in queue {
                self.execute(task, now, &mut completions);
            }
        }
        completions
    }

    fn execute(
        &mut self,
        task: WorldTask,
        now: Timestamp,
        completions: &mut Vec<TaskCompletion>,
    ) {
        match task {
            WorldTask::Spawn {
                key,
                world,
                role,
                pose,
            } => match self.host.store.spawn(&world, role, pose) {
                Ok(grant) => {
                    if let Err(err) = self.host.store.make_inert(grant.handle) {
                        warn!(%err, "failed to apply inert markers to runner entity");
                    }
                    self.hide_from_running_players(&key, grant.identity);
                    debug!(course = key.course().as_str(), "runner entity spawned");
                    completions.push(TaskCompletion::Spawned {
                        key,
                        grant: Some(grant),
                    });
                }
                Err(err) => {
                    warn!(course = key.course().as_str(), %err, "runner spawn failed");
                    completions.push(TaskCompletion::Spawned { key, grant: None });
                }
            },
            WorldTask::Despawn {
                handle, identity, ..
            } => {
                let confirmed =
                    matches!(self.host.store.despawn(handle), DespawnOutcome::Confirmed);
                match identity {
                    Some(identity) => completions.push(TaskCompletion::Despawned {
                        identity,
                        confirmed,
                    }),
                    None => {
                        if !confirmed {
                            warn!("untracked despawn went unconfirmed");
                        }
                    }
                }
            }
            WorldTask::Move {
                key, handle, pose, ..
            } => {
                if let Err(err) = self.host.store.move_to(handle, pose) {
                    self.warn_move_failure(&key, now, &err);
                }
            }
            WorldTask::RemoveOrphan {
                identity, handle, ..
            } => {
                let removed =
                    matches!(self.host.store.despawn(handle), DespawnOutcome::Confirmed);
                completions.push(TaskCompletion::OrphanRemoved { identity, removed });
            }
        }
    }

    fn eligible_runners(&self) -> Vec<EligibleRunner> {
        let mut eligible = Vec::new();
        for player in self.host.presence.online_players() {
            let player_world = self.host.presence.world_of(player);
            for course_id in self.host.progress.courses_of(player) {
                let Some(progress) = self.host.progress.automation(player, &course_id) else {
                    continue;
                };
                if !progress.unlocked {
                    continue;
                }
                let Some(course) = self.host.catalog.course(&course_id) else {
                    continue;
                };
                // A runner only exists while its owner shares the course world.
                if player_world.as_ref() != Some(course.world()) {
                    continue;
                }
                eligible.push(EligibleRunner {
                    key: RunnerKey::new(player, course_id),
                    speed_level: progress.speed_level,
                    tier: progress.tier,
                });
            }
        }
        eligible
    }

    fn credit(&mut self, settlements: Vec<Settlement>) {
        for settlement in settlements {
            debug!(
                course = settlement.course.as_str(),
                completions = settlement.completions,
                "settling runner rewards"
            );
            if !self
                .host
                .bank
                .credit_coins(settlement.player, settlement.coins)
            {
                warn!(course = settlement.course.as_str(), "coin credit failed");
            }
            if !self
                .host
                .bank
                .credit_total_earned(settlement.player, settlement.total_earned)
            {
                warn!(course = settlement.course.as_str(), "earnings credit failed");
            }
            if !self.host.bank.grow_course_multiplier(
                settlement.player,
                &settlement.course,
                settlement.multiplier_growth,
            ) {
                warn!(course = settlement.course.as_str(), "multiplier growth failed");
            }
        }
    }

    /// Hides a freshly spawned entity from viewers mid-run on the same
    /// course, so a materialising runner never collides with their own
    /// ghost visuals.
    fn hide_from_running_players(&mut self, key: &RunnerKey, identity: RunnerIdentity) {
        let viewers: Vec<PlayerId> = self
            .host
            .presence
            .online_players()
            .into_iter()
            .filter(|player| *player != key.owner())
            .filter(|player| {
                self.host
                    .runs
                    .active_course(*player)
                    .is_some_and(|course| &course == key.course())
            })
            .collect();
        for viewer in viewers {
            self.host.visibility.hide(viewer, identity);
        }
    }

    fn warn_move_failure(
        &mut self,
        key: &RunnerKey,
        now: Timestamp,
        err: &EntityStoreError,
    ) {
        let due = self
            .move_warns
            .get(key)
            .map_or(true, |last| now.saturating_duration_since(*last) >= MOVE_WARN_PERIOD);
        if due {
            let _ = self.move_warns.insert(key.clone(), now);
            warn!(course = key.course().as_str(), %err, "failed to move runner entity");
        }
    }

    fn adopt_orphans(&mut self, events: &[Event]) {
        for event in events {
            if let Event::IdentityOrphaned { identity } = event {
                self.tracker.adopt(*identity);
            }
        }
    }

    fn apply_all(&mut self, commands: Vec<Command>, events: &mut Vec<Event>) {
        for command in commands {
            apply(&mut self.world, command, events);
        }
    }

    fn enqueue(&mut self, tasks: Vec<WorldTask>) {
        for task in tasks {
            let world = task.world().clone();
            self.queues.entry(world).or_default().push_back(task);
        }
    }
}

fn owner_near_start(
    presence: &(dyn Presence + Send),
    catalog: &(dyn CourseCatalog + Send),
    key: &RunnerKey,
    near_distance: f64,
) -> bool {
    let Some(course) = catalog.course(key.course()) else {
        return false;
    };
    let Some(world) = presence.world_of(key.owner()) else {
        return false;
    };
    if &world != course.world() {
        return false;
    }
    let Some(position) = presence.position_of(key.owner()) else {
        return false;
    };
    position.distance_squared(course.start()) <= near_distance * near_distance
}

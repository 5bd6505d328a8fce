//! End-to-end engine scenarios against an in-memory host.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pacer_core::{
    AutomationProgress, Course, CourseCatalog, CourseId, DespawnOutcome, EconomyBank,
    EntityHandle, EntityStore, EntityStoreError, GhostRecording, GhostSample, GhostSource,
    PlayerId, Pose, Presence, ProgressSource, RunTracker, RunnerIdentity, RunnerKey, RunnerRole,
    SpawnGrant, Timestamp, Visibility, WorldId,
};
use pacer_runtime::{Engine, EngineConfig, Host};
use pacer_world::query;
use uuid::Uuid;

const COURSE: &str = "summit";
const START: Pose = Pose::new(0.0, 64.0, 0.0, 0.0);

fn player() -> PlayerId {
    PlayerId::new(Uuid::from_u128(1))
}

fn course_id() -> CourseId {
    CourseId::new(COURSE)
}

fn runner_key() -> RunnerKey {
    RunnerKey::new(player(), course_id())
}

#[derive(Debug)]
struct EntityRecord {
    identity: RunnerIdentity,
    world: WorldId,
    pose: Pose,
    inert: bool,
}

#[derive(Debug, Default)]
struct StoreState {
    next_handle: u64,
    entities: BTreeMap<EntityHandle, EntityRecord>,
    fail_spawn: bool,
    fail_despawn: bool,
    watched_ledger: Option<std::path::PathBuf>,
    ledger_present_at_despawn: Vec<bool>,
}

#[derive(Clone, Default)]
struct FakeStore(Arc<Mutex<StoreState>>);

impl FakeStore {
    fn entity_count(&self) -> usize {
        self.0.lock().unwrap().entities.len()
    }

    fn set_fail_despawn(&self, fail: bool) {
        self.0.lock().unwrap().fail_despawn = fail;
    }

    fn set_fail_spawn(&self, fail: bool) {
        self.0.lock().unwrap().fail_spawn = fail;
    }

    fn watch_ledger(&self, path: &std::path::Path) {
        self.0.lock().unwrap().watched_ledger = Some(path.to_path_buf());
    }

    fn ledger_present_at_despawn(&self) -> Vec<bool> {
        self.0.lock().unwrap().ledger_present_at_despawn.clone()
    }

    fn first_entity(&self) -> Option<(EntityHandle, RunnerIdentity, Pose, bool)> {
        let state = self.0.lock().unwrap();
        state
            .entities
            .iter()
            .next()
            .map(|(handle, record)| (*handle, record.identity, record.pose, record.inert))
    }
}

impl EntityStore for FakeStore {
    fn spawn(
        &mut self,
        world: &WorldId,
        _role: RunnerRole,
        pose: Pose,
    ) -> Result<SpawnGrant, EntityStoreError> {
        let mut state = self.0.lock().unwrap();
        if state.fail_spawn {
            return Err(EntityStoreError::WorldUnavailable(world.clone()));
        }
        state.next_handle += 1;
        let handle = EntityHandle::new(state.next_handle);
        let identity = RunnerIdentity::random();
        let _ = state.entities.insert(
            handle,
            EntityRecord {
                identity,
                world: world.clone(),
                pose,
                inert: false,
            },
        );
        Ok(SpawnGrant { handle, identity })
    }

    fn despawn(&mut self, handle: EntityHandle) -> DespawnOutcome {
        let mut state = self.0.lock().unwrap();
        if let Some(path) = &state.watched_ledger {
            let present = path.exists();
            state.ledger_present_at_despawn.push(present);
        }
        if state.fail_despawn {
            return DespawnOutcome::Unconfirmed;
        }
        let _ = state.entities.remove(&handle);
        DespawnOutcome::Confirmed
    }

    fn is_usable(&self, handle: EntityHandle) -> bool {
        self.0.lock().unwrap().entities.contains_key(&handle)
    }

    fn marked_entities(&self) -> Vec<(WorldId, EntityHandle, RunnerIdentity)> {
        self.0
            .lock()
            .unwrap()
            .entities
            .iter()
            .map(|(handle, record)| (record.world.clone(), *handle, record.identity))
            .collect()
    }

    fn make_inert(&mut self, handle: EntityHandle) -> Result<(), EntityStoreError> {
        let mut state = self.0.lock().unwrap();
        match state.entities.get_mut(&handle) {
            Some(record) => {
                record.inert = true;
                Ok(())
            }
            None => Err(EntityStoreError::Rejected("unknown handle".into())),
        }
    }

    fn move_to(&mut self, handle: EntityHandle, pose: Pose) -> Result<(), EntityStoreError> {
        let mut state = self.0.lock().unwrap();
        match state.entities.get_mut(&handle) {
            Some(record) => {
                record.pose = pose;
                Ok(())
            }
            None => Err(EntityStoreError::Rejected("unknown handle".into())),
        }
    }
}

#[derive(Debug, Default)]
struct PresenceState {
    online: Vec<PlayerId>,
    places: HashMap<PlayerId, (WorldId, Pose)>,
}

#[derive(Clone, Default)]
struct FakePresence(Arc<Mutex<PresenceState>>);

impl FakePresence {
    fn put_online(&self, player: PlayerId, world: WorldId, pose: Pose) {
        let mut state = self.0.lock().unwrap();
        if !state.online.contains(&player) {
            state.online.push(player);
        }
        let _ = state.places.insert(player, (world, pose));
    }

    fn take_offline(&self, player: PlayerId) {
        let mut state = self.0.lock().unwrap();
        state.online.retain(|p| *p != player);
        let _ = state.places.remove(&player);
    }
}

impl Presence for FakePresence {
    fn online_players(&self) -> Vec<PlayerId> {
        self.0.lock().unwrap().online.clone()
    }

    fn world_of(&self, player: PlayerId) -> Option<WorldId> {
        self.0
            .lock()
            .unwrap()
            .places
            .get(&player)
            .map(|(world, _)| world.clone())
    }

    fn position_of(&self, player: PlayerId) -> Option<Pose> {
        self.0
            .lock()
            .unwrap()
            .places
            .get(&player)
            .map(|(_, pose)| *pose)
    }
}

struct FakeCatalog {
    courses: HashMap<CourseId, Course>,
}

impl FakeCatalog {
    fn with_summit() -> Self {
        let course = Course::new(
            course_id(),
            WorldId::new("ascent"),
            START,
            Pose::new(40.0, 80.0, 0.0, 0.0),
        );
        Self {
            courses: HashMap::from([(course_id(), course)]),
        }
    }
}

impl CourseCatalog for FakeCatalog {
    fn course(&self, id: &CourseId) -> Option<&Course> {
        self.courses.get(id)
    }
}

struct FakeProgress {
    unlocked: Vec<(PlayerId, CourseId, AutomationProgress)>,
}

impl ProgressSource for FakeProgress {
    fn automation(&self, player: PlayerId, course: &CourseId) -> Option<AutomationProgress> {
        self.unlocked
            .iter()
            .find(|(p, c, _)| *p == player && c == course)
            .map(|(_, _, progress)| *progress)
    }

    fn courses_of(&self, player: PlayerId) -> Vec<CourseId> {
        self.unlocked
            .iter()
            .filter(|(p, _, _)| *p == player)
            .map(|(_, c, _)| c.clone())
            .collect()
    }
}

struct FakeGhosts {
    recordings: HashMap<CourseId, GhostRecording>,
}

impl FakeGhosts {
    fn with_minute_trace() -> Self {
        let trace = GhostRecording::new(
            Duration::from_millis(60_000),
            vec![
                GhostSample::new(Duration::ZERO, START),
                GhostSample::new(
                    Duration::from_millis(60_000),
                    Pose::new(40.0, 80.0, 0.0, 0.0),
                ),
            ],
        );
        Self {
            recordings: HashMap::from([(course_id(), trace)]),
        }
    }

    fn empty() -> Self {
        Self {
            recordings: HashMap::new(),
        }
    }
}

impl GhostSource for FakeGhosts {
    fn recording(&self, _player: PlayerId, course: &CourseId) -> Option<&GhostRecording> {
        self.recordings.get(course)
    }
}

#[derive(Debug, Default)]
struct BankState {
    coins: f64,
    total_earned: f64,
    multiplier_growth: f64,
}

#[derive(Clone, Default)]
struct FakeBank(Arc<Mutex<BankState>>);

impl EconomyBank for FakeBank {
    fn bonus_multiplier(&self, _player: PlayerId) -> f64 {
        1.0
    }

    fn payout_per_run(&self, _player: PlayerId, _course: &CourseId) -> f64 {
        10.0
    }

    fn multiplier_increment(&self, _player: PlayerId, _tier: u32) -> f64 {
        0.5
    }

    fn credit_coins(&mut self, _player: PlayerId, amount: f64) -> bool {
        self.0.lock().unwrap().coins += amount;
        true
    }

    fn credit_total_earned(&mut self, _player: PlayerId, amount: f64) -> bool {
        self.0.lock().unwrap().total_earned += amount;
        true
    }

    fn grow_course_multiplier(
        &mut self,
        _player: PlayerId,
        _course: &CourseId,
        amount: f64,
    ) -> bool {
        self.0.lock().unwrap().multiplier_growth += amount;
        true
    }
}

#[derive(Clone, Default)]
struct FakeVisibility(Arc<Mutex<Vec<(PlayerId, RunnerIdentity)>>>);

impl Visibility for FakeVisibility {
    fn hide(&mut self, viewer: PlayerId, identity: RunnerIdentity) {
        self.0.lock().unwrap().push((viewer, identity));
    }
}

#[derive(Clone, Default)]
struct FakeRuns(Arc<Mutex<HashMap<PlayerId, CourseId>>>);

impl FakeRuns {
    fn start_run(&self, player: PlayerId, course: CourseId) {
        let _ = self.0.lock().unwrap().insert(player, course);
    }
}

impl RunTracker for FakeRuns {
    fn active_course(&self, player: PlayerId) -> Option<CourseId> {
        self.0.lock().unwrap().get(&player).cloned()
    }
}

struct Harness {
    store: FakeStore,
    presence: FakePresence,
    bank: FakeBank,
    visibility: FakeVisibility,
    runs: FakeRuns,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: FakeStore::default(),
            presence: FakePresence::default(),
            bank: FakeBank::default(),
            visibility: FakeVisibility::default(),
            runs: FakeRuns::default(),
        }
    }

    fn host(&self) -> Host {
        self.host_with_ghosts(FakeGhosts::with_minute_trace())
    }

    fn host_with_ghosts(&self, ghosts: FakeGhosts) -> Host {
        Host {
            catalog: Box::new(FakeCatalog::with_summit()),
            progress: Box::new(FakeProgress {
                unlocked: vec![(
                    player(),
                    course_id(),
                    AutomationProgress {
                        unlocked: true,
                        speed_level: 0,
                        tier: 1,
                    },
                )],
            }),
            presence: Box::new(self.presence.clone()),
            ghosts: Box::new(ghosts),
            bank: Box::new(self.bank.clone()),
            store: Box::new(self.store.clone()),
            visibility: Box::new(self.visibility.clone()),
            runs: Box::new(self.runs.clone()),
        }
    }

    fn engine(&self, ledger_path: &std::path::Path) -> Engine {
        let config = EngineConfig {
            ledger_path: ledger_path.to_path_buf(),
            ..EngineConfig::default()
        };
        Engine::new(config, self.host()).expect("engine boot")
    }

    fn engine_without_recordings(&self, ledger_path: &std::path::Path) -> Engine {
        let config = EngineConfig {
            ledger_path: ledger_path.to_path_buf(),
            ..EngineConfig::default()
        };
        Engine::new(config, self.host_with_ghosts(FakeGhosts::empty())).expect("engine boot")
    }
}

#[test]
fn runner_materialises_in_one_tick_and_earns_over_time() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let harness = Harness::new();
    harness
        .presence
        .put_online(player(), WorldId::new("ascent"), START);
    let mut engine = harness.engine(&dir.path().join("orphans.json"));

    let _ = engine.tick(Timestamp::from_millis(1_000));

    let snapshot =
        query::runner_snapshot(engine.world(), &runner_key()).expect("runner record");
    assert!(snapshot.handle.is_some());
    assert!(!snapshot.spawning);
    assert_eq!(harness.store.entity_count(), 1);
    let (_, _, _, inert) = harness.store.first_entity().expect("entity");
    assert!(inert, "spawned entity must carry inert markers");

    // One full trace duration later, one run settles and pays.
    let _ = engine.tick(Timestamp::from_millis(61_500));
    {
        let bank = harness.bank.0.lock().unwrap();
        assert!((bank.coins - 10.0).abs() < 1.0e-9);
        assert!((bank.total_earned - 10.0).abs() < 1.0e-9);
        assert!((bank.multiplier_growth - 0.5).abs() < 1.0e-9);
    }
    let snapshot =
        query::runner_snapshot(engine.world(), &runner_key()).expect("runner record");
    assert_eq!(snapshot.run_cursor, Timestamp::from_millis(61_000));
}

#[test]
fn spawned_entity_is_hidden_from_players_who_are_mid_run() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let harness = Harness::new();
    harness
        .presence
        .put_online(player(), WorldId::new("ascent"), START);
    let watcher = PlayerId::new(Uuid::from_u128(2));
    harness
        .presence
        .put_online(watcher, WorldId::new("ascent"), START);
    harness.runs.start_run(watcher, course_id());
    let mut engine = harness.engine(&dir.path().join("orphans.json"));

    let _ = engine.tick(Timestamp::from_millis(1_000));

    let hidden = harness.visibility.0.lock().unwrap().clone();
    assert_eq!(hidden.len(), 1);
    assert_eq!(hidden[0].0, watcher);
}

#[test]
fn offline_owner_retires_the_runner_and_its_entity() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let harness = Harness::new();
    harness
        .presence
        .put_online(player(), WorldId::new("ascent"), START);
    let mut engine = harness.engine(&dir.path().join("orphans.json"));
    let _ = engine.tick(Timestamp::from_millis(1_000));
    assert_eq!(harness.store.entity_count(), 1);

    harness.presence.take_offline(player());
    let _ = engine.tick(Timestamp::from_millis(2_500));

    assert_eq!(query::runner_count(engine.world()), 0);
    assert_eq!(harness.store.entity_count(), 0);
    assert!(query::active_identities(engine.world()).is_empty());
    assert_eq!(engine.orphans_awaiting(), 0);
}

#[test]
fn failed_spawn_lowers_the_guard_for_a_retry() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let harness = Harness::new();
    harness
        .presence
        .put_online(player(), WorldId::new("ascent"), START);
    harness.store.set_fail_spawn(true);
    let mut engine = harness.engine(&dir.path().join("orphans.json"));

    let _ = engine.tick(Timestamp::from_millis(1_000));
    let snapshot =
        query::runner_snapshot(engine.world(), &runner_key()).expect("runner record");
    assert!(!snapshot.spawning, "guard must clear on failure");
    assert_eq!(snapshot.handle, None);

    // Once the store recovers the next tick spawns.
    harness.store.set_fail_spawn(false);
    let _ = engine.tick(Timestamp::from_millis(1_020));
    let snapshot =
        query::runner_snapshot(engine.world(), &runner_key()).expect("runner record");
    assert!(snapshot.handle.is_some());
}

#[test]
fn unconfirmed_shutdown_despawn_is_cleaned_up_after_restart() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let ledger_path = dir.path().join("orphans.json");
    let harness = Harness::new();
    harness
        .presence
        .put_online(player(), WorldId::new("ascent"), START);

    {
        let mut engine = harness.engine(&ledger_path);
        let _ = engine.tick(Timestamp::from_millis(1_000));
        assert_eq!(harness.store.entity_count(), 1);

        // The store refuses the shutdown despawn, stranding the entity.
        harness.store.set_fail_despawn(true);
        engine.shutdown(Timestamp::from_millis(2_000)).expect("shutdown");
    }
    assert!(ledger_path.exists(), "stranded identity must be persisted");
    assert_eq!(harness.store.entity_count(), 1);

    // Next process: the ledger seeds the tracker and the scan removes
    // the leftover entity even though no runner claims it.
    harness.store.set_fail_despawn(false);
    harness.presence.take_offline(player());
    let mut engine = harness.engine(&ledger_path);
    assert_eq!(engine.orphans_awaiting(), 1);

    let _ = engine.tick(Timestamp::from_millis(10_000));

    assert_eq!(harness.store.entity_count(), 0);
    assert_eq!(engine.orphans_awaiting(), 0);

    engine.shutdown(Timestamp::from_millis(11_000)).expect("shutdown");
    assert!(!ledger_path.exists(), "clean shutdown leaves no ledger");
}

#[test]
fn owner_far_from_the_start_still_gets_a_runner_entity() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let harness = Harness::new();
    // Same world as the course, but hundreds of blocks from its start.
    harness
        .presence
        .put_online(player(), WorldId::new("ascent"), Pose::new(500.0, 64.0, 500.0, 0.0));
    let mut engine = harness.engine(&dir.path().join("orphans.json"));

    let _ = engine.tick(Timestamp::from_millis(1_000));

    let snapshot =
        query::runner_snapshot(engine.world(), &runner_key()).expect("runner record");
    assert!(snapshot.handle.is_some());
    assert_eq!(harness.store.entity_count(), 1);
}

#[test]
fn runner_without_a_recording_materialises_but_earns_nothing() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let harness = Harness::new();
    harness
        .presence
        .put_online(player(), WorldId::new("ascent"), START);
    let mut engine = harness.engine_without_recordings(&dir.path().join("orphans.json"));

    let _ = engine.tick(Timestamp::from_millis(1_000));

    let snapshot =
        query::runner_snapshot(engine.world(), &runner_key()).expect("runner record");
    assert!(snapshot.handle.is_some());
    assert_eq!(harness.store.entity_count(), 1);

    // Two trace-lengths later nothing has settled: no recording, no pay.
    let _ = engine.tick(Timestamp::from_millis(121_000));
    let bank = harness.bank.0.lock().unwrap();
    assert_eq!(bank.coins, 0.0);
    assert_eq!(bank.total_earned, 0.0);
}

#[test]
fn ledger_is_written_before_any_shutdown_despawn_executes() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let ledger_path = dir.path().join("orphans.json");
    let harness = Harness::new();
    harness
        .presence
        .put_online(player(), WorldId::new("ascent"), START);
    let mut engine = harness.engine(&ledger_path);
    let _ = engine.tick(Timestamp::from_millis(1_000));
    assert_eq!(harness.store.entity_count(), 1);

    harness.store.watch_ledger(&ledger_path);
    engine.shutdown(Timestamp::from_millis(2_000)).expect("shutdown");

    // A crash between the two would otherwise leak the entity forever.
    let sightings = harness.store.ledger_present_at_despawn();
    assert!(!sightings.is_empty(), "shutdown must despawn the entity");
    assert!(
        sightings.iter().all(|present| *present),
        "every shutdown despawn must run with the ledger already on disk"
    );
    // All despawns confirmed, so the final rewrite clears the file.
    assert!(!ledger_path.exists());
}

#[test]
fn clean_shutdown_despawns_everything_and_leaves_no_ledger() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let ledger_path = dir.path().join("orphans.json");
    let harness = Harness::new();
    harness
        .presence
        .put_online(player(), WorldId::new("ascent"), START);
    let mut engine = harness.engine(&ledger_path);
    let _ = engine.tick(Timestamp::from_millis(1_000));

    engine.shutdown(Timestamp::from_millis(2_000)).expect("shutdown");

    assert_eq!(harness.store.entity_count(), 0);
    assert!(!ledger_path.exists());
}

//! In-memory host collaborators for the demo session.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use pacer_core::{
    AutomationProgress, Course, CourseCatalog, CourseId, DespawnOutcome, EconomyBank,
    EntityHandle, EntityStore, EntityStoreError, GhostRecording, GhostSample, GhostSource,
    PlayerId, Pose, Presence, ProgressSource, RunTracker, RunnerIdentity, RunnerRole,
    SpawnGrant, Visibility, WorldId,
};
use uuid::Uuid;

const COURSE: &str = "summit-sprint";
const WORLD: &str = "ascent";
const TRACE_MILLIS: u64 = 45_000;

fn course_id() -> CourseId {
    CourseId::new(COURSE)
}

fn start_pose() -> Pose {
    Pose::new(0.5, 64.0, 0.5, 90.0)
}

/// Bundle of demo collaborators sharing one entity store and bank.
pub(crate) struct DemoHost {
    player: PlayerId,
    store: SharedStore,
    bank: SharedBank,
}

impl DemoHost {
    pub(crate) fn new() -> Self {
        Self {
            player: PlayerId::new(Uuid::new_v4()),
            store: SharedStore::default(),
            bank: SharedBank::default(),
        }
    }

    pub(crate) fn catalog(&self) -> DemoCatalog {
        DemoCatalog {
            course: Course::new(
                course_id(),
                WorldId::new(WORLD),
                start_pose(),
                Pose::new(30.5, 82.0, 12.5, 0.0),
            ),
        }
    }

    pub(crate) fn progress(&self) -> DemoProgress {
        DemoProgress {
            player: self.player,
        }
    }

    pub(crate) fn presence(&self) -> DemoPresence {
        DemoPresence {
            player: self.player,
        }
    }

    pub(crate) fn ghosts(&self) -> DemoGhosts {
        let samples = vec![
            GhostSample::new(Duration::ZERO, start_pose()),
            GhostSample::new(
                Duration::from_millis(TRACE_MILLIS / 2),
                Pose::new(15.0, 73.0, 6.0, 45.0),
            ),
            GhostSample::new(
                Duration::from_millis(TRACE_MILLIS),
                Pose::new(30.5, 82.0, 12.5, 0.0),
            ),
        ];
        DemoGhosts {
            trace: GhostRecording::new(Duration::from_millis(TRACE_MILLIS), samples),
        }
    }

    pub(crate) fn bank(&self) -> SharedBank {
        self.bank.clone()
    }

    pub(crate) fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub(crate) fn visibility(&self) -> DemoVisibility {
        DemoVisibility
    }

    pub(crate) fn runs(&self) -> DemoRuns {
        DemoRuns
    }

    pub(crate) fn coins_earned(&self) -> f64 {
        self.bank.state().coins
    }

    pub(crate) fn total_earned(&self) -> f64 {
        self.bank.state().total_earned
    }
}

pub(crate) struct DemoCatalog {
    course: Course,
}

impl CourseCatalog for DemoCatalog {
    fn course(&self, id: &CourseId) -> Option<&Course> {
        (id == self.course.id()).then_some(&self.course)
    }
}

pub(crate) struct DemoProgress {
    player: PlayerId,
}

impl ProgressSource for DemoProgress {
    fn automation(&self, player: PlayerId, course: &CourseId) -> Option<AutomationProgress> {
        (player == self.player && course == &course_id()).then_some(AutomationProgress {
            unlocked: true,
            speed_level: 2,
            tier: 1,
        })
    }

    fn courses_of(&self, player: PlayerId) -> Vec<CourseId> {
        if player == self.player {
            vec![course_id()]
        } else {
            Vec::new()
        }
    }
}

pub(crate) struct DemoPresence {
    player: PlayerId,
}

impl Presence for DemoPresence {
    fn online_players(&self) -> Vec<PlayerId> {
        vec![self.player]
    }

    fn world_of(&self, player: PlayerId) -> Option<WorldId> {
        (player == self.player).then(|| WorldId::new(WORLD))
    }

    fn position_of(&self, player: PlayerId) -> Option<Pose> {
        (player == self.player).then(start_pose)
    }
}

pub(crate) struct DemoGhosts {
    trace: GhostRecording,
}

impl GhostSource for DemoGhosts {
    fn recording(&self, _player: PlayerId, course: &CourseId) -> Option<&GhostRecording> {
        (course == &course_id()).then_some(&self.trace)
    }
}

#[derive(Debug, Default)]
pub(crate) struct BankState {
    pub(crate) coins: f64,
    total_earned: f64,
    course_multiplier: f64,
}

/// Bank backed by shared state so the demo can read totals afterwards.
#[derive(Clone, Default)]
pub(crate) struct SharedBank(Arc<Mutex<BankState>>);

impl SharedBank {
    fn state(&self) -> std::sync::MutexGuard<'_, BankState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EconomyBank for SharedBank {
    fn bonus_multiplier(&self, _player: PlayerId) -> f64 {
        1.0
    }

    fn payout_per_run(&self, _player: PlayerId, _course: &CourseId) -> f64 {
        5.0 * (1.0 + self.state().course_multiplier)
    }

    fn multiplier_increment(&self, _player: PlayerId, tier: u32) -> f64 {
        0.1 * f64::from(tier.max(1))
    }

    fn credit_coins(&mut self, _player: PlayerId, amount: f64) -> bool {
        self.state().coins += amount;
        true
    }

    fn credit_total_earned(&mut self, _player: PlayerId, amount: f64) -> bool {
        self.state().total_earned += amount;
        true
    }

    fn grow_course_multiplier(
        &mut self,
        _player: PlayerId,
        _course: &CourseId,
        amount: f64,
    ) -> bool {
        self.state().course_multiplier += amount;
        true
    }
}

#[derive(Debug)]
struct DemoEntity {
    identity: RunnerIdentity,
    world: WorldId,
}

#[derive(Debug, Default)]
struct StoreState {
    next_handle: u64,
    entities: BTreeMap<EntityHandle, DemoEntity>,
}

/// Entity store backed by shared in-memory state.
#[derive(Clone, Default)]
pub(crate) struct SharedStore(Arc<Mutex<StoreState>>);

impl SharedStore {
    fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EntityStore for SharedStore {
    fn spawn(
        &mut self,
        world: &WorldId,
        _role: RunnerRole,
        _pose: Pose,
    ) -> Result<SpawnGrant, EntityStoreError> {
        let mut state = self.state();
        state.next_handle += 1;
        let handle = EntityHandle::new(state.next_handle);
        let identity = RunnerIdentity::random();
        let _ = state.entities.insert(
            handle,
            DemoEntity {
                identity,
                world: world.clone(),
            },
        );
        Ok(SpawnGrant { handle, identity })
    }

    fn despawn(&mut self, handle: EntityHandle) -> DespawnOutcome {
        let _ = self.state().entities.remove(&handle);
        DespawnOutcome::Confirmed
    }

    fn is_usable(&self, handle: EntityHandle) -> bool {
        self.state().entities.contains_key(&handle)
    }

    fn marked_entities(&self) -> Vec<(WorldId, EntityHandle, RunnerIdentity)> {
        self.state()
            .entities
            .iter()
            .map(|(handle, entity)| (entity.world.clone(), *handle, entity.identity))
            .collect()
    }

    fn make_inert(&mut self, _handle: EntityHandle) -> Result<(), EntityStoreError> {
        Ok(())
    }

    fn move_to(&mut self, _handle: EntityHandle, _pose: Pose) -> Result<(), EntityStoreError> {
        Ok(())
    }
}

/// No-op visibility: the demo has no viewers to hide entities from.
pub(crate) struct DemoVisibility;

impl Visibility for DemoVisibility {
    fn hide(&mut self, _viewer: PlayerId, _identity: RunnerIdentity) {}
}

/// The demo player never runs the course personally.
pub(crate) struct DemoRuns;

impl RunTracker for DemoRuns {
    fn active_course(&self, _player: PlayerId) -> Option<CourseId> {
        None
    }
}

#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the Pacer runner engine.
//!
//! This crate defines the message surface that connects the authoritative
//! runner world, the pure systems, and the host adapters. Systems consume
//! [`Event`] streams and immutable snapshots, and respond exclusively with
//! new [`Command`] batches plus [`WorldTask`] submissions for the per-world
//! exclusive executor. Only `world::apply` mutates runner state, and only
//! the task executor touches the external entity store.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod ghost;
pub mod pace;

pub use ghost::{GhostRecording, GhostSample};

/// Identity of a player that owns automated runners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(Uuid);

impl PlayerId {
    /// Creates a player identity from the provided UUID.
    #[must_use]
    pub const fn new(value: Uuid) -> Self {
        Self(value)
    }

    /// Retrieves the underlying UUID.
    #[must_use]
    pub const fn get(&self) -> Uuid {
        self.0
    }
}

/// Identity of a recorded course that runners can automate.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CourseId(String);

impl CourseId {
    /// Creates a course identity from the provided string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrows the textual form of the identity.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identity of a host world that owns an exclusive entity execution context.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorldId(String);

impl WorldId {
    /// Creates a world identity from the provided string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrows the textual form of the identity.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Durable identity token for a spawned runner entity.
///
/// Distinct from [`EntityHandle`]: a handle can become unusable while the
/// entity still physically exists in an unloaded region, but the identity
/// keeps denoting that entity until a despawn is confirmed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunnerIdentity(Uuid);

impl RunnerIdentity {
    /// Creates an identity token from the provided UUID.
    #[must_use]
    pub const fn new(value: Uuid) -> Self {
        Self(value)
    }

    /// Allocates a fresh random identity token.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Retrieves the underlying UUID.
    #[must_use]
    pub const fn get(&self) -> Uuid {
        self.0
    }
}

/// Opaque reference into the external entity store.
///
/// A handle may stop being usable at any time (for example when the region
/// holding the entity is unloaded) without the entity itself being gone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(u64);

impl EntityHandle {
    /// Creates a handle with the provided numeric value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the handle.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

/// Composite key identifying one runner: owner plus course.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunnerKey {
    owner: PlayerId,
    course: CourseId,
}

impl RunnerKey {
    /// Creates a runner key from its owner and course parts.
    #[must_use]
    pub fn new(owner: PlayerId, course: CourseId) -> Self {
        Self { owner, course }
    }

    /// Player that owns the runner.
    #[must_use]
    pub const fn owner(&self) -> PlayerId {
        self.owner
    }

    /// Course the runner automates.
    #[must_use]
    pub fn course(&self) -> &CourseId {
        &self.course
    }
}

/// Position and heading of an entity in a host world.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    x: f64,
    y: f64,
    z: f64,
    yaw: f32,
}

impl Pose {
    /// Creates a pose from coordinates and a heading in degrees.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64, yaw: f32) -> Self {
        Self { x, y, z, yaw }
    }

    /// X coordinate in world units.
    #[must_use]
    pub const fn x(&self) -> f64 {
        self.x
    }

    /// Y coordinate in world units.
    #[must_use]
    pub const fn y(&self) -> f64 {
        self.y
    }

    /// Z coordinate in world units.
    #[must_use]
    pub const fn z(&self) -> f64 {
        self.z
    }

    /// Heading in degrees.
    #[must_use]
    pub const fn yaw(&self) -> f32 {
        self.yaw
    }

    /// Squared distance to another pose, ignoring heading.
    #[must_use]
    pub fn distance_squared(&self, other: Pose) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Reports whether two poses are close enough to skip a movement update.
    #[must_use]
    pub fn approx_eq(&self, other: Pose) -> bool {
        const POSITION_EPSILON_SQ: f64 = 1.0e-6;
        const YAW_EPSILON: f32 = 1.0e-3;
        self.distance_squared(other) <= POSITION_EPSILON_SQ
            && (self.yaw - other.yaw).abs() <= YAW_EPSILON
    }
}

/// Point in time expressed as whole milliseconds since the UNIX epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp from epoch milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Captures the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self(u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX))
    }

    /// Retrieves the epoch-millisecond representation.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Elapsed time since an earlier timestamp, zero if `earlier` is later.
    #[must_use]
    pub fn saturating_duration_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// Advances the timestamp by `count` whole multiples of `interval`.
    #[must_use]
    pub fn advance_by(&self, interval: Duration, count: u64) -> Timestamp {
        let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_add(interval_ms.saturating_mul(count)))
    }
}

/// Cosmetic role assigned to a runner entity, derived from its tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunnerRole(u32);

impl RunnerRole {
    /// Highest tier with a distinct cosmetic role.
    pub const MAX_TIER: u32 = 5;

    /// Resolves the role used when materialising a runner of the given tier.
    #[must_use]
    pub const fn for_tier(tier: u32) -> Self {
        if tier > Self::MAX_TIER {
            Self(Self::MAX_TIER)
        } else {
            Self(tier)
        }
    }

    /// Retrieves the numeric role index.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

/// Static definition of a course: owning world plus start and end poses.
#[derive(Clone, Debug, PartialEq)]
pub struct Course {
    id: CourseId,
    world: WorldId,
    start: Pose,
    end: Pose,
}

impl Course {
    /// Creates a course definition.
    #[must_use]
    pub fn new(id: CourseId, world: WorldId, start: Pose, end: Pose) -> Self {
        Self {
            id,
            world,
            start,
            end,
        }
    }

    /// Identity of the course.
    #[must_use]
    pub fn id(&self) -> &CourseId {
        &self.id
    }

    /// World that owns the course and its entity execution context.
    #[must_use]
    pub fn world(&self) -> &WorldId {
        &self.world
    }

    /// Pose where runs begin and runners are materialised.
    #[must_use]
    pub const fn start(&self) -> Pose {
        self.start
    }

    /// Pose where runs finish.
    #[must_use]
    pub const fn end(&self) -> Pose {
        self.end
    }
}

/// Automation progress a player holds on one course.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AutomationProgress {
    /// Whether automation has been unlocked for the course.
    pub unlocked: bool,
    /// Speed upgrade level, zero or higher.
    pub speed_level: u32,
    /// Cosmetic quality tier, zero or higher.
    pub tier: u32,
}

/// Commands that express all permissible runner-world mutations.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Creates a runner the first time a (player, course) pair qualifies.
    CreateRunner {
        /// Key of the runner to create.
        key: RunnerKey,
        /// Initial speed level sourced from player progress.
        speed_level: u32,
        /// Initial quality tier sourced from player progress.
        tier: u32,
        /// Current time; seeds the completion cursor so a freshly unlocked
        /// runner does not retroactively owe completions.
        now: Timestamp,
    },
    /// Synchronises speed level and tier from player progress.
    SyncRunner {
        /// Key of the runner to synchronise.
        key: RunnerKey,
        /// Speed level reported by the progress collaborator.
        speed_level: u32,
        /// Quality tier reported by the progress collaborator.
        tier: u32,
    },
    /// Removes a runner whose (player, course) pair no longer qualifies.
    RemoveRunner {
        /// Key of the runner to remove.
        key: RunnerKey,
    },
    /// Removes every runner at once; used when no pair qualifies at all.
    RemoveAllRunners,
    /// Sets or clears the economic-tick opt-out flag for a runner.
    SetWaiting {
        /// Key of the runner to flag.
        key: RunnerKey,
        /// Whether the runner should skip economic ticks.
        waiting: bool,
    },
    /// Records the first observation of an unusable entity handle.
    MarkEntityInvalid {
        /// Key of the runner whose handle is unusable.
        key: RunnerKey,
        /// Time of the observation.
        now: Timestamp,
    },
    /// Clears the unusable-handle observation after recovery.
    ClearEntityInvalid {
        /// Key of the runner whose handle became usable again.
        key: RunnerKey,
    },
    /// Abandons an entity stuck unusable and requests a respawn cycle.
    ///
    /// If the subsequent despawn goes unconfirmed, the old identity lands
    /// in the orphan track because the entity may still physically exist.
    ForceRespawn {
        /// Key of the runner to repair.
        key: RunnerKey,
    },
    /// Raises the in-flight spawn guard before a spawn task is submitted.
    BeginSpawn {
        /// Key of the runner being materialised.
        key: RunnerKey,
    },
    /// Applies the outcome of an asynchronous spawn task.
    ///
    /// Clears the spawn guard on every path, success or failure.
    ResolveSpawn {
        /// Key of the runner the spawn was requested for.
        key: RunnerKey,
        /// Handle and identity granted by the store, absent on failure.
        grant: Option<SpawnGrant>,
    },
    /// Clears a runner's handle while a despawn for its entity is in flight.
    ReleaseHandle {
        /// Key of the runner giving up its current entity.
        key: RunnerKey,
    },
    /// Applies the outcome of an asynchronous despawn task.
    ResolveDespawn {
        /// Identity the despawn targeted.
        identity: RunnerIdentity,
        /// Whether the store confirmed the removal.
        confirmed: bool,
    },
    /// Advances a runner's completion cursor.
    ///
    /// After settled runs, the cursor moves by whole multiples of the
    /// interval past its old value so partial progress survives; for a
    /// waiting runner, zero completions with a cursor at the current time
    /// pauses accrual instead.
    AdvanceRunner {
        /// Key of the runner that completed runs.
        key: RunnerKey,
        /// Number of whole completions settled, zero for a waiting pause.
        completions: u64,
        /// New cursor value.
        cursor: Timestamp,
    },
    /// Records the pose last issued to the runner's entity.
    TrackPose {
        /// Key of the runner that moved.
        key: RunnerKey,
        /// Pose issued, or `None` after a return-to-start reset.
        pose: Option<Pose>,
    },
}

/// Events broadcast by the world after processing commands.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Confirms that a runner entry was created.
    RunnerCreated {
        /// Key of the new runner.
        key: RunnerKey,
    },
    /// Confirms that a runner entry was removed.
    RunnerRemoved {
        /// Key of the removed runner.
        key: RunnerKey,
        /// Handle held at removal time, if the entity was materialised.
        handle: Option<EntityHandle>,
        /// Identity held at removal time, if a spawn had been confirmed.
        identity: Option<RunnerIdentity>,
    },
    /// Requests a despawn-then-spawn cycle after a quality-tier change.
    RespawnRequired {
        /// Key of the runner to rematerialise.
        key: RunnerKey,
        /// Handle of the entity to despawn first, if any.
        handle: Option<EntityHandle>,
        /// Identity of the entity to despawn first, if any.
        identity: Option<RunnerIdentity>,
    },
    /// Reports that an identity entered the orphan track.
    IdentityOrphaned {
        /// Identity that may still denote a live entity needing cleanup.
        identity: RunnerIdentity,
    },
    /// Reports the outcome of a spawn request.
    SpawnResolved {
        /// Key of the runner the spawn was requested for.
        key: RunnerKey,
        /// Whether the runner now holds a handle and identity.
        succeeded: bool,
    },
    /// Reports that a runner's handle was first observed unusable.
    EntityInvalidated {
        /// Key of the affected runner.
        key: RunnerKey,
    },
    /// Reports that a runner's handle became usable again.
    EntityRecovered {
        /// Key of the affected runner.
        key: RunnerKey,
    },
    /// Reports that completions were settled for a runner.
    RunsSettled {
        /// Key of the runner that completed runs.
        key: RunnerKey,
        /// Number of whole completions settled.
        completions: u64,
    },
}

/// Handle and identity granted by the entity store for a confirmed spawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpawnGrant {
    /// Handle for driving the spawned entity.
    pub handle: EntityHandle,
    /// Durable identity token of the spawned entity.
    pub identity: RunnerIdentity,
}

/// Outcome of a despawn request against the entity store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DespawnOutcome {
    /// The store removed the entity; its identity no longer denotes anything.
    Confirmed,
    /// Removal could not be confirmed; the entity may still exist.
    Unconfirmed,
}

/// Failures reported by the external entity store.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EntityStoreError {
    /// The owning world is not available to the store.
    #[error("world {0:?} is unavailable")]
    WorldUnavailable(WorldId),
    /// The store produced a creation result no handle could be read from.
    #[error("creation result carried no usable handle")]
    MalformedGrant,
    /// The store rejected the operation.
    #[error("entity store rejected the operation: {0}")]
    Rejected(String),
}

/// Tasks submitted to a world's exclusive entity execution context.
///
/// The tick thread never mutates the external store directly; every
/// creation, removal, marker change, or move is expressed as a task and
/// serialised through the owning world's queue.
#[derive(Clone, Debug, PartialEq)]
pub enum WorldTask {
    /// Materialises a runner entity at the course start.
    Spawn {
        /// Runner the entity is for.
        key: RunnerKey,
        /// World whose queue must execute the task.
        world: WorldId,
        /// Cosmetic role derived from the runner's tier.
        role: RunnerRole,
        /// Pose to materialise at.
        pose: Pose,
    },
    /// Removes a runner entity.
    Despawn {
        /// World whose queue must execute the task.
        world: WorldId,
        /// Handle of the entity to remove.
        handle: EntityHandle,
        /// Identity to resolve once the outcome is known, if tracked.
        identity: Option<RunnerIdentity>,
    },
    /// Moves a runner entity to an interpolated pose.
    Move {
        /// Runner the move is for; used for throttled failure logging.
        key: RunnerKey,
        /// World whose queue must execute the task.
        world: WorldId,
        /// Handle of the entity to move.
        handle: EntityHandle,
        /// Pose to move to.
        pose: Pose,
    },
    /// Removes an orphaned entity discovered by the detection scan.
    RemoveOrphan {
        /// World whose queue must execute the task.
        world: WorldId,
        /// Identity awaiting cleanup.
        identity: RunnerIdentity,
        /// Handle the detection scan observed for the entity.
        handle: EntityHandle,
    },
}

impl WorldTask {
    /// World whose exclusive queue must execute the task.
    #[must_use]
    pub fn world(&self) -> &WorldId {
        match self {
            Self::Spawn { world, .. }
            | Self::Despawn { world, .. }
            | Self::Move { world, .. }
            | Self::RemoveOrphan { world, .. } => world,
        }
    }
}

/// Results returned by the task executor for asynchronous tasks.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskCompletion {
    /// A spawn task finished.
    Spawned {
        /// Runner the spawn was requested for.
        key: RunnerKey,
        /// Handle and identity on success, absent on failure.
        grant: Option<SpawnGrant>,
    },
    /// A despawn task finished for a tracked identity.
    Despawned {
        /// Identity the despawn targeted.
        identity: RunnerIdentity,
        /// Whether the store confirmed the removal.
        confirmed: bool,
    },
    /// An orphan-removal task finished.
    OrphanRemoved {
        /// Identity the removal targeted.
        identity: RunnerIdentity,
        /// Whether the entity is now gone (removed or already absent).
        removed: bool,
    },
}

/// Read-only catalogue of course definitions.
pub trait CourseCatalog {
    /// Resolves a course definition by identity.
    fn course(&self, id: &CourseId) -> Option<&Course>;
}

/// Read-only access to player automation progress.
pub trait ProgressSource {
    /// Automation progress a player holds on a course, if any.
    fn automation(&self, player: PlayerId, course: &CourseId) -> Option<AutomationProgress>;

    /// Courses on which the player holds any automation progress.
    fn courses_of(&self, player: PlayerId) -> Vec<CourseId>;
}

/// Read-only view of which players are online and where.
pub trait Presence {
    /// Players currently connected, in unspecified order.
    fn online_players(&self) -> Vec<PlayerId>;

    /// World the player is physically in, if known.
    fn world_of(&self, player: PlayerId) -> Option<WorldId>;

    /// Current pose of the player, if known.
    fn position_of(&self, player: PlayerId) -> Option<Pose>;
}

/// Read-only access to captured ghost recordings.
pub trait GhostSource {
    /// Best recording a player holds for a course; absence means the course
    /// cannot be automated yet.
    fn recording(&self, player: PlayerId, course: &CourseId) -> Option<&GhostRecording>;
}

/// Economy collaborator: reward parameters and best-effort atomic credits.
///
/// Each credit operation is independently best-effort; no cross-operation
/// transaction is required, and a failed operation is never retried.
pub trait EconomyBank {
    /// External speed bonus multiplier for the player; must be positive.
    fn bonus_multiplier(&self, player: PlayerId) -> f64;

    /// Reward paid per completed run, using the current (pre-increment)
    /// course multiplier.
    fn payout_per_run(&self, player: PlayerId, course: &CourseId) -> f64;

    /// Course-multiplier growth earned per completed run at the given tier.
    fn multiplier_increment(&self, player: PlayerId, tier: u32) -> f64;

    /// Credits coins to the player; reports whether the credit applied.
    fn credit_coins(&mut self, player: PlayerId, amount: f64) -> bool;

    /// Credits lifetime earnings; reports whether the credit applied.
    fn credit_total_earned(&mut self, player: PlayerId, amount: f64) -> bool;

    /// Grows the course multiplier; reports whether the growth applied.
    fn grow_course_multiplier(&mut self, player: PlayerId, course: &CourseId, amount: f64)
        -> bool;
}

/// External entity store owning the visual runner entities.
pub trait EntityStore {
    /// Materialises an entity; returns its handle and durable identity.
    fn spawn(
        &mut self,
        world: &WorldId,
        role: RunnerRole,
        pose: Pose,
    ) -> Result<SpawnGrant, EntityStoreError>;

    /// Removes an entity, reporting whether removal was confirmed.
    fn despawn(&mut self, handle: EntityHandle) -> DespawnOutcome;

    /// Reports whether a handle can currently be used to drive its entity.
    fn is_usable(&self, handle: EntityHandle) -> bool;

    /// Enumerates live entities carrying the runner marker.
    ///
    /// Backs the orphan detection scan; includes entities spawned by a
    /// previous process whose records are gone.
    fn marked_entities(&self) -> Vec<(WorldId, EntityHandle, RunnerIdentity)>;

    /// Applies inert markers: no damage, no autonomous movement.
    fn make_inert(&mut self, handle: EntityHandle) -> Result<(), EntityStoreError>;

    /// Moves an entity to the provided pose.
    fn move_to(&mut self, handle: EntityHandle, pose: Pose) -> Result<(), EntityStoreError>;
}

/// Per-viewer entity visibility control.
pub trait Visibility {
    /// Hides the entity with the given identity from the viewer.
    fn hide(&mut self, viewer: PlayerId, identity: RunnerIdentity);
}

/// Read-only view of which players are mid-run on which course.
pub trait RunTracker {
    /// Course the player is actively running, if any.
    fn active_course(&self, player: PlayerId) -> Option<CourseId>;
}

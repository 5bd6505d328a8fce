#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Entity lifecycle system: materialises and retires runner entities.
//!
//! Spawning goes through an asynchronous protocol against the entity
//! store. The hard rule is at most one spawn in flight per runner: a
//! spawn is requested only when the guard flag is down and the runner
//! holds neither a handle nor an identity. Removal and respawn events
//! from the world turn into despawn tasks whose outcomes flow back as
//! commands.

use pacer_core::{
    Command, Course, CourseId, Event, RunnerKey, RunnerRole, WorldTask,
};
use pacer_world::query::RunnerView;

/// Pure system that drives the spawn and despawn halves of the protocol.
#[derive(Debug, Default)]
pub struct Lifecycle;

impl Lifecycle {
    /// Creates the lifecycle system.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Consumes world events and the runner view to emit tasks.
    ///
    /// `course` resolves course definitions; a runner whose course is
    /// unknown stays unspawned until reconciliation removes it.
    pub fn handle<C>(
        &self,
        events: &[Event],
        view: &RunnerView,
        course: C,
        out: &mut Vec<Command>,
        out_tasks: &mut Vec<WorldTask>,
    ) where
        C: Fn(&CourseId) -> Option<Course>,
    {
        for event in events {
            match event {
                Event::RunnerRemoved {
                    key,
                    handle,
                    identity,
                } => {
                    if let Some(handle) = handle {
                        self.retire(&course, key, *handle, identity.as_ref().copied(), out, out_tasks);
                    }
                }
                Event::RespawnRequired {
                    key,
                    handle,
                    identity,
                } => {
                    if let Some(handle) = handle {
                        self.retire(&course, key, *handle, identity.as_ref().copied(), out, out_tasks);
                    }
                    out.push(Command::ReleaseHandle { key: key.clone() });
                }
                _ => {}
            }
        }

        for snapshot in view.iter() {
            if snapshot.spawning || snapshot.handle.is_some() || snapshot.identity.is_some() {
                continue;
            }
            let Some(course) = course(snapshot.key.course()) else {
                continue;
            };

            out.push(Command::BeginSpawn {
                key: snapshot.key.clone(),
            });
            out_tasks.push(WorldTask::Spawn {
                key: snapshot.key.clone(),
                world: course.world().clone(),
                role: RunnerRole::for_tier(snapshot.tier),
                pose: course.start(),
            });
        }
    }

    /// Submits a despawn for a retiring entity.
    ///
    /// When the owning world cannot be resolved any more, no task can be
    /// queued; the despawn resolves unconfirmed so the identity lands in
    /// the orphan track instead of leaking.
    fn retire<C>(
        &self,
        course: &C,
        key: &RunnerKey,
        handle: pacer_core::EntityHandle,
        identity: Option<pacer_core::RunnerIdentity>,
        out: &mut Vec<Command>,
        out_tasks: &mut Vec<WorldTask>,
    ) where
        C: Fn(&CourseId) -> Option<Course>,
    {
        match course(key.course()) {
            Some(course) => out_tasks.push(WorldTask::Despawn {
                world: course.world().clone(),
                handle,
                identity,
            }),
            None => {
                if let Some(identity) = identity {
                    out.push(Command::ResolveDespawn {
                        identity,
                        confirmed: false,
                    });
                }
            }
        }
    }
}

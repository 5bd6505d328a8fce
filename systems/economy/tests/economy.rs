//! Scenario coverage for run settlement and ghost-driven movement.

use std::time::Duration;

use pacer_core::{
    Command, Course, CourseId, EntityHandle, GhostRecording, GhostSample, PlayerId, Pose,
    RunnerIdentity, RunnerKey, SpawnGrant, Timestamp, WorldId, WorldTask,
};
use pacer_system_economy::{Economy, RewardRates, Settlement};
use pacer_world::{apply, query, World};
use uuid::Uuid;

struct FlatRates {
    bonus: f64,
    per_run: f64,
    increment: f64,
}

impl RewardRates for FlatRates {
    fn bonus_multiplier(&self, _player: PlayerId) -> f64 {
        self.bonus
    }

    fn payout_per_run(&self, _player: PlayerId, _course: &CourseId) -> f64 {
        self.per_run
    }

    fn multiplier_increment(&self, _player: PlayerId, _tier: u32) -> f64 {
        self.increment
    }
}

fn key(player: u128, course: &str) -> RunnerKey {
    RunnerKey::new(PlayerId::new(Uuid::from_u128(player)), CourseId::new(course))
}

fn course(id: &str) -> Course {
    Course::new(
        CourseId::new(id),
        WorldId::new("ascent"),
        Pose::new(0.0, 64.0, 0.0, 0.0),
        Pose::new(50.0, 80.0, 0.0, 0.0),
    )
}

// A one-minute trace walking the x axis from 0 to 60.
fn trace() -> GhostRecording {
    GhostRecording::new(
        Duration::from_millis(60_000),
        vec![
            GhostSample::new(Duration::ZERO, Pose::new(0.0, 64.0, 0.0, 0.0)),
            GhostSample::new(
                Duration::from_millis(60_000),
                Pose::new(60.0, 64.0, 0.0, 0.0),
            ),
        ],
    )
}

fn seeded_world(key: RunnerKey, cursor_ms: u64) -> World {
    let mut world = World::new();
    let mut events = Vec::new();
    apply(
        &mut world,
        Command::CreateRunner {
            key: key.clone(),
            speed_level: 0,
            tier: 1,
            now: Timestamp::from_millis(cursor_ms),
        },
        &mut events,
    );
    apply(
        &mut world,
        Command::ResolveSpawn {
            key,
            grant: Some(SpawnGrant {
                handle: EntityHandle::new(7),
                identity: RunnerIdentity::new(Uuid::from_u128(0xA)),
            }),
        },
        &mut events,
    );
    world
}

fn run_tick(
    world: &World,
    now_ms: u64,
    rates: &FlatRates,
) -> (Vec<Command>, Vec<WorldTask>, Vec<Settlement>) {
    let economy = Economy::new();
    let mut out = Vec::new();
    let mut tasks = Vec::new();
    let mut settlements = Vec::new();
    economy.handle(
        Timestamp::from_millis(now_ms),
        &query::runner_view(world),
        rates,
        |_| Some(trace()),
        |id| Some(course(id.as_str())),
        |_| true,
        &mut out,
        &mut tasks,
        &mut settlements,
    );
    (out, tasks, settlements)
}

#[test]
fn whole_completions_settle_and_keep_the_remainder() {
    let world = seeded_world(key(1, "alpha"), 0);
    let rates = FlatRates {
        bonus: 2.0, // halves the one-minute trace to 30s per run
        per_run: 10.0,
        increment: 0.5,
    };

    let (out, _tasks, settlements) = run_tick(&world, 95_000, &rates);

    assert_eq!(
        settlements,
        vec![Settlement {
            player: PlayerId::new(Uuid::from_u128(1)),
            course: CourseId::new("alpha"),
            completions: 3,
            coins: 30.0,
            total_earned: 30.0,
            multiplier_growth: 1.5,
        }]
    );
    let advance = out
        .iter()
        .find(|command| matches!(command, Command::AdvanceRunner { .. }))
        .expect("advance command");
    assert_eq!(
        advance,
        &Command::AdvanceRunner {
            key: key(1, "alpha"),
            completions: 3,
            cursor: Timestamp::from_millis(90_000),
        }
    );
}

#[test]
fn sub_interval_elapsed_settles_nothing_but_still_moves() {
    let world = seeded_world(key(1, "alpha"), 0);
    let rates = FlatRates {
        bonus: 1.0,
        per_run: 10.0,
        increment: 0.5,
    };

    let (out, tasks, settlements) = run_tick(&world, 30_000, &rates);

    assert!(settlements.is_empty());
    assert!(!out
        .iter()
        .any(|command| matches!(command, Command::AdvanceRunner { .. })));

    // Halfway through the minute-long trace the runner sits at x = 30.
    match tasks.as_slice() {
        [WorldTask::Move { pose, handle, .. }] => {
            assert_eq!(*handle, EntityHandle::new(7));
            assert!((pose.x() - 30.0).abs() < 1.0e-9);
        }
        other => panic!("expected one move task, got {other:?}"),
    }
    assert!(out
        .iter()
        .any(|command| matches!(command, Command::TrackPose { pose: Some(_), .. })));
}

#[test]
fn moves_are_suppressed_while_the_pose_is_unchanged() {
    let mut world = seeded_world(key(1, "alpha"), 0);
    let rates = FlatRates {
        bonus: 1.0,
        per_run: 10.0,
        increment: 0.5,
    };

    let (out, tasks, _) = run_tick(&world, 30_000, &rates);
    assert_eq!(tasks.len(), 1);
    let mut events = Vec::new();
    for command in out {
        apply(&mut world, command, &mut events);
    }

    // Same instant again: the tracked pose matches, so nothing moves.
    let (out, tasks, _) = run_tick(&world, 30_000, &rates);
    assert!(tasks.is_empty());
    assert!(out.is_empty());
}

#[test]
fn waiting_runner_pays_nothing_and_its_cursor_follows_the_clock() {
    let mut world = seeded_world(key(1, "alpha"), 0);
    let mut events = Vec::new();
    apply(
        &mut world,
        Command::SetWaiting {
            key: key(1, "alpha"),
            waiting: true,
        },
        &mut events,
    );
    let rates = FlatRates {
        bonus: 1.0,
        per_run: 10.0,
        increment: 0.5,
    };

    let (out, tasks, settlements) = run_tick(&world, 120_000, &rates);

    assert!(settlements.is_empty());
    assert!(out.contains(&Command::AdvanceRunner {
        key: key(1, "alpha"),
        completions: 0,
        cursor: Timestamp::from_millis(120_000),
    }));
    // Movement still runs while waiting: the clock-bound cursor pins the
    // entity at the start of its trace rather than freezing it mid-route.
    match tasks.as_slice() {
        [WorldTask::Move { pose, .. }] => {
            assert!(pose.approx_eq(Pose::new(0.0, 64.0, 0.0, 0.0)));
        }
        other => panic!("expected one move task, got {other:?}"),
    }
}

#[test]
fn runner_without_a_trace_is_skipped() {
    let world = seeded_world(key(1, "alpha"), 0);
    let economy = Economy::new();
    let rates = FlatRates {
        bonus: 1.0,
        per_run: 10.0,
        increment: 0.5,
    };
    let mut out = Vec::new();
    let mut tasks = Vec::new();
    let mut settlements = Vec::new();

    economy.handle(
        Timestamp::from_millis(120_000),
        &query::runner_view(&world),
        &rates,
        |_| None,
        |id| Some(course(id.as_str())),
        |_| true,
        &mut out,
        &mut tasks,
        &mut settlements,
    );

    assert!(out.is_empty());
    assert!(tasks.is_empty());
    assert!(settlements.is_empty());
}

#[test]
fn unusable_handle_settles_rewards_but_never_moves() {
    let world = seeded_world(key(1, "alpha"), 0);
    let economy = Economy::new();
    let rates = FlatRates {
        bonus: 1.0,
        per_run: 10.0,
        increment: 0.5,
    };
    let mut out = Vec::new();
    let mut tasks = Vec::new();
    let mut settlements = Vec::new();

    economy.handle(
        Timestamp::from_millis(61_000),
        &query::runner_view(&world),
        &rates,
        |_| Some(trace()),
        |id| Some(course(id.as_str())),
        |_| false,
        &mut out,
        &mut tasks,
        &mut settlements,
    );

    assert_eq!(settlements.len(), 1);
    assert_eq!(settlements[0].completions, 1);
    assert!(tasks.is_empty());
}

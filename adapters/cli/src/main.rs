#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line demo that drives the runner engine against an in-memory
//! host: one player, one recorded course, a simulated clock.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use pacer_core::Timestamp;
use pacer_runtime::{Engine, EngineConfig, Host};
use pacer_world::query;

mod demo;

/// Runs a scripted runner-engine session and prints a summary.
#[derive(Debug, Parser)]
#[command(name = "pacer", about = "Runner engine demo")]
struct Args {
    /// Number of engine ticks to simulate.
    #[arg(long, default_value_t = 8_000)]
    ticks: u64,

    /// Simulated milliseconds between ticks.
    #[arg(long, default_value_t = 16)]
    tick_ms: u64,

    /// Path of the orphan ledger file.
    #[arg(long, default_value = "orphan_runners.json")]
    ledger: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let demo = demo::DemoHost::new();
    let config = EngineConfig {
        tick: Duration::from_millis(args.tick_ms),
        ledger_path: args.ledger,
        ..EngineConfig::default()
    };
    let host = Host {
        catalog: Box::new(demo.catalog()),
        progress: Box::new(demo.progress()),
        presence: Box::new(demo.presence()),
        ghosts: Box::new(demo.ghosts()),
        bank: Box::new(demo.bank()),
        store: Box::new(demo.store()),
        visibility: Box::new(demo.visibility()),
        runs: Box::new(demo.runs()),
    };
    let mut engine = Engine::new(config, host)?;

    let mut now = Timestamp::now();
    let step = Duration::from_millis(args.tick_ms);
    let mut settled_runs = 0_u64;
    for _ in 0..args.ticks {
        for event in engine.tick(now) {
            if let pacer_core::Event::RunsSettled { completions, .. } = event {
                settled_runs += completions;
            }
        }
        now = now.advance_by(step, 1);
    }

    println!(
        "simulated {} ticks: {} runner(s), {} run(s) settled, {:.1} coins earned ({:.1} lifetime)",
        args.ticks,
        query::runner_count(engine.world()),
        settled_runs,
        demo.coins_earned(),
        demo.total_earned(),
    );

    engine.shutdown(now)?;
    println!(
        "shutdown complete, {} orphan(s) awaiting cleanup",
        engine.orphans_awaiting()
    );
    Ok(())
}

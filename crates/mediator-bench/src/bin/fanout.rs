//! Fan-out throughput driver for the mediator.
//!
//! Builds a channel tree, publishes to its root in a loop, and reports how
//! many callbacks ran per second.
//!
//! ```bash
//! # 8 branches x 8 leaves, 10 000 publishes
//! fanout 8 8 10000
//!
//! # Keep going after failing callbacks
//! MEDIATOR_FAILURE_POLICY=isolate fanout
//! ```

use anyhow::{Context, Result};
use mediator_core::{args, Mediator, MediatorConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn parse_arg(args: &[String], index: usize, default: usize) -> Result<usize> {
    match args.get(index) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid numeric argument: {raw}")),
        None => Ok(default),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediator_core=info,fanout=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli: Vec<String> = std::env::args().collect();
    let branches = parse_arg(&cli, 1, 8)?;
    let leaves = parse_arg(&cli, 2, 8)?;
    let iterations = parse_arg(&cli, 3, 10_000)?;

    let config = MediatorConfig::load().context("Failed to load mediator configuration")?;
    let delimiter = config.delimiter;
    let mediator = Mediator::with_config(config);
    mediator_core::metrics::init_metrics();

    let invocations = Arc::new(AtomicU64::new(0));
    for branch in 0..branches {
        for leaf in 0..leaves {
            let counter = Arc::clone(&invocations);
            let namespace = format!("bench{delimiter}{branch}{delimiter}{leaf}");
            mediator.subscribe(&namespace, move |_, _| {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            });
        }
    }

    let stats = mediator.stats();
    tracing::info!(
        channels = stats.channel_count,
        subscribers = stats.subscriber_count,
        iterations,
        "Channel tree ready"
    );

    let payload = args!["tick", 1];
    let start = Instant::now();
    for _ in 0..iterations {
        mediator
            .publish("bench", &payload)
            .context("Publish failed")?;
    }
    let elapsed = start.elapsed();

    let total = invocations.load(Ordering::Relaxed);
    let per_sec = total as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    tracing::info!(
        invocations = total,
        elapsed_ms = elapsed.as_millis() as u64,
        "Fan-out complete"
    );
    println!(
        "{} callbacks in {:.2?} ({:.0} callbacks/s)",
        total, elapsed, per_sec
    );

    Ok(())
}

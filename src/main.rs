//! Resilience pipeline driver.
//!
//! ```text
//!   resilience-pipeline [--config PATH] check
//!       load + validate config, print the effective TOML
//!
//!   resilience-pipeline [--config PATH] simulate --requests N ...
//!       synthetic load ──▶ ResilienceHandler::execute ──▶ JSON summary
//!                           dedupe → rate limit → bulkhead
//!                           → breaker → retry → timeout → op
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use resilience_pipeline::config::{load_or_default, PipelineConfig};
use resilience_pipeline::lifecycle::{signals, Shutdown};
use resilience_pipeline::observability::{logging, metrics};
use resilience_pipeline::resilience::{HandlerStats, ResilienceHandler};

#[derive(Parser)]
#[command(name = "resilience-pipeline")]
#[command(about = "Drive the resilience pipeline against synthetic operations", long_about = None)]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the config and print the effective values
    Check,
    /// Run synthetic operations through one handler
    Simulate(SimulateArgs),
}

#[derive(Args)]
struct SimulateArgs {
    #[arg(long, default_value_t = 1000)]
    requests: usize,

    /// Calls in flight at once
    #[arg(long, default_value_t = 32)]
    concurrency: usize,

    /// Probability in [0, 1] that an attempt fails
    #[arg(long, default_value_t = 0.1)]
    failure_rate: f64,

    /// Mean attempt latency
    #[arg(long, default_value_t = 20)]
    latency_ms: u64,

    /// Distinct dedupe keys to spread calls over
    #[arg(long, default_value_t = 50)]
    keys: usize,
}

#[derive(Debug, thiserror::Error)]
enum SimulatedError {
    #[error("injected failure")]
    Injected,
    #[error("attempt cancelled at deadline")]
    Cancelled,
}

#[derive(Serialize)]
struct SimulationSummary {
    requested: usize,
    completed: u64,
    elapsed_ms: u64,
    outcomes: BTreeMap<&'static str, u64>,
    stats: HandlerStats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Check => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Simulate(args) => simulate(config, args).await,
    }
}

async fn simulate(
    config: PipelineConfig,
    args: SimulateArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging(&config.observability);
    tracing::info!(
        requests = args.requests,
        concurrency = args.concurrency,
        failure_rate = args.failure_rate,
        "resilience-pipeline v{} simulating",
        env!("CARGO_PKG_VERSION")
    );

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let handler = Arc::new(ResilienceHandler::new(&config));
    let shutdown = Shutdown::new();
    tokio::spawn(signals::wait_for_ctrl_c(shutdown.clone()));

    let stats_task = {
        let handler = handler.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                metrics::record_stats(&handler.stats());
            }
        })
    };

    let failure_rate = args.failure_rate.clamp(0.0, 1.0);
    let latency_ms = args.latency_ms;
    let keys = args.keys.max(1);

    let mut stop = shutdown.subscribe();
    let started = Instant::now();
    let mut results = stream::iter(0..args.requests)
        .take_until(Box::pin(async move {
            let _ = stop.recv().await;
        }))
        .map(|i| {
            let handler = handler.clone();
            async move {
                let key = format!("key-{}", i % keys);
                handler
                    .execute(&key, |token: CancellationToken| {
                        let latency =
                            Duration::from_millis(fastrand::u64(0..=latency_ms.saturating_mul(2)));
                        let fails = fastrand::f64() < failure_rate;
                        async move {
                            tokio::select! {
                                _ = token.cancelled() => Err(SimulatedError::Cancelled),
                                _ = tokio::time::sleep(latency) => {
                                    if fails { Err(SimulatedError::Injected) } else { Ok(()) }
                                }
                            }
                        }
                    })
                    .await
            }
        })
        .buffer_unordered(args.concurrency.max(1));

    let mut outcomes: BTreeMap<&'static str, u64> = BTreeMap::new();
    let mut completed = 0;
    while let Some(result) = results.next().await {
        let label = match &result {
            Ok(()) => "ok",
            Err(err) => err.kind().as_str(),
        };
        *outcomes.entry(label).or_default() += 1;
        completed += 1;
    }
    stats_task.abort();

    let stats = handler.stats();
    metrics::record_stats(&stats);
    if completed < args.requests as u64 {
        tracing::warn!(completed, requested = args.requests, "Simulation stopped early");
    }

    let summary = SimulationSummary {
        requested: args.requests,
        completed,
        elapsed_ms: started.elapsed().as_millis() as u64,
        outcomes,
        stats,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

//! fxwallet Simulator
//!
//! Drives the ledger engine with concurrent funding, trades and replayed
//! references, then audits every balance against the journal.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use fxwallet_fx::RateCacheConfig;
use fxwallet_ledger::{LedgerConfig, LedgerStore, MemoryLedgerStore, PgLedgerStore};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod controller;
mod metrics;
mod scenario;

use controller::{SimulationConfig, SimulationController};
use metrics::SimulationReport;
use scenario::Scenario;

/// fxwallet Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "fxwallet-simulator")]
#[command(about = "Concurrent load and audit harness for the fxwallet ledger")]
struct Args {
    /// Number of simulated users
    #[arg(short, long, default_value = "10")]
    users: usize,

    /// Number of operations to generate
    #[arg(short, long, default_value = "1000")]
    operations: usize,

    /// Operations in flight at once
    #[arg(short, long, default_value = "16")]
    concurrency: usize,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Scenario to run: idempotency-storm, opposite-trades, random-load
    #[arg(short, long, default_value = "random-load")]
    scenario: String,

    /// Emit JSON logs and a JSON report
    #[arg(long)]
    json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json);

    info!("Starting fxwallet Simulator");
    info!(
        users = args.users,
        operations = args.operations,
        concurrency = args.concurrency,
        seed = ?args.seed,
        "Configuration"
    );

    let scenario = Scenario::load(&args.scenario, args.users, args.operations)?;

    let cache_config = RateCacheConfig::from_env();
    cache_config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid rate cache configuration: {}", e))?;
    let ledger_config = LedgerConfig::from_env();
    ledger_config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid ledger configuration: {}", e))?;

    let store: Arc<dyn LedgerStore> = match &ledger_config.database_url {
        Some(url) => {
            info!("Using PostgreSQL ledger store");
            let store = PgLedgerStore::connect(url, args.concurrency.max(1) as u32 + 2).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            info!("Using in-memory ledger store");
            Arc::new(MemoryLedgerStore::new())
        }
    };

    let controller = SimulationController::new(
        SimulationConfig {
            users: args.users,
            concurrency: args.concurrency,
            seed: args.seed,
        },
        store,
        cache_config,
        ledger_config,
    );
    controller.initialize().await?;

    let started = Instant::now();
    controller.run_scenario(&scenario).await?;
    let elapsed = started.elapsed();

    let metrics = controller.metrics().await;
    let report = SimulationReport {
        scenario: scenario.name.clone(),
        users: args.users,
        concurrency: args.concurrency,
        elapsed_ms: elapsed.as_millis(),
        throughput: metrics.throughput(elapsed),
        metrics: metrics.summary(),
        failed_assertions: controller.failed_assertions().await,
        audit: controller.audit().await?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        info!("Simulation complete");
        info!("Total operations: {}", report.metrics.total_operations);
        info!("Successful: {}", report.metrics.successful_operations);
        info!("Rejected: {}", report.metrics.rejected_operations);
        for (code, count) in &report.metrics.rejections {
            info!("  {}: {}", code, count);
        }
        info!(
            "Latency: avg {}us, p50 {}us, p99 {}us",
            report.metrics.average_latency_us,
            report.metrics.p50_latency_us,
            report.metrics.p99_latency_us
        );
        info!("Throughput: {:.1} ops/s", report.throughput);
        info!(
            "Audit: {} balances, {} transactions checked",
            report.audit.balances_checked, report.audit.transactions_checked
        );
    }

    if !report.passed() {
        for mismatch in &report.audit.mismatches {
            error!("Ledger mismatch: {}", mismatch);
        }
        for failure in &report.failed_assertions {
            error!("Assertion failed: {}", failure);
        }
        anyhow::bail!(
            "simulation failed: {} ledger mismatches, {} failed assertions",
            report.audit.mismatches.len(),
            report.failed_assertions.len()
        );
    }

    Ok(())
}

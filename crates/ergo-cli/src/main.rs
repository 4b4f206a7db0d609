mod logging;

use std::future::Future;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ergo_core::Domain;
use ergo_storage::PgDocumentStore;
use ergo_sync::{Driver, PassReport, SyncConfig};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "ergo-cli")]
#[command(about = "Ergonomic risk sync: tenant sources into the reporting store")]
struct Cli {
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Incremental and realtime loops side by side (default).
    Run,
    /// Incremental loop only.
    Incremental,
    /// Realtime loop only.
    Realtime,
    /// One incremental pass then one realtime pass.
    Once,
    /// Create the reporting store tables.
    Migrate,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let config = SyncConfig::from_env().context("loading configuration")?;
    config.log_summary();

    let store = Arc::new(config.connect_store().await?);
    store
        .ensure_schema()
        .await
        .context("creating reporting store tables")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Migrate => println!("reporting store schema is up to date"),
        Commands::Run => {
            let driver = build_driver(&config, &store)?;
            until_shutdown(driver.run()).await;
        }
        Commands::Incremental => {
            let driver = build_driver(&config, &store)?;
            until_shutdown(driver.run_incremental_loop()).await;
        }
        Commands::Realtime => {
            let driver = build_driver(&config, &store)?;
            until_shutdown(driver.run_realtime_loop()).await;
        }
        Commands::Once => {
            let driver = build_driver(&config, &store)?;
            let incremental = driver.run_incremental_pass().await;
            print_pass("incremental", &incremental);
            let realtime = driver.run_realtime_pass().await;
            print_pass("realtime", &realtime);
            if !incremental.is_clean() || !realtime.is_clean() {
                bail!(
                    "{} domain cycle(s) failed",
                    incremental.failed.len() + realtime.failed.len()
                );
            }
        }
    }

    Ok(())
}

fn build_driver(config: &SyncConfig, store: &Arc<PgDocumentStore>) -> Result<Driver> {
    config.build_driver(store.clone(), store.clone())
}

/// Runs `work` until it returns or Ctrl-C arrives; in-flight cycles are dropped.
async fn until_shutdown(work: impl Future<Output = ()>) {
    tokio::select! {
        _ = work => {}
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("shutdown requested"),
            Err(err) => warn!(error = %err, "could not listen for shutdown signal"),
        },
    }
}

fn print_pass(kind: &str, report: &PassReport) {
    let names = |domains: &[Domain]| {
        domains
            .iter()
            .map(|d| d.as_str())
            .collect::<Vec<_>>()
            .join(",")
    };
    println!(
        "{kind} pass: completed=[{}] skipped=[{}] failed={}",
        names(&report.completed),
        names(&report.skipped),
        report.failed.len()
    );
    for (domain, err) in &report.failed {
        eprintln!("  {domain}: {err:#}");
    }
}

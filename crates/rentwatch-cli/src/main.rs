use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rentwatch_sync::{
    export_snapshot, CycleOutcome, DeliveryStatus, SearchRun, SyncConfig, SyncPipeline, WatchConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rentwatch")]
#[command(about = "Watch rental searches and get notified about new listings")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one cycle for every enabled search, or only the named one.
    Sync {
        #[arg(long)]
        search: Option<String>,
    },
    /// Run cycles on the configured cron schedule until interrupted.
    Schedule,
    /// Summarise the persisted snapshot of a search.
    Report {
        #[arg(long)]
        search: String,
    },
    /// Write the persisted snapshot of a search to parquet.
    Export {
        #[arg(long)]
        search: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("rentwatch=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();
    let watch = WatchConfig::load(&config.config_path).await?;

    match cli.command.unwrap_or(Commands::Sync { search: None }) {
        Commands::Sync { search } => {
            let pipeline = SyncPipeline::new(config, watch)?;
            match search {
                Some(name) => {
                    let outcome = pipeline.run_search(&name).await?;
                    print_outcome(&name, &outcome);
                }
                None => {
                    let runs = pipeline.run_all().await;
                    let failed = print_runs(&runs);
                    if failed > 0 {
                        bail!("{failed} of {} searches failed", runs.len());
                    }
                }
            }
        }
        Commands::Schedule => {
            let pipeline = Arc::new(SyncPipeline::new(config, watch)?);
            let Some(mut sched) = pipeline.maybe_build_scheduler().await? else {
                bail!("scheduler disabled; set RENTWATCH_SCHEDULER_ENABLED=true");
            };
            sched.start().await.context("starting scheduler")?;
            info!("scheduler running; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Report { search } => {
            let pipeline = SyncPipeline::new(config, watch)?;
            let Some(snapshot) = pipeline.load_snapshot(&search).await? else {
                println!("{search}: no snapshot yet");
                return Ok(());
            };
            let records = &snapshot.records;
            println!(
                "{search}: records={} historical={} let_agreed={} enriched={} saved_at={} run_id={}",
                snapshot.len(),
                records.iter().filter(|r| r.historical).count(),
                records.iter().filter(|r| r.let_agreed).count(),
                records.iter().filter(|r| r.is_enriched()).count(),
                snapshot.saved_at.to_rfc3339(),
                snapshot.run_id
            );
        }
        Commands::Export { search } => {
            let export_dir = config.export_dir.clone();
            let pipeline = SyncPipeline::new(config, watch)?;
            let Some(snapshot) = pipeline.load_snapshot(&search).await? else {
                bail!("search `{search}` has no snapshot to export");
            };
            let manifest = export_snapshot(&snapshot, &export_dir, &search).await?;
            println!("export complete: manifest={}", manifest.display());
        }
    }

    Ok(())
}

fn print_outcome(search: &str, outcome: &CycleOutcome) {
    let report = outcome.report();
    let delivery = match &report.delivery {
        DeliveryStatus::Skipped => "skipped".to_string(),
        DeliveryStatus::Delivered(receipt) => format!("delivered:{}", receipt.location),
        DeliveryStatus::Failed { reason } => format!("failed:{reason}"),
    };
    let status = match outcome {
        CycleOutcome::NoActionableResults(_) => "no new results",
        CycleOutcome::Completed(_) => "completed",
    };
    println!(
        "{search}: {status} run_id={} first_run={} scraped={} records={} new={} let_agreed={} enriched={} enrich_failed={:?} notified={} delivery={delivery}",
        report.run_id,
        report.first_run,
        report.scraped,
        report.records,
        report.actionable.len(),
        report.let_agreed_transitions.len(),
        report.enrichment.enriched.len(),
        report.enrichment.failed_ids(),
        report.notified.len(),
    );
}

fn print_runs(runs: &[SearchRun]) -> usize {
    let mut failed = 0;
    for run in runs {
        match &run.outcome {
            Ok(outcome) => print_outcome(&run.search, outcome),
            Err(err) => {
                failed += 1;
                eprintln!("{}: failed: {err:#}", run.search);
            }
        }
    }
    failed
}

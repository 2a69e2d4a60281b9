//! CLI entry point: crawl, retry, validate, merge, and ingest commands.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use product_harvester::application::{reconcile, CrawlOrchestrator};
use product_harvester::domain::RunStatus;
use product_harvester::infrastructure::config::HarvesterConfig;
use product_harvester::infrastructure::fetcher::{FetchMode, FetchPolicy, HttpFetcher};
use product_harvester::infrastructure::ingest::ingest_batches;
use product_harvester::infrastructure::input::{read_failed_ids, scan_input};
use product_harvester::infrastructure::logging::init_logging;
use product_harvester::infrastructure::merge::merge_batches;
use product_harvester::infrastructure::progress::{
    LogProgressSink, ProgressSink, WebhookProgressSink,
};
use product_harvester::infrastructure::wal::{CheckpointStore, FailedIdLog};

#[derive(Parser)]
#[command(
    name = "product-harvester",
    version,
    about = "Resumable bulk product crawler with write-ahead buffering"
)]
struct Cli {
    /// Directory for log files.
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl all ids from an input CSV (resumes automatically).
    Crawl {
        /// Input CSV with an `id` column.
        #[arg(long)]
        input: PathBuf,
        /// Output directory for batch files, WAL, and failed-id log.
        #[arg(long, default_value = "data")]
        output: PathBuf,
    },
    /// Re-fetch previously failed ids with the careful fetch policy.
    Retry {
        /// Failed-id log produced by an earlier crawl.
        #[arg(long, default_value = "data/failed_products.txt")]
        log_file: PathBuf,
        #[arg(long, default_value = "data")]
        output: PathBuf,
    },
    /// Check an input CSV without fetching anything.
    Validate {
        #[arg(long)]
        input: PathBuf,
    },
    /// Merge all batch files into a single JSON array.
    Merge {
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
        #[arg(long, default_value = "all_products.json")]
        output: PathBuf,
    },
    /// Load batch files into a relational store.
    Ingest {
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
        #[arg(long, default_value = "sqlite://products.db?mode=rwc")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = HarvesterConfig::load()?;
    init_logging(&cli.log_dir)?;

    match cli.command {
        Command::Crawl { input, output } => {
            let scan = scan_input(&input)?;
            info!(
                "input scan: {} rows, {} valid unique ids, {} duplicates, {} invalid",
                scan.total_rows,
                scan.ids.len(),
                scan.duplicate_count,
                scan.invalid_count
            );
            run_crawl(&config, scan.ids, &output, FetchMode::Normal).await?;
        }
        Command::Retry { log_file, output } => {
            let ids = read_failed_ids(&log_file)?;
            if ids.is_empty() {
                info!("✅ no failed ids to retry");
                return Ok(());
            }
            info!("🔄 retrying {} failed ids in careful mode", ids.len());
            run_crawl(&config, ids, &output, FetchMode::Careful).await?;
        }
        Command::Validate { input } => {
            let scan = scan_input(&input)?;
            println!("total rows:        {}", scan.total_rows);
            println!("valid unique ids:  {}", scan.ids.len());
            println!("duplicate ids:     {}", scan.duplicate_count);
            println!("invalid ids:       {}", scan.invalid_count);
            if scan.duplicate_count > 0 {
                println!("⚠️ duplicates will be collapsed to one pending entry each");
            }
        }
        Command::Merge { data_dir, output } => {
            let count = merge_batches(&data_dir, &output)?;
            println!("merged {} records into {}", count, output.display());
        }
        Command::Ingest {
            data_dir,
            database_url,
        } => {
            let count = ingest_batches(&data_dir, &database_url).await?;
            println!("ingested {} records", count);
        }
    }

    Ok(())
}

async fn run_crawl(
    config: &HarvesterConfig,
    input_ids: Vec<String>,
    output: &Path,
    mode: FetchMode,
) -> Result<()> {
    let report = reconcile(&input_ids, output);

    let mut store = CheckpointStore::open(output, config.crawl.batch_size)?;
    let recovered = store.recover(&report.completed)?;
    if recovered > 0 {
        info!("recovered {} buffered records from a previous run", recovered);
    }
    if report.pending.is_empty() && store.buffered() == 0 {
        info!("🎉 nothing pending, all requested ids are already persisted");
        return Ok(());
    }

    let policy = FetchPolicy::from_config(mode, &config.crawl);
    let fetcher = Arc::new(HttpFetcher::new(&config.api, policy)?);

    let mut sinks: Vec<Arc<dyn ProgressSink>> = vec![Arc::new(LogProgressSink)];
    if let Some(url) = &config.webhook.url {
        sinks.push(Arc::new(WebhookProgressSink::new(
            url.clone(),
            config.webhook.notify_every_percent,
        )));
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 interrupt received, finishing in-flight work and flushing...");
            signal_cancel.cancel();
        }
    });

    let mut orchestrator = CrawlOrchestrator::new(
        fetcher,
        store,
        FailedIdLog::open(output),
        sinks,
        config.crawl.chunk_size,
        cancel,
    );

    let summary = orchestrator
        .run(
            report.pending,
            report.total_count as u64,
            report.completed_count as u64,
        )
        .await?;

    info!(
        "run {:?}: {} processed, {} ok, {} failed, {} batches in {:.1}s",
        summary.status,
        summary.processed,
        summary.succeeded,
        summary.failed,
        summary.batches_written,
        summary.elapsed.as_secs_f64()
    );

    if summary.status == RunStatus::Cancelled {
        bail!("run was interrupted; rerun the same command to resume");
    }
    Ok(())
}

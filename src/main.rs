use bse_pipeline::config::Config;
use bse_pipeline::embedder::{EmbedderExecution, NullEmbedder};
use bse_pipeline::fetcher::Fetcher;
use bse_pipeline::journal::Journal;
use bse_pipeline::orchestrator::{run_backfill, run_historical, run_live_loop, run_recheck, Pipeline};
use bse_pipeline::reference::{HttpCompanyMasterSource, ReferenceLoader};
use bse_pipeline::store::SqliteStore;
use chrono::NaiveDate;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// BSE corporate announcements ingestion worker.
#[derive(Parser, Debug)]
#[command(name = "worker")]
struct Cli {
    /// Run a one-shot historical pass instead of the live polling loop.
    #[arg(long)]
    hist: bool,

    /// Start date for --hist, YYYY-MM-DD. Defaults to the configured
    /// historical minimum.
    #[arg(long)]
    from: Option<NaiveDate>,

    /// End date for --hist, YYYY-MM-DD. Defaults to today.
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Re-fetch the last N trading days regardless of watermark state.
    #[arg(long)]
    backfill: Option<i64>,

    /// Re-divide already-categorized announcements from the last N days
    /// that have no corresponding report row.
    #[arg(long)]
    recheck: Option<i64>,

    /// Re-divide across the entire stored history instead of a window.
    #[arg(long)]
    recheck_all_history: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let store = SqliteStore::open(&config.sqlite_path)?;

    let master_source = HttpCompanyMasterSource::new(config.company_master_url.clone());
    let reference_loader = ReferenceLoader::new(master_source, config.company_master_cache_path.clone());
    let reference = reference_loader.load().await?;

    let pipeline = Pipeline {
        fetcher: Fetcher::new(&config),
        reference,
        store: store.clone(),
        journal: Journal::new(config.journal_dir.clone()),
        embedder: Arc::new(NullEmbedder::new(256)),
        execution: EmbedderExecution::cpu_default(),
        insert_batch: config.insert_batch,
        dashboard_dedup_threshold: config.dashboard_dedup_threshold,
        livesquack_threshold: config.embedding_text_threshold,
        run_interval: config.run_interval(),
        connectivity_backoff: config.connectivity_backoff(),
    };

    if let Some(days) = cli.backfill {
        run_backfill(&pipeline, days).await?;
    } else if cli.recheck.is_some() || cli.recheck_all_history {
        let since = if cli.recheck_all_history {
            None
        } else {
            let days = cli.recheck.unwrap_or(config.no_of_days_check);
            let cutoff = chrono::Utc::now().date_naive() - chrono::Duration::days(days);
            Some(format!("{} 00:00:00", cutoff.format("%Y-%m-%d")))
        };
        let candidates = store.load_report_bearing_announcements(since.as_deref())?;
        run_recheck(&pipeline, candidates).await?;
    } else if cli.hist {
        let from = cli.from.unwrap_or(config.historical_min_date);
        let to = cli.to.unwrap_or(config.historical_max_date);
        run_historical(&pipeline, from, to).await?;
    } else {
        run_live_loop(&pipeline, None).await?;
    }

    Ok(())
}

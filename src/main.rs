// src/main.rs
use anyhow::{Context, Result};
use clap::Parser;
use dedupe_lib::coordinator::{ResumeMode, RunCoordinator};
use dedupe_lib::matching::comparator::{MatchPolicy, PairwiseComparator};
use dedupe_lib::matching::external::{ExternalJudge, ExternalJudgeConfig, OllamaJudge};
use dedupe_lib::report::RunReport;
use dedupe_lib::store::{DedupStore, MemoryDedupStore, PgDedupStore, PgPopulationSource, PopulationSource};
use dedupe_lib::tracker::sync_tracker;
use dedupe_lib::utils::config::DedupConfig;
use dedupe_lib::utils::db_connect::{connect, get_pool_status};
use dedupe_lib::utils::env::load_env;
use dedupe_lib::utils::progress_bars::progress_config::ProgressConfig;
use dedupe_lib::utils::schema::ensure_schema;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable person deduplication over the crime-records population", long_about = None)]
struct Args {
    /// Minimum score for a match to appear in the report
    #[arg(long)]
    min_confidence: Option<f64>,

    /// Report only the best match per person
    #[arg(long, default_value_t = false)]
    best_only: bool,

    /// Compare non-representative cluster members too
    #[arg(long, default_value_t = false)]
    exhaustive: bool,

    /// Resume the most recent unfinished run
    #[arg(long, default_value_t = false, conflicts_with = "run_id")]
    resume: bool,

    /// Resume this specific run
    #[arg(long)]
    run_id: Option<String>,

    /// Report path (defaults to dedup_report_<run_id>.json)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Persons processed between checkpoints
    #[arg(long)]
    checkpoint_interval: Option<usize>,

    /// Decide review-band pairs from tier confidence alone
    #[arg(long, default_value_t = false)]
    no_external: bool,

    /// Keep all run state in memory; nothing is written to the database
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Do not rebuild person_deduplication_tracker after the run
    #[arg(long, default_value_t = false)]
    skip_tracker: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("Starting person deduplication");
    load_env();
    let args = Args::parse();

    let mut config = DedupConfig::from_env();
    if let Some(min_confidence) = args.min_confidence {
        config.min_confidence = min_confidence.clamp(0.0, 1.0);
    }
    if let Some(interval) = args.checkpoint_interval {
        config.checkpoint_interval = interval.max(1);
    }
    config.best_only |= args.best_only;
    config.exhaustive |= args.exhaustive;
    config.log_config();

    let progress_config = ProgressConfig::from_env();
    info!(
        "Progress tracking: enabled={}, memory={}, cache stats={}",
        progress_config.enabled, progress_config.show_memory, progress_config.show_cache_stats
    );

    let policy = MatchPolicy::from_env();
    let judge_config = ExternalJudgeConfig::from_env();
    let judge: Option<Arc<dyn ExternalJudge>> = if args.no_external || !judge_config.enabled {
        info!("External judge disabled; review-band pairs are decided by tier confidence");
        None
    } else {
        judge_config.log_config();
        Some(Arc::new(
            OllamaJudge::new(judge_config).context("Failed to initialize external judge")?,
        ))
    };
    let comparator = PairwiseComparator::new(policy, judge);

    let pool = connect().await.context("Failed to connect to database")?;
    info!("Successfully connected to the database");
    if progress_config.should_show_db_connection_stats() {
        let (connections, idle) = get_pool_status(&pool);
        info!("DB pool: {} connections ({} idle)", connections, idle);
    }

    let population: Arc<dyn PopulationSource> = Arc::new(PgPopulationSource::new(pool.clone()));
    let store: Arc<dyn DedupStore> = if args.dry_run {
        warn!("Dry run: comparisons, clusters and tracker rows stay in memory");
        Arc::new(MemoryDedupStore::new())
    } else {
        ensure_schema(&pool)
            .await
            .context("Failed to ensure deduplication schema")?;
        Arc::new(PgDedupStore::new(pool.clone()))
    };

    let mode = match (&args.run_id, args.resume) {
        (Some(run_id), _) => ResumeMode::RunId(run_id.clone()),
        (None, true) => ResumeMode::Latest,
        (None, false) => ResumeMode::New,
    };

    let best_only = config.best_only;
    let cancel = Arc::new(AtomicBool::new(false));
    let ctrl_c_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current person");
            ctrl_c_flag.store(true, Ordering::SeqCst);
        }
    });

    let coordinator = RunCoordinator::new(store.clone(), population, comparator, config)
        .with_progress(progress_config)
        .with_cancel_flag(cancel);

    let description = if args.dry_run {
        "Dry-run person deduplication"
    } else {
        "Person deduplication run"
    };
    let summary = coordinator
        .run(mode, Some(description))
        .await
        .context("Deduplication run failed")?;

    if summary.is_completed() && !args.skip_tracker {
        sync_tracker(store.as_ref(), &summary.snapshot, &summary.clusters, &summary.run)
            .await
            .context("Failed to rebuild person_deduplication_tracker")?;
    } else if !summary.is_completed() {
        info!(
            "Run {} is unfinished; tracker left untouched. Resume with --run-id {}",
            summary.run.run_id, summary.run.run_id
        );
    }

    let report = RunReport::from_summary(&summary, summary.run.min_confidence, best_only);
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(RunReport::default_path(&summary.run.run_id)));
    report.write_to(&output)?;

    info!(
        "Run {} {}: {} comparisons, {} matches, {} non-matches, {} inconclusive, {} persons with matches",
        report.run_id,
        report.status,
        report.counters.comparisons,
        report.counters.matches,
        report.counters.non_matches,
        report.counters.inconclusive,
        report.persons_with_matches
    );
    Ok(())
}

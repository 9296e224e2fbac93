// src/bin/sync_tracker.rs
// Rebuilds person_deduplication_tracker from the stored clusters of a completed run.
use anyhow::{Context, Result};
use clap::Parser;
use dedupe_lib::clustering::cluster_manager::ClusterManager;
use dedupe_lib::errors::RunError;
use dedupe_lib::models::PopulationSnapshot;
use dedupe_lib::store::{DedupStore, PgDedupStore, PgPopulationSource, PopulationSource};
use dedupe_lib::tracker::sync_tracker;
use dedupe_lib::utils::db_connect::connect;
use dedupe_lib::utils::env::load_env;
use dedupe_lib::utils::schema::ensure_schema;
use log::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Rebuild the canonical identity tracker from a completed run", long_about = None)]
struct Args {
    /// Completed run whose clusters feed the tracker
    #[arg(long)]
    run_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    load_env();
    let args = Args::parse();

    let pool = connect().await.context("Failed to connect to database")?;
    ensure_schema(&pool).await?;
    let store = PgDedupStore::new(pool.clone());

    let run = store
        .load_run(&args.run_id)
        .await?
        .ok_or_else(|| RunError::RunNotFound(args.run_id.clone()))?;

    let persons = PgPopulationSource::new(pool)
        .load_population()
        .await?;
    let snapshot = PopulationSnapshot::new(persons);
    if run.population_size != snapshot.len() || run.snapshot_digest != snapshot.digest() {
        return Err(RunError::SnapshotDrift {
            run_id: run.run_id.clone(),
            expected_size: run.population_size,
            found_size: snapshot.len(),
            expected_digest: run.snapshot_digest.clone(),
            found_digest: snapshot.digest().to_string(),
        }
        .into());
    }

    let memberships = store.load_memberships(&run.run_id).await?;
    let manager = ClusterManager::restore(snapshot.len(), &memberships);
    info!(
        "Restored {} clusters covering {} persons from run {}",
        manager.cluster_count(),
        manager.clustered_person_count(),
        run.run_id
    );

    let written = sync_tracker(&store, &snapshot, &manager, &run).await?;
    info!("person_deduplication_tracker rebuilt with {} records", written);
    Ok(())
}

// src/utils/instantiate_run.rs
use anyhow::{anyhow, Context, Result};
use log::info;
use tokio_postgres::{GenericClient, Row};

use crate::models::{RunCounters, RunMetadata, RunStatus};

const RUN_COLUMNS: &str = "run_id, population_size, snapshot_digest, min_confidence, last_processed_index, status,
    total_comparisons, cached_comparisons, total_matches, total_non_matches, total_inconclusive,
    skipped_persons, external_calls, description, started_at, updated_at, completed_at";

fn run_from_row(row: &Row) -> Result<RunMetadata> {
    let status_str: String = row.get("status");
    let status = RunStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("Unknown run status '{}'", status_str))?;
    let population_size: i64 = row.get("population_size");
    let last_processed_index: Option<i64> = row.get("last_processed_index");
    let count = |column: &str| -> u64 { row.get::<_, i64>(column).max(0) as u64 };

    Ok(RunMetadata {
        run_id: row.get("run_id"),
        population_size: population_size.max(0) as usize,
        snapshot_digest: row.get("snapshot_digest"),
        min_confidence: row.get("min_confidence"),
        last_processed_index: last_processed_index.map(|i| i.max(0) as usize),
        status,
        counters: RunCounters {
            comparisons: count("total_comparisons"),
            cached: count("cached_comparisons"),
            matches: count("total_matches"),
            non_matches: count("total_non_matches"),
            inconclusive: count("total_inconclusive"),
            skipped_persons: count("skipped_persons"),
            external_calls: count("external_calls"),
        },
        description: row.get("description"),
        started_at: row.get("started_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
    })
}

/// Inserts the single metadata row for a new run.
pub async fn create_run_record(client: &impl GenericClient, meta: &RunMetadata) -> Result<()> {
    const INSERT_SQL: &str = "
        INSERT INTO dedup_state.dedup_run (
            run_id, population_size, snapshot_digest, min_confidence, last_processed_index, status,
            description, started_at, updated_at
        )
        VALUES ($1, $2, $3, $4, NULL, 'running', $5, $6, $6)";

    client
        .execute(
            INSERT_SQL,
            &[
                &meta.run_id,
                &(meta.population_size as i64),
                &meta.snapshot_digest,
                &meta.min_confidence,
                &meta.description,
                &meta.started_at,
            ],
        )
        .await
        .context("Failed to insert dedup_run record")?;

    info!(
        "Created dedup_run record {} for {} persons",
        meta.run_id, meta.population_size
    );
    Ok(())
}

pub async fn load_run_record(client: &impl GenericClient, run_id: &str) -> Result<Option<RunMetadata>> {
    let sql = format!("SELECT {} FROM dedup_state.dedup_run WHERE run_id = $1", RUN_COLUMNS);
    let row = client
        .query_opt(sql.as_str(), &[&run_id])
        .await
        .context("Failed to load dedup_run record")?;
    row.as_ref().map(run_from_row).transpose()
}

pub async fn latest_running_run(client: &impl GenericClient) -> Result<Option<RunMetadata>> {
    let sql = format!(
        "SELECT {} FROM dedup_state.dedup_run WHERE status = 'running' ORDER BY started_at DESC LIMIT 1",
        RUN_COLUMNS
    );
    let row = client
        .query_opt(sql.as_str(), &[])
        .await
        .context("Failed to look up latest running dedup_run")?;
    row.as_ref().map(run_from_row).transpose()
}

/// Advances the checkpoint. Never moves it backwards.
pub async fn update_checkpoint(
    client: &impl GenericClient,
    run_id: &str,
    last_processed_index: usize,
    counters: &RunCounters,
) -> Result<()> {
    const UPDATE_SQL: &str = "
        UPDATE dedup_state.dedup_run SET
            last_processed_index = GREATEST(COALESCE(last_processed_index, -1), $2),
            total_comparisons = $3,
            cached_comparisons = $4,
            total_matches = $5,
            total_non_matches = $6,
            total_inconclusive = $7,
            skipped_persons = $8,
            external_calls = $9,
            updated_at = NOW()
        WHERE run_id = $1 AND status = 'running'";

    let updated = client
        .execute(
            UPDATE_SQL,
            &[
                &run_id,
                &(last_processed_index as i64),
                &(counters.comparisons as i64),
                &(counters.cached as i64),
                &(counters.matches as i64),
                &(counters.non_matches as i64),
                &(counters.inconclusive as i64),
                &(counters.skipped_persons as i64),
                &(counters.external_calls as i64),
            ],
        )
        .await
        .context("Failed to update dedup_run checkpoint")?;
    if updated != 1 {
        return Err(anyhow!("No running dedup_run {} to checkpoint", run_id));
    }
    Ok(())
}

pub async fn mark_run_completed(client: &impl GenericClient, run_id: &str) -> Result<()> {
    let updated = client
        .execute(
            "UPDATE dedup_state.dedup_run
             SET status = 'completed', completed_at = NOW(), updated_at = NOW()
             WHERE run_id = $1",
            &[&run_id],
        )
        .await
        .context("Failed to mark dedup_run completed")?;
    if updated != 1 {
        return Err(anyhow!("dedup_run {} not found", run_id));
    }
    info!("Marked dedup_run {} completed", run_id);
    Ok(())
}

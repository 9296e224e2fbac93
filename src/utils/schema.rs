// src/utils/schema.rs
use anyhow::{Context, Result};
use log::info;

use crate::utils::db_connect::PgPool;

const SCHEMA_SQL: &str = "
CREATE SCHEMA IF NOT EXISTS dedup_state;

CREATE TABLE IF NOT EXISTS dedup_state.dedup_run (
    run_id TEXT PRIMARY KEY,
    population_size BIGINT NOT NULL,
    snapshot_digest TEXT NOT NULL,
    last_processed_index BIGINT,
    status TEXT NOT NULL DEFAULT 'running' CHECK (status IN ('running', 'completed')),
    min_confidence DOUBLE PRECISION NOT NULL DEFAULT 0,
    total_comparisons BIGINT NOT NULL DEFAULT 0,
    cached_comparisons BIGINT NOT NULL DEFAULT 0,
    total_matches BIGINT NOT NULL DEFAULT 0,
    total_non_matches BIGINT NOT NULL DEFAULT 0,
    total_inconclusive BIGINT NOT NULL DEFAULT 0,
    skipped_persons BIGINT NOT NULL DEFAULT 0,
    external_calls BIGINT NOT NULL DEFAULT 0,
    description TEXT,
    started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    completed_at TIMESTAMPTZ
);
ALTER TABLE dedup_state.dedup_run
    ADD COLUMN IF NOT EXISTS min_confidence DOUBLE PRECISION NOT NULL DEFAULT 0;

CREATE TABLE IF NOT EXISTS dedup_state.person_comparison (
    person_id_1 TEXT NOT NULL,
    person_id_2 TEXT NOT NULL,
    signature_1 TEXT NOT NULL,
    signature_2 TEXT NOT NULL,
    score DOUBLE PRECISION NOT NULL,
    is_match BOOLEAN NOT NULL,
    verdict TEXT NOT NULL,
    method TEXT NOT NULL,
    details JSONB,
    run_id TEXT NOT NULL,
    completed_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (person_id_1, person_id_2, signature_1, signature_2)
);
CREATE INDEX IF NOT EXISTS idx_person_comparison_matches
    ON dedup_state.person_comparison (person_id_1, person_id_2) WHERE is_match;

CREATE TABLE IF NOT EXISTS dedup_state.provisional_comparison (
    person_id_1 TEXT NOT NULL,
    person_id_2 TEXT NOT NULL,
    signature_1 TEXT NOT NULL,
    signature_2 TEXT NOT NULL,
    score DOUBLE PRECISION NOT NULL,
    verdict TEXT NOT NULL,
    method TEXT NOT NULL,
    details JSONB,
    run_id TEXT NOT NULL,
    completed_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (person_id_1, person_id_2, signature_1, signature_2)
);
CREATE INDEX IF NOT EXISTS idx_provisional_comparison_run
    ON dedup_state.provisional_comparison (run_id);

CREATE TABLE IF NOT EXISTS dedup_state.cluster_membership (
    run_id TEXT NOT NULL REFERENCES dedup_state.dedup_run (run_id) ON DELETE CASCADE,
    person_index BIGINT NOT NULL,
    cluster_id BIGINT NOT NULL,
    is_representative BOOLEAN NOT NULL,
    joined_via TEXT,
    joined_score DOUBLE PRECISION,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (run_id, person_index)
);
CREATE INDEX IF NOT EXISTS idx_cluster_membership_cluster
    ON dedup_state.cluster_membership (run_id, cluster_id);

CREATE TABLE IF NOT EXISTS dedup_state.run_result (
    run_id TEXT NOT NULL REFERENCES dedup_state.dedup_run (run_id) ON DELETE CASCADE,
    person_index BIGINT NOT NULL,
    person_id TEXT NOT NULL,
    matched_index BIGINT NOT NULL,
    matched_person_id TEXT NOT NULL,
    score DOUBLE PRECISION NOT NULL,
    method TEXT NOT NULL,
    details JSONB,
    PRIMARY KEY (run_id, person_index, matched_index)
);

CREATE TABLE IF NOT EXISTS person_deduplication_tracker (
    id SERIAL PRIMARY KEY,
    person_fingerprint VARCHAR(64) UNIQUE NOT NULL,
    canonical_person_id TEXT NOT NULL,
    full_name VARCHAR(500),
    relative_name VARCHAR(500),
    age INTEGER,
    gender VARCHAR(20),
    phone_number VARCHAR(20),
    present_district VARCHAR(255),
    present_locality_village VARCHAR(255),
    all_person_ids TEXT[] NOT NULL,
    person_record_count INTEGER NOT NULL,
    all_accused_ids TEXT[] NOT NULL,
    all_crime_ids TEXT[] NOT NULL,
    crime_count INTEGER NOT NULL,
    crime_details JSONB NOT NULL DEFAULT '[]'::jsonb,
    name_variations TEXT[] NOT NULL,
    matching_tier INTEGER CHECK (matching_tier BETWEEN 1 AND 5),
    matching_strategy VARCHAR(100) NOT NULL,
    uses_external_judgment BOOLEAN NOT NULL DEFAULT FALSE,
    min_match_score DOUBLE PRECISION,
    avg_match_score DOUBLE PRECISION,
    confidence_score DOUBLE PRECISION NOT NULL CHECK (confidence_score BETWEEN 0 AND 1),
    confidence_level VARCHAR(20) NOT NULL,
    offender_category VARCHAR(30) NOT NULL,
    data_quality_flags JSONB NOT NULL,
    source_run_id TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
ALTER TABLE person_deduplication_tracker
    ALTER COLUMN canonical_person_id TYPE TEXT,
    ADD COLUMN IF NOT EXISTS crime_details JSONB NOT NULL DEFAULT '[]'::jsonb;
CREATE INDEX IF NOT EXISTS idx_dedup_tracker_canonical
    ON person_deduplication_tracker (canonical_person_id);
CREATE INDEX IF NOT EXISTS idx_dedup_tracker_person_ids
    ON person_deduplication_tracker USING GIN (all_person_ids);
CREATE INDEX IF NOT EXISTS idx_dedup_tracker_crime_ids
    ON person_deduplication_tracker USING GIN (all_crime_ids);
CREATE INDEX IF NOT EXISTS idx_dedup_tracker_crime_details
    ON person_deduplication_tracker USING GIN (crime_details);
";

/// Creates the state schema and the tracker table if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for ensure_schema")?;
    conn.batch_execute(SCHEMA_SQL)
        .await
        .context("Failed to create deduplication schema")?;
    info!("Deduplication schema is in place");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_ids_are_unbounded_text() {
        assert!(SCHEMA_SQL.contains("canonical_person_id TEXT NOT NULL"));
        assert!(SCHEMA_SQL.contains("ALTER COLUMN canonical_person_id TYPE TEXT"));
        assert!(!SCHEMA_SQL.contains("VARCHAR(50)"));
    }

    #[test]
    fn test_crime_details_column_is_indexed() {
        assert!(SCHEMA_SQL.contains("crime_details JSONB NOT NULL DEFAULT '[]'::jsonb"));
        assert!(SCHEMA_SQL.contains("USING GIN (crime_details)"));
    }
}

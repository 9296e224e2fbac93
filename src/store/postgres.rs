// src/store/postgres.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use postgres_types::Json;
use std::collections::HashMap;

use super::{DedupStore, PopulationSource, StoredMatch};
use crate::clustering::db as cluster_db;
use crate::errors::RunError;
use crate::models::{
    CanonicalIdentityRecord, CheckpointBatch, ClusterMembership, ComparisonLookup, ComparisonRecord,
    CrimeDetail, PairKey, Person, ResultEntry, RunMetadata,
};
use crate::tracker::db as tracker_db;
use crate::utils::db_connect::PgPool;
use crate::utils::{instantiate_run, pipeline_state};

const POPULATION_SQL: &str = "
    SELECT
        p.person_id::TEXT AS person_id,
        p.full_name,
        p.relative_name,
        p.relation_type,
        CASE WHEN p.age::TEXT ~ '^[0-9]{1,3}$' THEN p.age::TEXT::INT END AS age,
        p.gender,
        p.phone_number,
        p.present_district,
        p.present_locality_village,
        COALESCE(array_agg(DISTINCT a.accused_id::TEXT) FILTER (WHERE a.accused_id IS NOT NULL), '{}') AS accused_ids,
        COALESCE(array_agg(DISTINCT a.crime_id::TEXT) FILTER (WHERE a.crime_id IS NOT NULL), '{}') AS crime_ids,
        COALESCE(
            jsonb_agg(DISTINCT jsonb_build_object(
                'crime_id', c.crime_id::TEXT,
                'accused_id', a.accused_id::TEXT,
                'fir_num', c.fir_num::TEXT,
                'fir_reg_num', c.fir_reg_num::TEXT,
                'fir_date', c.fir_date::TEXT,
                'case_status', c.case_status::TEXT,
                'ps_name', h.ps_name::TEXT,
                'dist_name', h.dist_name::TEXT,
                'accused_code', a.accused_code::TEXT,
                'accused_type', bfa.accused_type::TEXT,
                'accused_status', bfa.status::TEXT
            )) FILTER (WHERE c.crime_id IS NOT NULL),
            '[]'::jsonb
        ) AS crime_details
    FROM persons p
    LEFT JOIN accused a ON a.person_id = p.person_id
    LEFT JOIN crimes c ON c.crime_id = a.crime_id
    LEFT JOIN hierarchy h ON h.ps_code = c.ps_code
    LEFT JOIN brief_facts_accused bfa ON bfa.accused_id = a.accused_id
    GROUP BY p.person_id, p.full_name, p.relative_name, p.relation_type, p.age, p.gender,
             p.phone_number, p.present_district, p.present_locality_village
    ORDER BY p.person_id";

/// Reads the person population joined with accused roles and their case context.
pub struct PgPopulationSource {
    pool: PgPool,
}

impl PgPopulationSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self) -> Result<Vec<Person>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for population fetch")?;
        let rows = conn
            .query(POPULATION_SQL, &[])
            .await
            .context("Failed to query persons")?;

        Ok(rows
            .iter()
            .map(|row| {
                let details: Json<Vec<CrimeDetail>> = row.get("crime_details");
                let mut crime_details = details.0;
                crime_details.sort();
                Person {
                    person_id: row.get("person_id"),
                    full_name: row.get("full_name"),
                    relative_name: row.get("relative_name"),
                    relation_type: row.get("relation_type"),
                    age: row.get("age"),
                    gender: row.get("gender"),
                    phone_number: row.get("phone_number"),
                    present_district: row.get("present_district"),
                    present_locality_village: row.get("present_locality_village"),
                    accused_ids: row.get("accused_ids"),
                    crime_ids: row.get("crime_ids"),
                    crime_details,
                }
            })
            .collect())
    }
}

#[async_trait]
impl PopulationSource for PgPopulationSource {
    async fn load_population(&self) -> Result<Vec<Person>> {
        let persons = self
            .fetch()
            .await
            .map_err(|e| RunError::PopulationFetch(format!("{:#}", e)))?;
        info!("Fetched {} persons from the population source", persons.len());
        Ok(persons)
    }
}

/// Durable run state in the `dedup_state` schema plus the public tracker table.
pub struct PgDedupStore {
    pool: PgPool,
}

impl PgDedupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DedupStore for PgDedupStore {
    async fn create_run(&self, meta: &RunMetadata) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for create_run")?;
        instantiate_run::create_run_record(&*conn, meta).await
    }

    async fn load_run(&self, run_id: &str) -> Result<Option<RunMetadata>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for load_run")?;
        instantiate_run::load_run_record(&*conn, run_id).await
    }

    async fn latest_running_run(&self) -> Result<Option<RunMetadata>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for latest_running_run")?;
        instantiate_run::latest_running_run(&*conn).await
    }

    async fn complete_run(&self, run_id: &str) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for complete_run")?;
        instantiate_run::mark_run_completed(&*conn, run_id).await
    }

    async fn lookup_comparisons(
        &self,
        run_id: &str,
        lookups: &[ComparisonLookup],
    ) -> Result<HashMap<PairKey, ComparisonRecord>> {
        if lookups.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for comparison lookup")?;
        pipeline_state::batch_lookup_comparisons(&*conn, run_id, lookups).await
    }

    async fn commit_checkpoint(&self, batch: &CheckpointBatch) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for checkpoint")?;
        let transaction = conn
            .transaction()
            .await
            .context("Failed to start checkpoint transaction")?;

        let (provisional, conclusive): (Vec<&ComparisonRecord>, Vec<&ComparisonRecord>) =
            batch.comparisons.iter().partition(|r| r.is_provisional());

        let inserted = pipeline_state::batch_insert_comparisons(&transaction, &conclusive).await?;
        pipeline_state::batch_upsert_provisional(&transaction, &provisional).await?;
        cluster_db::batch_upsert_memberships(&transaction, &batch.run_id, &batch.memberships).await?;
        cluster_db::batch_insert_results(&transaction, &batch.run_id, &batch.results).await?;
        instantiate_run::update_checkpoint(
            &transaction,
            &batch.run_id,
            batch.last_processed_index,
            &batch.counters,
        )
        .await?;

        transaction
            .commit()
            .await
            .context("Failed to commit checkpoint transaction")?;
        debug!(
            "Checkpoint {} committed for run {}: {} new comparisons, {} provisional, {} memberships, {} results",
            batch.last_processed_index,
            batch.run_id,
            inserted,
            provisional.len(),
            batch.memberships.len(),
            batch.results.len()
        );
        Ok(())
    }

    async fn load_memberships(&self, run_id: &str) -> Result<Vec<ClusterMembership>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for load_memberships")?;
        cluster_db::load_memberships(&*conn, run_id).await
    }

    async fn load_results(&self, run_id: &str) -> Result<Vec<ResultEntry>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for load_results")?;
        cluster_db::load_results(&*conn, run_id).await
    }

    async fn load_matches_among(&self, run_id: &str, person_ids: &[String]) -> Result<Vec<StoredMatch>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for load_matches_among")?;
        pipeline_state::load_matches_among(&*conn, run_id, person_ids).await
    }

    async fn replace_tracker(&self, records: &[CanonicalIdentityRecord]) -> Result<usize> {
        let mut conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for tracker rebuild")?;
        let transaction = conn
            .transaction()
            .await
            .context("Failed to start tracker transaction")?;

        let removed = tracker_db::clear_tracker(&transaction).await?;
        let inserted = tracker_db::batch_insert_tracker_records(&transaction, records).await?;

        transaction
            .commit()
            .await
            .context("Failed to commit tracker rebuild")?;
        info!(
            "Replaced person_deduplication_tracker: {} rows removed, {} rows inserted",
            removed, inserted
        );
        Ok(inserted as usize)
    }
}

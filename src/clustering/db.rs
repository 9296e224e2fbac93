// src/clustering/db.rs
use anyhow::{Context, Result};
use log::{debug, warn};
use serde_json::{json, Value as JsonValue};
use postgres_types::{Json, ToSql};
use tokio_postgres::GenericClient;

use crate::models::{ClusterMembership, ComparisonMethod, ResultEntry};
use crate::utils::pipeline_state::BATCH_DB_OPS_SIZE;

/// Upserts membership rows keyed by (run, person index).
pub async fn batch_upsert_memberships(
    client: &impl GenericClient,
    run_id: &str,
    memberships: &[ClusterMembership],
) -> Result<u64> {
    let mut written = 0;
    for chunk in memberships.chunks(BATCH_DB_OPS_SIZE) {
        let mut values_clause_parts = Vec::with_capacity(chunk.len());
        let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::with_capacity(chunk.len() * 6);
        let mut param_idx = 1;

        for m in chunk {
            values_clause_parts.push(format!(
                "(${}, ${}, ${}, ${}, ${}, ${}, NOW())",
                param_idx,
                param_idx + 1,
                param_idx + 2,
                param_idx + 3,
                param_idx + 4,
                param_idx + 5
            ));
            params.push(Box::new(run_id.to_string()));
            params.push(Box::new(m.person_index as i64));
            params.push(Box::new(m.cluster_id));
            params.push(Box::new(m.is_representative));
            params.push(Box::new(m.joined_via.map(|j| j.as_str().to_string())));
            params.push(Box::new(m.joined_score));
            param_idx += 6;
        }

        let upsert_sql = format!(
            "INSERT INTO dedup_state.cluster_membership (
                run_id, person_index, cluster_id, is_representative, joined_via, joined_score, updated_at
             ) VALUES {}
             ON CONFLICT (run_id, person_index)
             DO UPDATE SET
                cluster_id = EXCLUDED.cluster_id,
                is_representative = EXCLUDED.is_representative,
                joined_via = EXCLUDED.joined_via,
                joined_score = EXCLUDED.joined_score,
                updated_at = NOW()",
            values_clause_parts.join(", ")
        );
        let params_slice: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        written += client
            .execute(upsert_sql.as_str(), params_slice.as_slice())
            .await
            .context("Failed to batch upsert dedup_state.cluster_membership")?;
    }
    debug!("Upserted {} cluster memberships for run {}", written, run_id);
    Ok(written)
}

pub async fn load_memberships(client: &impl GenericClient, run_id: &str) -> Result<Vec<ClusterMembership>> {
    let rows = client
        .query(
            "SELECT person_index, cluster_id, is_representative, joined_via, joined_score
             FROM dedup_state.cluster_membership
             WHERE run_id = $1
             ORDER BY person_index",
            &[&run_id],
        )
        .await
        .context("Failed to load cluster memberships")?;

    Ok(rows
        .iter()
        .map(|row| {
            let person_index: i64 = row.get("person_index");
            let joined_via: Option<String> = row.get("joined_via");
            ClusterMembership {
                person_index: person_index.max(0) as usize,
                cluster_id: row.get("cluster_id"),
                is_representative: row.get("is_representative"),
                joined_via: joined_via.as_deref().and_then(ComparisonMethod::parse),
                joined_score: row.get("joined_score"),
            }
        })
        .collect())
}

/// Appends result-map entries; re-submitted entries are ignored.
pub async fn batch_insert_results(
    client: &impl GenericClient,
    run_id: &str,
    results: &[ResultEntry],
) -> Result<u64> {
    let mut written = 0;
    for chunk in results.chunks(BATCH_DB_OPS_SIZE) {
        let mut values_clause_parts = Vec::with_capacity(chunk.len());
        let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::with_capacity(chunk.len() * 8);
        let mut param_idx = 1;

        for entry in chunk {
            values_clause_parts.push(format!(
                "(${}, ${}, ${}, ${}, ${}, ${}, ${}, ${})",
                param_idx,
                param_idx + 1,
                param_idx + 2,
                param_idx + 3,
                param_idx + 4,
                param_idx + 5,
                param_idx + 6,
                param_idx + 7
            ));
            params.push(Box::new(run_id.to_string()));
            params.push(Box::new(entry.person_index as i64));
            params.push(Box::new(entry.person_id.clone()));
            params.push(Box::new(entry.matched_index as i64));
            params.push(Box::new(entry.matched_person_id.clone()));
            params.push(Box::new(entry.score));
            params.push(Box::new(entry.method.as_str().to_string()));
            params.push(Box::new(Json(entry.details.clone())));
            param_idx += 8;
        }

        let insert_sql = format!(
            "INSERT INTO dedup_state.run_result (
                run_id, person_index, person_id, matched_index, matched_person_id, score, method, details
             ) VALUES {}
             ON CONFLICT (run_id, person_index, matched_index) DO NOTHING",
            values_clause_parts.join(", ")
        );
        let params_slice: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        written += client
            .execute(insert_sql.as_str(), params_slice.as_slice())
            .await
            .context("Failed to batch insert dedup_state.run_result")?;
    }
    Ok(written)
}

pub async fn load_results(client: &impl GenericClient, run_id: &str) -> Result<Vec<ResultEntry>> {
    let rows = client
        .query(
            "SELECT person_index, person_id, matched_index, matched_person_id, score, method, details
             FROM dedup_state.run_result
             WHERE run_id = $1
             ORDER BY person_index, matched_index",
            &[&run_id],
        )
        .await
        .context("Failed to load run results")?;

    let mut results = Vec::with_capacity(rows.len());
    for row in &rows {
        let method_str: String = row.get("method");
        let Some(method) = ComparisonMethod::parse(&method_str) else {
            warn!("Skipping run result with unknown method '{}'", method_str);
            continue;
        };
        let person_index: i64 = row.get("person_index");
        let matched_index: i64 = row.get("matched_index");
        let details: Option<Json<JsonValue>> = row.get("details");
        results.push(ResultEntry {
            person_index: person_index.max(0) as usize,
            person_id: row.get("person_id"),
            matched_index: matched_index.max(0) as usize,
            matched_person_id: row.get("matched_person_id"),
            score: row.get("score"),
            method,
            details: details.map(|j| j.0).unwrap_or_else(|| json!({})),
        });
    }
    Ok(results)
}

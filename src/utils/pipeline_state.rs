// src/utils/pipeline_state.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use tokio_postgres::types::{Json, ToSql};
use tokio_postgres::{GenericClient, Row};

use crate::models::{ComparisonLookup, ComparisonMethod, ComparisonRecord, PairKey, Verdict};
use crate::store::{durable_key, DurableKey, StoredMatch};

/// Rows per multi-row INSERT; keeps parameter counts far below the protocol limit.
pub const BATCH_DB_OPS_SIZE: usize = 500;

struct StoredOutcome {
    score: f64,
    verdict: Verdict,
    method: ComparisonMethod,
    details: JsonValue,
    run_id: String,
    completed_at: DateTime<Utc>,
}

fn key_from_row(row: &Row) -> DurableKey {
    (
        row.get("person_id_1"),
        row.get("person_id_2"),
        row.get("signature_1"),
        row.get("signature_2"),
    )
}

fn outcome_from_row(row: &Row) -> Option<StoredOutcome> {
    let method_str: String = row.get("method");
    let Some(method) = ComparisonMethod::parse(&method_str) else {
        warn!("Ignoring stored comparison with unknown method '{}'", method_str);
        return None;
    };
    let verdict_str: String = row.get("verdict");
    let Some(verdict) = Verdict::parse(&verdict_str) else {
        warn!("Ignoring stored comparison with unknown verdict '{}'", verdict_str);
        return None;
    };
    let details: Option<Json<JsonValue>> = row.get("details");
    Some(StoredOutcome {
        score: row.get("score"),
        verdict,
        method,
        details: details.map(|j| j.0).unwrap_or_else(|| json!({})),
        run_id: row.get("run_id"),
        completed_at: row.get("completed_at"),
    })
}

fn rehydrate(outcome: StoredOutcome, lookup: &ComparisonLookup) -> ComparisonRecord {
    ComparisonRecord {
        index_1: lookup.key.low,
        index_2: lookup.key.high,
        person_id_1: lookup.person_id_1.clone(),
        person_id_2: lookup.person_id_2.clone(),
        signature_1: lookup.signature_1.clone(),
        signature_2: lookup.signature_2.clone(),
        score: outcome.score,
        verdict: outcome.verdict,
        method: outcome.method,
        details: outcome.details,
        run_id: outcome.run_id,
        completed_at: outcome.completed_at,
    }
}

/// Looks up stored outcomes for a batch of pairs. Conclusive outcomes from any run are
/// returned; provisional ones only if `run_id` recorded them.
pub async fn batch_lookup_comparisons(
    client: &impl GenericClient,
    run_id: &str,
    lookups: &[ComparisonLookup],
) -> Result<HashMap<PairKey, ComparisonRecord>> {
    let mut found = HashMap::new();
    if lookups.is_empty() {
        return Ok(found);
    }

    let mut wanted: HashMap<DurableKey, &ComparisonLookup> = HashMap::with_capacity(lookups.len());
    let (mut p1, mut p2, mut s1, mut s2) = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
    for lookup in lookups {
        let key = durable_key(
            &lookup.person_id_1,
            &lookup.person_id_2,
            &lookup.signature_1,
            &lookup.signature_2,
        );
        p1.push(key.0.clone());
        p2.push(key.1.clone());
        s1.push(key.2.clone());
        s2.push(key.3.clone());
        wanted.insert(key, lookup);
    }

    const CONCLUSIVE_SQL: &str = "
        SELECT c.person_id_1, c.person_id_2, c.signature_1, c.signature_2,
               c.score, c.verdict, c.method, c.details, c.run_id, c.completed_at
        FROM dedup_state.person_comparison c
        JOIN UNNEST($1::TEXT[], $2::TEXT[], $3::TEXT[], $4::TEXT[]) AS w(p1, p2, s1, s2)
          ON c.person_id_1 = w.p1 AND c.person_id_2 = w.p2
         AND c.signature_1 = w.s1 AND c.signature_2 = w.s2";
    let rows = client
        .query(CONCLUSIVE_SQL, &[&p1, &p2, &s1, &s2])
        .await
        .context("Failed to query dedup_state.person_comparison")?;
    for row in &rows {
        let key = key_from_row(row);
        if let (Some(lookup), Some(outcome)) = (wanted.get(&key), outcome_from_row(row)) {
            found.insert(lookup.key, rehydrate(outcome, lookup));
        }
    }

    if found.len() < lookups.len() {
        const PROVISIONAL_SQL: &str = "
            SELECT v.person_id_1, v.person_id_2, v.signature_1, v.signature_2,
                   v.score, v.verdict, v.method, v.details, v.run_id, v.completed_at
            FROM dedup_state.provisional_comparison v
            JOIN UNNEST($1::TEXT[], $2::TEXT[], $3::TEXT[], $4::TEXT[]) AS w(p1, p2, s1, s2)
              ON v.person_id_1 = w.p1 AND v.person_id_2 = w.p2
             AND v.signature_1 = w.s1 AND v.signature_2 = w.s2
            WHERE v.run_id = $5";
        let rows = client
            .query(PROVISIONAL_SQL, &[&p1, &p2, &s1, &s2, &run_id])
            .await
            .context("Failed to query dedup_state.provisional_comparison")?;
        for row in &rows {
            let key = key_from_row(row);
            if let Some(lookup) = wanted.get(&key) {
                if found.contains_key(&lookup.key) {
                    continue;
                }
                if let Some(outcome) = outcome_from_row(row) {
                    found.insert(lookup.key, rehydrate(outcome, lookup));
                }
            }
        }
    }

    debug!(
        "Comparison store lookup: {} of {} pairs found",
        found.len(),
        lookups.len()
    );
    Ok(found)
}

/// Inserts conclusive comparisons (existing rows win) and clears any provisional rows they resolve.
pub async fn batch_insert_comparisons(
    client: &impl GenericClient,
    records: &[&ComparisonRecord],
) -> Result<u64> {
    let mut inserted = 0;
    for chunk in records.chunks(BATCH_DB_OPS_SIZE) {
        let mut values_clause_parts = Vec::with_capacity(chunk.len());
        let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::with_capacity(chunk.len() * 11);
        let mut param_idx = 1;
        let (mut p1, mut p2, mut s1, mut s2) = (Vec::new(), Vec::new(), Vec::new(), Vec::new());

        for record in chunk {
            let key = durable_key(
                &record.person_id_1,
                &record.person_id_2,
                &record.signature_1,
                &record.signature_2,
            );
            values_clause_parts.push(format!(
                "(${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${})",
                param_idx,
                param_idx + 1,
                param_idx + 2,
                param_idx + 3,
                param_idx + 4,
                param_idx + 5,
                param_idx + 6,
                param_idx + 7,
                param_idx + 8,
                param_idx + 9,
                param_idx + 10
            ));
            p1.push(key.0.clone());
            p2.push(key.1.clone());
            s1.push(key.2.clone());
            s2.push(key.3.clone());
            params.push(Box::new(key.0));
            params.push(Box::new(key.1));
            params.push(Box::new(key.2));
            params.push(Box::new(key.3));
            params.push(Box::new(record.score));
            params.push(Box::new(record.is_match()));
            params.push(Box::new(record.verdict.as_str().to_string()));
            params.push(Box::new(record.method.as_str().to_string()));
            params.push(Box::new(Json(record.details.clone())));
            params.push(Box::new(record.run_id.clone()));
            params.push(Box::new(record.completed_at));
            param_idx += 11;
        }

        let insert_sql = format!(
            "INSERT INTO dedup_state.person_comparison (
                person_id_1, person_id_2, signature_1, signature_2,
                score, is_match, verdict, method, details, run_id, completed_at
             ) VALUES {}
             ON CONFLICT (person_id_1, person_id_2, signature_1, signature_2) DO NOTHING",
            values_clause_parts.join(", ")
        );
        let params_slice: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        inserted += client
            .execute(insert_sql.as_str(), params_slice.as_slice())
            .await
            .context("Failed to batch insert into dedup_state.person_comparison")?;

        client
            .execute(
                "DELETE FROM dedup_state.provisional_comparison v
                 USING UNNEST($1::TEXT[], $2::TEXT[], $3::TEXT[], $4::TEXT[]) AS w(p1, p2, s1, s2)
                 WHERE v.person_id_1 = w.p1 AND v.person_id_2 = w.p2
                   AND v.signature_1 = w.s1 AND v.signature_2 = w.s2",
                &[&p1, &p2, &s1, &s2],
            )
            .await
            .context("Failed to clear resolved provisional comparisons")?;
    }

    debug!("Batch stored {} new comparisons ({} submitted)", inserted, records.len());
    Ok(inserted)
}

/// Records run-scoped outcomes (judge failures, judge-less decisions); a later attempt for the
/// same pair replaces the row.
pub async fn batch_upsert_provisional(
    client: &impl GenericClient,
    records: &[&ComparisonRecord],
) -> Result<u64> {
    let mut written = 0;
    for chunk in records.chunks(BATCH_DB_OPS_SIZE) {
        let mut values_clause_parts = Vec::with_capacity(chunk.len());
        let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::with_capacity(chunk.len() * 10);
        let mut param_idx = 1;

        for record in chunk {
            let key = durable_key(
                &record.person_id_1,
                &record.person_id_2,
                &record.signature_1,
                &record.signature_2,
            );
            values_clause_parts.push(format!(
                "(${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${})",
                param_idx,
                param_idx + 1,
                param_idx + 2,
                param_idx + 3,
                param_idx + 4,
                param_idx + 5,
                param_idx + 6,
                param_idx + 7,
                param_idx + 8,
                param_idx + 9
            ));
            params.push(Box::new(key.0));
            params.push(Box::new(key.1));
            params.push(Box::new(key.2));
            params.push(Box::new(key.3));
            params.push(Box::new(record.score));
            params.push(Box::new(record.verdict.as_str().to_string()));
            params.push(Box::new(record.method.as_str().to_string()));
            params.push(Box::new(Json(record.details.clone())));
            params.push(Box::new(record.run_id.clone()));
            params.push(Box::new(record.completed_at));
            param_idx += 10;
        }

        let upsert_sql = format!(
            "INSERT INTO dedup_state.provisional_comparison (
                person_id_1, person_id_2, signature_1, signature_2,
                score, verdict, method, details, run_id, completed_at
             ) VALUES {}
             ON CONFLICT (person_id_1, person_id_2, signature_1, signature_2)
             DO UPDATE SET
                score = EXCLUDED.score,
                verdict = EXCLUDED.verdict,
                method = EXCLUDED.method,
                details = EXCLUDED.details,
                run_id = EXCLUDED.run_id,
                completed_at = EXCLUDED.completed_at",
            values_clause_parts.join(", ")
        );
        let params_slice: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        written += client
            .execute(upsert_sql.as_str(), params_slice.as_slice())
            .await
            .context("Failed to batch upsert into dedup_state.provisional_comparison")?;
    }
    Ok(written)
}

/// Conclusive matches whose both endpoints are among `person_ids`, plus the provisional
/// matches `run_id` recorded between them.
pub async fn load_matches_among(
    client: &impl GenericClient,
    run_id: &str,
    person_ids: &[String],
) -> Result<Vec<StoredMatch>> {
    if person_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = client
        .query(
            "SELECT person_id_1, person_id_2, signature_1, signature_2
             FROM dedup_state.person_comparison
             WHERE is_match AND person_id_1 = ANY($1) AND person_id_2 = ANY($1)
             UNION
             SELECT person_id_1, person_id_2, signature_1, signature_2
             FROM dedup_state.provisional_comparison
             WHERE verdict = 'match' AND run_id = $2
               AND person_id_1 = ANY($1) AND person_id_2 = ANY($1)
             ORDER BY person_id_1, person_id_2",
            &[&person_ids, &run_id],
        )
        .await
        .context("Failed to load recorded matches")?;
    Ok(rows
        .iter()
        .map(|row| StoredMatch {
            person_id_1: row.get("person_id_1"),
            person_id_2: row.get("person_id_2"),
            signature_1: row.get("signature_1"),
            signature_2: row.get("signature_2"),
        })
        .collect())
}

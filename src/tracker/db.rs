// src/tracker/db.rs
use anyhow::{Context, Result};
use log::debug;
use postgres_types::{Json, ToSql};
use tokio_postgres::GenericClient;

use crate::models::CanonicalIdentityRecord;

const TRACKER_COLUMNS: usize = 26;
const TRACKER_BATCH_SIZE: usize = 500;

pub async fn clear_tracker(client: &impl GenericClient) -> Result<u64> {
    client
        .execute("DELETE FROM person_deduplication_tracker", &[])
        .await
        .context("Failed to clear person_deduplication_tracker")
}

pub async fn batch_insert_tracker_records(
    client: &impl GenericClient,
    records: &[CanonicalIdentityRecord],
) -> Result<u64> {
    let mut inserted = 0;
    for chunk in records.chunks(TRACKER_BATCH_SIZE) {
        let mut values_clause_parts = Vec::with_capacity(chunk.len());
        let mut params: Vec<Box<dyn ToSql + Sync + Send>> =
            Vec::with_capacity(chunk.len() * TRACKER_COLUMNS);

        for (row, r) in chunk.iter().enumerate() {
            let base = row * TRACKER_COLUMNS;
            let placeholders: Vec<String> = (1..=TRACKER_COLUMNS)
                .map(|offset| format!("${}", base + offset))
                .collect();
            values_clause_parts.push(format!("({})", placeholders.join(", ")));

            params.push(Box::new(r.person_fingerprint.clone()));
            params.push(Box::new(r.canonical_person_id.clone()));
            params.push(Box::new(r.full_name.clone()));
            params.push(Box::new(r.relative_name.clone()));
            params.push(Box::new(r.age));
            params.push(Box::new(r.gender.clone()));
            params.push(Box::new(r.phone_number.clone()));
            params.push(Box::new(r.present_district.clone()));
            params.push(Box::new(r.present_locality_village.clone()));
            params.push(Box::new(r.all_person_ids.clone()));
            params.push(Box::new(r.person_record_count));
            params.push(Box::new(r.all_accused_ids.clone()));
            params.push(Box::new(r.all_crime_ids.clone()));
            params.push(Box::new(r.crime_count));
            params.push(Box::new(Json(r.crime_details.clone())));
            params.push(Box::new(r.name_variations.clone()));
            params.push(Box::new(r.matching_tier));
            params.push(Box::new(r.matching_strategy.clone()));
            params.push(Box::new(r.uses_external_judgment));
            params.push(Box::new(r.min_match_score));
            params.push(Box::new(r.avg_match_score));
            params.push(Box::new(r.confidence_score));
            params.push(Box::new(r.confidence_level.clone()));
            params.push(Box::new(r.offender_category.clone()));
            params.push(Box::new(Json(r.data_quality_flags.clone())));
            params.push(Box::new(r.source_run_id.clone()));
        }

        let insert_sql = format!(
            "INSERT INTO person_deduplication_tracker (
                person_fingerprint, canonical_person_id, full_name, relative_name, age, gender,
                phone_number, present_district, present_locality_village, all_person_ids,
                person_record_count, all_accused_ids, all_crime_ids, crime_count, crime_details,
                name_variations,
                matching_tier, matching_strategy, uses_external_judgment, min_match_score,
                avg_match_score, confidence_score, confidence_level, offender_category,
                data_quality_flags, source_run_id
             ) VALUES {}",
            values_clause_parts.join(", ")
        );
        let params_slice: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        inserted += client
            .execute(insert_sql.as_str(), params_slice.as_slice())
            .await
            .context("Failed to batch insert person_deduplication_tracker")?;
        debug!("Inserted tracker batch of {} records", chunk.len());
    }
    Ok(inserted)
}

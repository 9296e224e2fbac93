// src/models/tracker.rs
use serde::{Deserialize, Serialize};

use crate::models::person::CrimeDetail;

/// One row of the canonical identity table: a final cluster or a singleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalIdentityRecord {
    pub person_fingerprint: String,
    pub canonical_person_id: String,
    pub full_name: Option<String>,
    pub relative_name: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub phone_number: Option<String>,
    pub present_district: Option<String>,
    pub present_locality_village: Option<String>,
    pub all_person_ids: Vec<String>,
    pub person_record_count: i32,
    pub all_accused_ids: Vec<String>,
    pub all_crime_ids: Vec<String>,
    pub crime_count: i32,
    /// Case context across all members, deduplicated, oldest FIR first.
    pub crime_details: Vec<CrimeDetail>,
    pub name_variations: Vec<String>,
    pub matching_tier: Option<i32>,
    pub matching_strategy: String,
    pub uses_external_judgment: bool,
    pub min_match_score: Option<f64>,
    pub avg_match_score: Option<f64>,
    pub confidence_score: f64,
    pub confidence_level: String,
    pub offender_category: String,
    pub data_quality_flags: DataQualityFlags,
    pub source_run_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityFlags {
    pub has_phone: bool,
    pub has_parent_name: bool,
    pub has_locality: bool,
    pub has_age: bool,
    pub has_gender: bool,
    pub completeness_percent: f64,
}

// src/matching/similarity.rs
//! Local fuzzy similarity. Feeds the justification attached to every comparison and the
//! context handed to the external judge; it never decides a match on its own.
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strsim::{jaro_winkler, normalized_levenshtein, sorensen_dice};

use crate::matching::fingerprint::{normalize_gender, normalize_name, normalize_phone};
use crate::models::person::Person;

const LEVENSHTEIN_WEIGHT: f64 = 0.25;
const JARO_WINKLER_WEIGHT: f64 = 0.25;
const TOKEN_OVERLAP_WEIGHT: f64 = 0.20;
const JACCARD_WEIGHT: f64 = 0.15;
const SORENSEN_WEIGHT: f64 = 0.15;

const NAME_WEIGHT: f64 = 0.50;
const RELATIVE_WEIGHT: f64 = 0.30;
const GENDER_WEIGHT: f64 = 0.10;
const LOCALITY_WEIGHT: f64 = 0.10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityBreakdown {
    pub full_name: f64,
    pub relative_name: f64,
    pub gender: f64,
    pub locality: f64,
    pub age_gap: Option<i32>,
    pub phone_agrees: Option<bool>,
    pub overall: f64,
}

fn token_sets(a: &str, b: &str) -> (HashSet<String>, HashSet<String>) {
    (
        a.split_whitespace().map(str::to_string).collect(),
        b.split_whitespace().map(str::to_string).collect(),
    )
}

/// Weighted blend of edit-distance and token-set measures over normalized names, in [0, 1].
pub fn ensemble_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_name(a);
    let b = normalize_name(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let (tokens_a, tokens_b) = token_sets(&a, &b);
    let shared = tokens_a.intersection(&tokens_b).count() as f64;
    let union = tokens_a.union(&tokens_b).count() as f64;
    let smaller = tokens_a.len().min(tokens_b.len()) as f64;

    let token_overlap = if smaller > 0.0 { shared / smaller } else { 0.0 };
    let jaccard = if union > 0.0 { shared / union } else { 0.0 };

    normalized_levenshtein(&a, &b) * LEVENSHTEIN_WEIGHT
        + jaro_winkler(&a, &b) * JARO_WINKLER_WEIGHT
        + token_overlap * TOKEN_OVERLAP_WEIGHT
        + jaccard * JACCARD_WEIGHT
        + sorensen_dice(&a, &b) * SORENSEN_WEIGHT
}

fn gender_score(a: Option<&str>, b: Option<&str>) -> f64 {
    match (a.and_then(normalize_gender), b.and_then(normalize_gender)) {
        (None, None) => 0.5,
        (Some(_), None) | (None, Some(_)) => 0.3,
        (Some(x), Some(y)) if x == y => 1.0,
        _ => 0.0,
    }
}

fn optional_similarity(a: Option<&str>, b: Option<&str>) -> f64 {
    ensemble_similarity(a.unwrap_or(""), b.unwrap_or(""))
}

pub fn compare_persons(a: &Person, b: &Person) -> SimilarityBreakdown {
    let full_name = optional_similarity(a.full_name.as_deref(), b.full_name.as_deref());
    let relative_name = optional_similarity(a.relative_name.as_deref(), b.relative_name.as_deref());
    let gender = gender_score(a.gender.as_deref(), b.gender.as_deref());
    let locality = optional_similarity(
        a.present_locality_village.as_deref(),
        b.present_locality_village.as_deref(),
    );

    let age_gap = match (a.age, b.age) {
        (Some(x), Some(y)) => Some((x - y).abs()),
        _ => None,
    };
    let phone_agrees = match (a.phone_number.as_deref(), b.phone_number.as_deref()) {
        (Some(x), Some(y)) => {
            let (x, y) = (normalize_phone(x), normalize_phone(y));
            if x.is_empty() || y.is_empty() {
                None
            } else {
                Some(x == y)
            }
        }
        _ => None,
    };

    let overall = full_name * NAME_WEIGHT
        + relative_name * RELATIVE_WEIGHT
        + gender * GENDER_WEIGHT
        + locality * LOCALITY_WEIGHT;

    SimilarityBreakdown {
        full_name: round3(full_name),
        relative_name: round3(relative_name),
        gender: round3(gender),
        locality: round3(locality),
        age_gap,
        phone_agrees,
        overall: round3(overall),
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

// src/report.rs
use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::Path;

use crate::coordinator::RunSummary;
use crate::models::stats_models::{CacheStats, ClosureAudit};
use crate::models::{ResultEntry, RunCounters};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedMatch {
    pub matched_person_id: String,
    pub matched_index: usize,
    pub score: f64,
    pub method: String,
    pub details: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: String,
    pub resumed: bool,
    pub population_size: usize,
    pub min_confidence: f64,
    pub best_only: bool,
    pub counters: RunCounters,
    pub cache: CacheStats,
    pub persons_with_matches: usize,
    pub closure_audit: Option<ClosureAudit>,
    pub elapsed_seconds: f64,
    /// Person id to its qualifying matches, best score first.
    pub matches: BTreeMap<String, Vec<ReportedMatch>>,
}

/// Groups qualifying entries by person. With `best_only` each person keeps its top score;
/// ties go to the lower matched index.
pub fn qualifying_matches(
    results: &[ResultEntry],
    min_confidence: f64,
    best_only: bool,
) -> BTreeMap<String, Vec<ReportedMatch>> {
    let mut by_person: BTreeMap<String, Vec<&ResultEntry>> = BTreeMap::new();
    for entry in results.iter().filter(|e| e.score >= min_confidence) {
        by_person.entry(entry.person_id.clone()).or_default().push(entry);
    }

    by_person
        .into_iter()
        .map(|(person_id, mut entries)| {
            entries.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then(a.matched_index.cmp(&b.matched_index))
            });
            if best_only {
                entries.truncate(1);
            }
            let matches = entries
                .into_iter()
                .map(|e| ReportedMatch {
                    matched_person_id: e.matched_person_id.clone(),
                    matched_index: e.matched_index,
                    score: e.score,
                    method: e.method.as_str().to_string(),
                    details: e.details.clone(),
                })
                .collect();
            (person_id, matches)
        })
        .collect()
}

impl RunReport {
    pub fn from_summary(summary: &RunSummary, min_confidence: f64, best_only: bool) -> Self {
        let matches = qualifying_matches(&summary.results, min_confidence, best_only);
        Self {
            run_id: summary.run.run_id.clone(),
            status: summary.run.status.as_str().to_string(),
            resumed: summary.resumed,
            population_size: summary.snapshot.len(),
            min_confidence,
            best_only,
            counters: summary.run.counters,
            cache: summary.cache_stats,
            persons_with_matches: matches.len(),
            closure_audit: summary.audit.clone(),
            elapsed_seconds: summary.elapsed_secs,
            matches,
        }
    }

    pub fn default_path(run_id: &str) -> String {
        format!("dedup_report_{}.json", run_id)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run report to {}", path.display()))?;
        info!(
            "Wrote report for run {} to {} ({} persons with matches)",
            self.run_id,
            path.display(),
            self.persons_with_matches
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ComparisonMethod;
    use serde_json::json;

    fn entry(person: usize, matched: usize, score: f64) -> ResultEntry {
        ResultEntry {
            person_index: person,
            person_id: format!("P{}", person),
            matched_index: matched,
            matched_person_id: format!("P{}", matched),
            score,
            method: ComparisonMethod::Tier(2),
            details: json!({ "tier": 2 }),
        }
    }

    #[test]
    fn test_threshold_and_ordering() {
        let results = vec![entry(0, 1, 0.9), entry(0, 2, 0.95), entry(0, 3, 0.6), entry(4, 5, 0.7)];
        let matches = qualifying_matches(&results, 0.65, false);

        assert_eq!(matches.len(), 2);
        let p0: Vec<usize> = matches["P0"].iter().map(|m| m.matched_index).collect();
        assert_eq!(p0, vec![2, 1]);
        assert_eq!(matches["P4"][0].method, "tier2");
    }

    #[test]
    fn test_best_only_keeps_top_score() {
        let results = vec![entry(0, 1, 0.9), entry(0, 2, 0.95), entry(0, 3, 0.95)];
        let matches = qualifying_matches(&results, 0.0, true);
        assert_eq!(matches["P0"].len(), 1);
        assert_eq!(matches["P0"][0].matched_person_id, "P2");
    }

    #[test]
    fn test_nothing_qualifies() {
        let results = vec![entry(0, 1, 0.5)];
        assert!(qualifying_matches(&results, 0.8, false).is_empty());
    }

    #[test]
    fn test_report_serializes() {
        let report = RunReport {
            run_id: "r1".to_string(),
            status: "completed".to_string(),
            resumed: false,
            population_size: 3,
            min_confidence: 0.5,
            best_only: false,
            counters: RunCounters::default(),
            cache: CacheStats::default(),
            persons_with_matches: 1,
            closure_audit: None,
            elapsed_seconds: 1.5,
            matches: qualifying_matches(&[entry(0, 1, 0.9)], 0.5, false),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["matches"]["P0"][0]["matched_person_id"], "P1");
        assert_eq!(value["counters"]["comparisons"], 0);
        assert_eq!(RunReport::default_path("r1"), "dedup_report_r1.json");
    }
}

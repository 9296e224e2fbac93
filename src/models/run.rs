// src/models/run.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::models::cluster::ClusterMembership;
use crate::models::comparison::{ComparisonMethod, ComparisonRecord, PersonIndex, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            _ => None,
        }
    }
}

/// Cumulative outcome counters, persisted with every checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub comparisons: u64,
    /// Pairs resolved from an earlier stored outcome instead of a fresh comparison.
    pub cached: u64,
    pub matches: u64,
    pub non_matches: u64,
    pub inconclusive: u64,
    pub skipped_persons: u64,
    pub external_calls: u64,
}

impl RunCounters {
    pub fn record(&mut self, record: &ComparisonRecord, from_cache: bool) {
        self.comparisons += 1;
        if from_cache {
            self.cached += 1;
        }
        match record.verdict {
            Verdict::Match => self.matches += 1,
            Verdict::NoMatch => self.non_matches += 1,
            Verdict::Inconclusive => self.inconclusive += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub population_size: usize,
    pub snapshot_digest: String,
    /// Result threshold fixed when the run is created; resumes keep it.
    pub min_confidence: f64,
    /// Resume checkpoint. `None` until the first checkpoint commits.
    pub last_processed_index: Option<PersonIndex>,
    pub status: RunStatus,
    pub counters: RunCounters,
    pub description: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunMetadata {
    pub fn new(
        run_id: &str,
        population_size: usize,
        snapshot_digest: &str,
        description: Option<&str>,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            population_size,
            snapshot_digest: snapshot_digest.to_string(),
            min_confidence: 0.0,
            last_processed_index: None,
            status: RunStatus::Running,
            counters: RunCounters::default(),
            description: description.map(|s| s.to_string()),
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// First index the scan still has to process.
    pub fn next_index(&self) -> PersonIndex {
        self.last_processed_index.map(|i| i + 1).unwrap_or(0)
    }
}

/// One qualifying match appended to a person's entry in the run's result map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub person_index: PersonIndex,
    pub person_id: String,
    pub matched_index: PersonIndex,
    pub matched_person_id: String,
    pub score: f64,
    pub method: ComparisonMethod,
    pub details: JsonValue,
}

/// Everything a checkpoint makes durable, committed as one unit.
#[derive(Debug, Clone)]
pub struct CheckpointBatch {
    pub run_id: String,
    pub last_processed_index: PersonIndex,
    pub comparisons: Vec<ComparisonRecord>,
    pub memberships: Vec<ClusterMembership>,
    pub results: Vec<ResultEntry>,
    pub counters: RunCounters,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_index_starts_at_zero() {
        let mut meta = RunMetadata::new("run-1", 10, "digest", None);
        assert_eq!(meta.next_index(), 0);
        meta.last_processed_index = Some(4);
        assert_eq!(meta.next_index(), 5);
        assert_eq!(meta.status, RunStatus::Running);
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(RunStatus::parse("completed"), Some(RunStatus::Completed));
        assert_eq!(RunStatus::parse(RunStatus::Running.as_str()), Some(RunStatus::Running));
        assert_eq!(RunStatus::parse("failed"), None);
    }
}

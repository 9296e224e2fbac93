// src/store/mod.rs
pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use crate::models::{
    CanonicalIdentityRecord, CheckpointBatch, ClusterMembership, ComparisonLookup, ComparisonRecord,
    PairKey, Person, ResultEntry, RunMetadata,
};

pub use memory::{MemoryDedupStore, StaticPopulation};
pub use postgres::{PgDedupStore, PgPopulationSource};

/// Run-independent identity of a stored comparison: person ids in lexical order plus the
/// signatures of both persons at comparison time.
pub type DurableKey = (String, String, String, String);

pub fn durable_key(id_1: &str, id_2: &str, sig_1: &str, sig_2: &str) -> DurableKey {
    if id_1 <= id_2 {
        (id_1.to_string(), id_2.to_string(), sig_1.to_string(), sig_2.to_string())
    } else {
        (id_2.to_string(), id_1.to_string(), sig_2.to_string(), sig_1.to_string())
    }
}

/// A recorded match as stored, with the signatures it was computed against.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMatch {
    pub person_id_1: String,
    pub person_id_2: String,
    pub signature_1: String,
    pub signature_2: String,
}

/// Where the population snapshot comes from. Read once per run.
#[async_trait]
pub trait PopulationSource: Send + Sync {
    async fn load_population(&self) -> Result<Vec<Person>>;
}

/// Durable comparison, cluster, run-metadata and tracker state.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn create_run(&self, meta: &RunMetadata) -> Result<()>;

    async fn load_run(&self, run_id: &str) -> Result<Option<RunMetadata>>;

    /// Most recently started run still in the running state.
    async fn latest_running_run(&self) -> Result<Option<RunMetadata>>;

    /// Marks the run completed. Only valid after the final checkpoint committed.
    async fn complete_run(&self, run_id: &str) -> Result<()>;

    /// Finds stored outcomes for the given pairs. Conclusive outcomes from any run are
    /// returned; provisional ones only when they were recorded by `run_id`.
    async fn lookup_comparisons(
        &self,
        run_id: &str,
        lookups: &[ComparisonLookup],
    ) -> Result<HashMap<PairKey, ComparisonRecord>>;

    /// Commits comparisons, memberships, results, counters and the checkpoint index atomically.
    async fn commit_checkpoint(&self, batch: &CheckpointBatch) -> Result<()>;

    async fn load_memberships(&self, run_id: &str) -> Result<Vec<ClusterMembership>>;

    async fn load_results(&self, run_id: &str) -> Result<Vec<ResultEntry>>;

    /// Every conclusive match between two of the given persons, plus the provisional matches
    /// recorded by `run_id`.
    async fn load_matches_among(&self, run_id: &str, person_ids: &[String]) -> Result<Vec<StoredMatch>>;

    /// Replaces the whole canonical identity table in one transaction.
    async fn replace_tracker(&self, records: &[CanonicalIdentityRecord]) -> Result<usize>;
}

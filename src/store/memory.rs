// src/store/memory.rs
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;

use super::{durable_key, DedupStore, DurableKey, PopulationSource, StoredMatch};
use crate::models::{
    CanonicalIdentityRecord, CheckpointBatch, ClusterMembership, ComparisonLookup, ComparisonRecord,
    PairKey, Person, ResultEntry, RunMetadata, RunStatus,
};

/// A fixed population, for tests and for replaying an exported snapshot.
pub struct StaticPopulation {
    persons: Vec<Person>,
}

impl StaticPopulation {
    pub fn new(persons: Vec<Person>) -> Self {
        Self { persons }
    }
}

#[async_trait]
impl PopulationSource for StaticPopulation {
    async fn load_population(&self) -> Result<Vec<Person>> {
        Ok(self.persons.clone())
    }
}

#[derive(Default)]
struct MemoryState {
    runs: HashMap<String, RunMetadata>,
    comparisons: HashMap<DurableKey, ComparisonRecord>,
    provisional: HashMap<DurableKey, ComparisonRecord>,
    memberships: HashMap<String, BTreeMap<usize, ClusterMembership>>,
    results: HashMap<String, Vec<ResultEntry>>,
    tracker: Vec<CanonicalIdentityRecord>,
    failing_checkpoints: u32,
    checkpoint_commits: u64,
}

/// Process-local store with the same transactional semantics as the Postgres one.
/// Backs `--dry-run` and the test suite.
#[derive(Default)]
pub struct MemoryDedupStore {
    state: Mutex<MemoryState>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` checkpoint commits fail without applying anything.
    pub async fn fail_next_checkpoints(&self, n: u32) {
        self.state.lock().await.failing_checkpoints = n;
    }

    pub async fn comparison_count(&self) -> usize {
        self.state.lock().await.comparisons.len()
    }

    pub async fn inconclusive_count(&self) -> usize {
        self.state
            .lock()
            .await
            .provisional
            .values()
            .filter(|r| r.is_inconclusive())
            .count()
    }

    /// Inconclusive and judge-less outcomes awaiting a retry.
    pub async fn provisional_count(&self) -> usize {
        self.state.lock().await.provisional.len()
    }

    pub async fn checkpoint_commits(&self) -> u64 {
        self.state.lock().await.checkpoint_commits
    }

    pub async fn tracker_records(&self) -> Vec<CanonicalIdentityRecord> {
        self.state.lock().await.tracker.clone()
    }

    pub async fn stored_comparisons(&self) -> Vec<ComparisonRecord> {
        self.state.lock().await.comparisons.values().cloned().collect()
    }
}

fn key_of(record: &ComparisonRecord) -> DurableKey {
    durable_key(
        &record.person_id_1,
        &record.person_id_2,
        &record.signature_1,
        &record.signature_2,
    )
}

fn rehydrate(stored: &ComparisonRecord, lookup: &ComparisonLookup) -> ComparisonRecord {
    ComparisonRecord {
        index_1: lookup.key.low,
        index_2: lookup.key.high,
        person_id_1: lookup.person_id_1.clone(),
        person_id_2: lookup.person_id_2.clone(),
        signature_1: lookup.signature_1.clone(),
        signature_2: lookup.signature_2.clone(),
        ..stored.clone()
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn create_run(&self, meta: &RunMetadata) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.runs.contains_key(&meta.run_id) {
            bail!("run {} already exists", meta.run_id);
        }
        state.runs.insert(meta.run_id.clone(), meta.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: &str) -> Result<Option<RunMetadata>> {
        Ok(self.state.lock().await.runs.get(run_id).cloned())
    }

    async fn latest_running_run(&self) -> Result<Option<RunMetadata>> {
        let state = self.state.lock().await;
        Ok(state
            .runs
            .values()
            .filter(|r| r.status == RunStatus::Running)
            .max_by_key(|r| r.started_at)
            .cloned())
    }

    async fn complete_run(&self, run_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| anyhow!("run {} not found", run_id))?;
        let now = Utc::now();
        run.status = RunStatus::Completed;
        run.completed_at = Some(now);
        run.updated_at = now;
        Ok(())
    }

    async fn lookup_comparisons(
        &self,
        run_id: &str,
        lookups: &[ComparisonLookup],
    ) -> Result<HashMap<PairKey, ComparisonRecord>> {
        let state = self.state.lock().await;
        let mut found = HashMap::new();
        for lookup in lookups {
            let key = durable_key(
                &lookup.person_id_1,
                &lookup.person_id_2,
                &lookup.signature_1,
                &lookup.signature_2,
            );
            if let Some(stored) = state.comparisons.get(&key) {
                found.insert(lookup.key, rehydrate(stored, lookup));
            } else if let Some(stored) = state.provisional.get(&key).filter(|r| r.run_id == run_id) {
                found.insert(lookup.key, rehydrate(stored, lookup));
            }
        }
        Ok(found)
    }

    async fn commit_checkpoint(&self, batch: &CheckpointBatch) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.failing_checkpoints > 0 {
            state.failing_checkpoints -= 1;
            bail!("simulated write failure at checkpoint {}", batch.last_processed_index);
        }

        let run = state
            .runs
            .get(&batch.run_id)
            .ok_or_else(|| anyhow!("run {} not found", batch.run_id))?;
        if let Some(current) = run.last_processed_index {
            if batch.last_processed_index < current {
                bail!(
                    "checkpoint for run {} would move backwards ({} < {})",
                    batch.run_id,
                    batch.last_processed_index,
                    current
                );
            }
        }

        for record in &batch.comparisons {
            let key = key_of(record);
            if record.is_provisional() {
                if !state.comparisons.contains_key(&key) {
                    state.provisional.insert(key, record.clone());
                }
            } else {
                state.provisional.remove(&key);
                state.comparisons.entry(key).or_insert_with(|| record.clone());
            }
        }

        let memberships = state.memberships.entry(batch.run_id.clone()).or_default();
        for m in &batch.memberships {
            memberships.insert(m.person_index, m.clone());
        }

        let results = state.results.entry(batch.run_id.clone()).or_default();
        let seen: HashSet<(usize, usize)> = results
            .iter()
            .map(|r| (r.person_index, r.matched_index))
            .collect();
        for entry in &batch.results {
            if !seen.contains(&(entry.person_index, entry.matched_index)) {
                results.push(entry.clone());
            }
        }

        if let Some(run) = state.runs.get_mut(&batch.run_id) {
            run.last_processed_index = Some(batch.last_processed_index);
            run.counters = batch.counters;
            run.updated_at = Utc::now();
        }
        state.checkpoint_commits += 1;
        Ok(())
    }

    async fn load_memberships(&self, run_id: &str) -> Result<Vec<ClusterMembership>> {
        Ok(self
            .state
            .lock()
            .await
            .memberships
            .get(run_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn load_results(&self, run_id: &str) -> Result<Vec<ResultEntry>> {
        Ok(self
            .state
            .lock()
            .await
            .results
            .get(run_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn load_matches_among(&self, run_id: &str, person_ids: &[String]) -> Result<Vec<StoredMatch>> {
        let wanted: HashSet<&str> = person_ids.iter().map(|s| s.as_str()).collect();
        let state = self.state.lock().await;
        let own_provisional = state.provisional.values().filter(|r| r.run_id == run_id);
        let mut matches: Vec<StoredMatch> = state
            .comparisons
            .values()
            .chain(own_provisional)
            .filter(|r| r.is_match())
            .filter(|r| wanted.contains(r.person_id_1.as_str()) && wanted.contains(r.person_id_2.as_str()))
            .map(|r| StoredMatch {
                person_id_1: r.person_id_1.clone(),
                person_id_2: r.person_id_2.clone(),
                signature_1: r.signature_1.clone(),
                signature_2: r.signature_2.clone(),
            })
            .collect();
        matches.sort_by(|a, b| (&a.person_id_1, &a.person_id_2).cmp(&(&b.person_id_1, &b.person_id_2)));
        Ok(matches)
    }

    async fn replace_tracker(&self, records: &[CanonicalIdentityRecord]) -> Result<usize> {
        let mut state = self.state.lock().await;
        state.tracker = records.to_vec();
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComparisonMethod, RunCounters, Verdict};
    use serde_json::json;

    fn record(verdict: Verdict, run_id: &str) -> ComparisonRecord {
        ComparisonRecord {
            index_1: 0,
            index_2: 1,
            person_id_1: "A".to_string(),
            person_id_2: "B".to_string(),
            signature_1: "sa".to_string(),
            signature_2: "sb".to_string(),
            score: 0.75,
            verdict,
            method: ComparisonMethod::ExternalAssisted,
            details: json!({}),
            run_id: run_id.to_string(),
            completed_at: Utc::now(),
        }
    }

    fn lookup(low: usize, high: usize) -> ComparisonLookup {
        ComparisonLookup {
            key: PairKey::new(low, high),
            person_id_1: "A".to_string(),
            person_id_2: "B".to_string(),
            signature_1: "sa".to_string(),
            signature_2: "sb".to_string(),
        }
    }

    fn batch(run_id: &str, index: usize, comparisons: Vec<ComparisonRecord>) -> CheckpointBatch {
        CheckpointBatch {
            run_id: run_id.to_string(),
            last_processed_index: index,
            comparisons,
            memberships: Vec::new(),
            results: Vec::new(),
            counters: RunCounters::default(),
        }
    }

    #[tokio::test]
    async fn test_inconclusive_only_visible_to_its_run() {
        let store = MemoryDedupStore::new();
        store.create_run(&RunMetadata::new("r1", 2, "d", None)).await.unwrap();
        store
            .commit_checkpoint(&batch("r1", 0, vec![record(Verdict::Inconclusive, "r1")]))
            .await
            .unwrap();

        assert_eq!(store.lookup_comparisons("r1", &[lookup(0, 1)]).await.unwrap().len(), 1);
        assert!(store.lookup_comparisons("r2", &[lookup(0, 1)]).await.unwrap().is_empty());

        // A conclusive retry replaces the inconclusive row.
        store.create_run(&RunMetadata::new("r2", 2, "d", None)).await.unwrap();
        store
            .commit_checkpoint(&batch("r2", 0, vec![record(Verdict::Match, "r2")]))
            .await
            .unwrap();
        assert_eq!(store.inconclusive_count().await, 0);
        let found = store.lookup_comparisons("r3", &[lookup(4, 9)]).await.unwrap();
        let hit = &found[&PairKey::new(4, 9)];
        assert!(hit.is_match());
        assert_eq!((hit.index_1, hit.index_2), (4, 9));
    }

    #[tokio::test]
    async fn test_offline_decisions_are_retried_by_later_runs() {
        let store = MemoryDedupStore::new();
        store.create_run(&RunMetadata::new("r1", 2, "d", None)).await.unwrap();
        let mut offline = record(Verdict::Match, "r1");
        offline.method = ComparisonMethod::TierOffline(3);
        store
            .commit_checkpoint(&batch("r1", 0, vec![offline]))
            .await
            .unwrap();

        assert_eq!(store.comparison_count().await, 0);
        assert_eq!(store.provisional_count().await, 1);
        assert_eq!(store.inconclusive_count().await, 0);
        assert_eq!(store.lookup_comparisons("r1", &[lookup(0, 1)]).await.unwrap().len(), 1);
        assert!(store.lookup_comparisons("r2", &[lookup(0, 1)]).await.unwrap().is_empty());

        let ids = vec!["A".to_string(), "B".to_string()];
        assert_eq!(store.load_matches_among("r1", &ids).await.unwrap().len(), 1);
        assert!(store.load_matches_among("r2", &ids).await.unwrap().is_empty());

        store.create_run(&RunMetadata::new("r2", 2, "d", None)).await.unwrap();
        store
            .commit_checkpoint(&batch("r2", 0, vec![record(Verdict::NoMatch, "r2")]))
            .await
            .unwrap();
        assert_eq!(store.provisional_count().await, 0);
        assert!(store.load_matches_among("r1", &ids).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_comparisons_are_write_once() {
        let store = MemoryDedupStore::new();
        store.create_run(&RunMetadata::new("r1", 2, "d", None)).await.unwrap();
        store
            .commit_checkpoint(&batch("r1", 0, vec![record(Verdict::Match, "r1")]))
            .await
            .unwrap();
        store
            .commit_checkpoint(&batch("r1", 1, vec![record(Verdict::NoMatch, "r1")]))
            .await
            .unwrap();
        assert_eq!(store.comparison_count().await, 1);
        assert!(store.stored_comparisons().await[0].is_match());
    }

    #[tokio::test]
    async fn test_failed_checkpoint_applies_nothing() {
        let store = MemoryDedupStore::new();
        store.create_run(&RunMetadata::new("r1", 2, "d", None)).await.unwrap();
        store.fail_next_checkpoints(1).await;
        assert!(store
            .commit_checkpoint(&batch("r1", 1, vec![record(Verdict::Match, "r1")]))
            .await
            .is_err());
        assert_eq!(store.comparison_count().await, 0);
        let run = store.load_run("r1").await.unwrap().unwrap();
        assert_eq!(run.last_processed_index, None);

        store
            .commit_checkpoint(&batch("r1", 1, Vec::new()))
            .await
            .unwrap();
        assert!(store.commit_checkpoint(&batch("r1", 0, Vec::new())).await.is_err());
    }

    #[tokio::test]
    async fn test_latest_running_run_ignores_completed() {
        let store = MemoryDedupStore::new();
        let mut older = RunMetadata::new("old", 1, "d", None);
        older.started_at = Utc::now() - chrono::Duration::hours(1);
        store.create_run(&older).await.unwrap();
        store.create_run(&RunMetadata::new("new", 1, "d", None)).await.unwrap();

        assert_eq!(store.latest_running_run().await.unwrap().unwrap().run_id, "new");
        store.complete_run("new").await.unwrap();
        assert_eq!(store.latest_running_run().await.unwrap().unwrap().run_id, "old");
        assert!(store.create_run(&older).await.is_err());
    }
}

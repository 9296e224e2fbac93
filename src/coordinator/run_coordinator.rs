// src/coordinator/run_coordinator.rs
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cache::ComparisonCache;
use crate::clustering::audit::audit_transitive_closure;
use crate::clustering::cluster_manager::{ClusterManager, UnionOutcome};
use crate::errors::RunError;
use crate::matching::blocking::BlockingIndex;
use crate::matching::comparator::{ComparisonOutcome, PairwiseComparator};
use crate::models::stats_models::{CacheStats, ClosureAudit};
use crate::models::{
    CheckpointBatch, ComparisonRecord, PairKey, PersonIndex, PopulationSnapshot, ResultEntry,
    RunCounters, RunMetadata, RunStatus,
};
use crate::store::{DedupStore, PopulationSource};
use crate::utils::config::DedupConfig;
use crate::utils::get_memory_usage;
use crate::utils::progress_bars::logging::DedupLogger;
use crate::utils::progress_bars::progress_config::ProgressConfig;

/// Which run a scan works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeMode {
    /// Always start a fresh run.
    New,
    /// Continue the most recent running run, or start fresh if there is none.
    Latest,
    /// Continue exactly this run.
    RunId(String),
}

/// Final in-memory state of a scan. `run.status` stays `Running` when the scan was interrupted.
pub struct RunSummary {
    pub run: RunMetadata,
    pub snapshot: Arc<PopulationSnapshot>,
    pub clusters: ClusterManager,
    pub results: Vec<ResultEntry>,
    pub audit: Option<ClosureAudit>,
    pub cache_stats: CacheStats,
    pub resumed: bool,
    pub elapsed_secs: f64,
}

impl RunSummary {
    pub fn is_completed(&self) -> bool {
        self.run.status == RunStatus::Completed
    }
}

/// Mutable state carried through the person scan.
struct ScanState {
    run_id: String,
    min_confidence: f64,
    manager: ClusterManager,
    cache: ComparisonCache,
    counters: RunCounters,
    results: Vec<ResultEntry>,
    unflushed_results: Vec<ResultEntry>,
    last_done: Option<PersonIndex>,
    last_flushed: Option<PersonIndex>,
    in_flight: Option<JoinHandle<Result<()>>>,
}

/// Drives the ordered scan over the population: skip logic, candidate comparison through the
/// cache, cluster updates and checkpoints.
pub struct RunCoordinator {
    store: Arc<dyn DedupStore>,
    population: Arc<dyn PopulationSource>,
    comparator: PairwiseComparator,
    config: DedupConfig,
    progress: ProgressConfig,
    cancel: Arc<AtomicBool>,
    logger: DedupLogger,
}

impl RunCoordinator {
    pub fn new(
        store: Arc<dyn DedupStore>,
        population: Arc<dyn PopulationSource>,
        comparator: PairwiseComparator,
        config: DedupConfig,
    ) -> Self {
        Self {
            store,
            population,
            comparator,
            config,
            progress: ProgressConfig {
                enabled: false,
                ..ProgressConfig::default()
            },
            cancel: Arc::new(AtomicBool::new(false)),
            logger: DedupLogger::run(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressConfig) -> Self {
        self.progress = progress;
        self
    }

    /// Shares an externally owned stop flag, e.g. one already wired to Ctrl-C.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Setting the flag stops the scan before the next person; the run stays resumable.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub async fn run(&self, mode: ResumeMode, description: Option<&str>) -> Result<RunSummary> {
        self.logger.log_phase("Loading population snapshot", None);
        let persons = self.population.load_population().await?;
        let snapshot = Arc::new(PopulationSnapshot::new(persons));
        self.logger.log_data_loaded(snapshot.len(), "person");

        let (mut run, resumed) = self.open_run(&mode, &snapshot, description).await?;
        self.logger
            .log_start(&run.run_id, resumed, self.comparator.has_judge());

        let blocking = BlockingIndex::build(&snapshot);
        self.logger
            .log_blocking(blocking.block_count(), blocking.candidate_pair_count());

        let memberships = self
            .store
            .load_memberships(&run.run_id)
            .await
            .context("Failed to load cluster memberships")?;
        let results = self
            .store
            .load_results(&run.run_id)
            .await
            .context("Failed to load run results")?;
        if resumed {
            info!(
                "Resuming run {} at person {} with {} clustered persons and {} recorded results",
                run.run_id,
                run.next_index(),
                memberships.len(),
                results.len()
            );
        }

        let mut state = ScanState {
            run_id: run.run_id.clone(),
            min_confidence: run.min_confidence,
            manager: ClusterManager::restore(snapshot.len(), &memberships),
            cache: ComparisonCache::new(self.config.cache_capacity),
            counters: run.counters,
            results,
            unflushed_results: Vec::new(),
            last_done: run.last_processed_index,
            last_flushed: run.last_processed_index,
            in_flight: None,
        };

        let scan = self.scan(&snapshot, &blocking, run.next_index(), &mut state).await;
        // Whatever happened, never leave a commit running unobserved.
        let settled = self.await_in_flight(&mut state).await;
        let interrupted = scan?;
        settled?;

        run.counters = state.counters;
        run.last_processed_index = state.last_flushed;

        let audit = if interrupted {
            self.logger.log_interrupted(&run.run_id, state.last_flushed);
            None
        } else {
            self.store
                .complete_run(&run.run_id)
                .await
                .context("Failed to mark run completed")?;
            run.status = RunStatus::Completed;
            self.logger.log_phase("Auditing transitive closure", None);
            let audit = self.audit(&run.run_id, &snapshot, &state.manager).await?;
            self.logger.log_audit(&audit);
            Some(audit)
        };

        let cache_stats = state.cache.stats();
        self.logger.log_cache_results(&cache_stats);
        self.logger.log_completion(
            &run.counters,
            state.manager.cluster_count(),
            state.manager.clustered_person_count(),
        );

        Ok(RunSummary {
            run,
            snapshot,
            clusters: state.manager,
            results: state.results,
            audit,
            cache_stats,
            resumed,
            elapsed_secs: self.logger.elapsed_secs(),
        })
    }

    async fn open_run(
        &self,
        mode: &ResumeMode,
        snapshot: &PopulationSnapshot,
        description: Option<&str>,
    ) -> Result<(RunMetadata, bool)> {
        let existing = match mode {
            ResumeMode::New => None,
            ResumeMode::Latest => {
                let latest = self.store.latest_running_run().await?;
                if latest.is_none() {
                    info!("No running run to resume; starting a new one");
                }
                latest
            }
            ResumeMode::RunId(run_id) => Some(
                self.store
                    .load_run(run_id)
                    .await?
                    .ok_or_else(|| RunError::RunNotFound(run_id.clone()))?,
            ),
        };

        match existing {
            Some(run) => {
                if run.status != RunStatus::Running {
                    return Err(RunError::InvalidRunState {
                        run_id: run.run_id.clone(),
                        status: run.status.as_str().to_string(),
                        expected: RunStatus::Running.as_str().to_string(),
                    }
                    .into());
                }
                if run.population_size != snapshot.len() || run.snapshot_digest != snapshot.digest() {
                    return Err(RunError::SnapshotDrift {
                        run_id: run.run_id.clone(),
                        expected_size: run.population_size,
                        found_size: snapshot.len(),
                        expected_digest: run.snapshot_digest.clone(),
                        found_digest: snapshot.digest().to_string(),
                    }
                    .into());
                }
                if (run.min_confidence - self.config.min_confidence).abs() > f64::EPSILON {
                    warn!(
                        "Run {} was started with min confidence {:.2}; keeping it instead of {:.2}",
                        run.run_id, run.min_confidence, self.config.min_confidence
                    );
                }
                Ok((run, true))
            }
            None => {
                let run_id = Uuid::new_v4().to_string();
                let run = RunMetadata::new(&run_id, snapshot.len(), snapshot.digest(), description)
                    .with_min_confidence(self.config.min_confidence);
                self.store
                    .create_run(&run)
                    .await
                    .context("Failed to create run record")?;
                Ok((run, false))
            }
        }
    }

    /// Returns whether the scan was interrupted before the end of the population.
    async fn scan(
        &self,
        snapshot: &PopulationSnapshot,
        blocking: &BlockingIndex,
        start: PersonIndex,
        state: &mut ScanState,
    ) -> Result<bool> {
        let total = snapshot.len();
        let pb = self.progress.scan_bar(total as u64, start.min(total) as u64);
        self.logger.log_phase(
            "Scanning persons",
            Some(&format!("{} to {}", start, total.saturating_sub(1))),
        );

        let mut since_checkpoint = 0;
        let mut interrupted = false;
        for i in start..total {
            if self.cancel.load(Ordering::SeqCst) {
                interrupted = true;
                break;
            }

            if !self.config.exhaustive && state.manager.is_non_representative_member(i) {
                state.counters.skipped_persons += 1;
            } else {
                self.process_person(snapshot, blocking, i, state).await?;
            }
            state.last_done = Some(i);
            since_checkpoint += 1;
            pb.inc(1);

            if since_checkpoint >= self.config.checkpoint_interval
                || state.cache.pending_len() >= self.config.max_pending
            {
                self.checkpoint(i, state).await?;
                since_checkpoint = 0;
                self.update_progress_message(&pb, state).await;
            }
        }

        if let Some(last) = state.last_done {
            if state.last_flushed != Some(last) {
                self.checkpoint(last, state).await?;
            }
        }
        pb.finish_with_message(if interrupted { "interrupted" } else { "scan complete" });
        Ok(interrupted)
    }

    async fn process_person(
        &self,
        snapshot: &PopulationSnapshot,
        blocking: &BlockingIndex,
        i: PersonIndex,
        state: &mut ScanState,
    ) -> Result<()> {
        let candidates: Vec<PersonIndex> = blocking
            .candidates_after(i)
            .iter()
            .copied()
            .filter(|&j| !state.manager.same_cluster(i, j))
            .collect();
        if candidates.is_empty() {
            return Ok(());
        }

        let cached = state
            .cache
            .get_many(self.store.as_ref(), snapshot, &state.run_id, i, &candidates)
            .await
            .with_context(|| format!("Failed to look up stored comparisons for person {}", i))?;

        let misses: Vec<PersonIndex> = candidates
            .iter()
            .copied()
            .filter(|&j| !cached.contains_key(&PairKey::new(i, j)))
            .collect();
        let (review, eager): (Vec<PersonIndex>, Vec<PersonIndex>) = misses
            .into_iter()
            .partition(|&j| self.comparator.needs_external(snapshot, i, j));
        let review: HashSet<PersonIndex> = review.into_iter().collect();
        let run_id = state.run_id.clone();
        let mut fresh = self.compare_all(snapshot, i, eager, &run_id).await;

        // Outcomes are applied in candidate order regardless of completion order.
        let mut cached = cached;
        let mut deferred = Vec::new();
        for j in candidates {
            if let Some(record) = cached.remove(&PairKey::new(i, j)) {
                self.apply(snapshot, i, j, &record, true, state);
            } else if let Some(outcome) = fresh.remove(&j) {
                self.apply_fresh(snapshot, i, j, outcome, state);
            } else if review.contains(&j) {
                deferred.push(j);
            } else {
                warn!("No comparison outcome for pair ({}, {})", i, j);
            }
        }

        // Judge calls go out only for pairs the matches above left in separate clusters.
        let deferred: Vec<PersonIndex> = deferred
            .into_iter()
            .filter(|&j| !state.manager.same_cluster(i, j))
            .collect();
        if deferred.is_empty() {
            return Ok(());
        }
        let mut judged = self.compare_all(snapshot, i, deferred.clone(), &run_id).await;
        for j in deferred {
            match judged.remove(&j) {
                Some(outcome) => self.apply_fresh(snapshot, i, j, outcome, state),
                None => warn!("No comparison outcome for pair ({}, {})", i, j),
            }
        }
        Ok(())
    }

    async fn compare_all(
        &self,
        snapshot: &PopulationSnapshot,
        i: PersonIndex,
        others: Vec<PersonIndex>,
        run_id: &str,
    ) -> HashMap<PersonIndex, ComparisonOutcome> {
        let comparator = &self.comparator;
        stream::iter(others)
            .map(|j| async move { (j, comparator.compare(snapshot, i, j, run_id).await) })
            .buffer_unordered(self.config.comparison_concurrency)
            .collect()
            .await
    }

    fn apply_fresh(
        &self,
        snapshot: &PopulationSnapshot,
        i: PersonIndex,
        j: PersonIndex,
        outcome: ComparisonOutcome,
        state: &mut ScanState,
    ) {
        if outcome.external_call {
            state.counters.external_calls += 1;
        }
        state.cache.put(outcome.record.clone());
        self.apply(snapshot, i, j, &outcome.record, false, state);
    }

    fn apply(
        &self,
        snapshot: &PopulationSnapshot,
        i: PersonIndex,
        j: PersonIndex,
        record: &ComparisonRecord,
        from_cache: bool,
        state: &mut ScanState,
    ) {
        state.counters.record(record, from_cache);
        if !record.is_match() {
            return;
        }

        let outcome = state.manager.union(i, j, record.method, record.score);
        if !matches!(outcome, UnionOutcome::AlreadyTogether(_)) {
            debug!(
                "{} matched {} via {} ({:.3}): {:?}",
                snapshot.person(i).person_id,
                snapshot.person(j).person_id,
                record.method,
                record.score,
                outcome
            );
        }

        if record.score >= state.min_confidence {
            let entry = ResultEntry {
                person_index: i,
                person_id: snapshot.person(i).person_id.clone(),
                matched_index: j,
                matched_person_id: snapshot.person(j).person_id.clone(),
                score: record.score,
                method: record.method,
                details: record.details.clone(),
            };
            state.results.push(entry.clone());
            state.unflushed_results.push(entry);
        }
    }

    /// Hands everything pending up to `index` to a background commit. The previous commit is
    /// awaited first so commits never overlap and the durable checkpoint only moves forward.
    async fn checkpoint(&self, index: PersonIndex, state: &mut ScanState) -> Result<()> {
        self.await_in_flight(state).await?;

        let batch = CheckpointBatch {
            run_id: state.run_id.clone(),
            last_processed_index: index,
            comparisons: state.cache.drain_pending(),
            memberships: state.manager.drain_dirty(),
            results: std::mem::take(&mut state.unflushed_results),
            counters: state.counters,
        };
        state.last_flushed = Some(index);

        let store = self.store.clone();
        let logger = self.logger.clone();
        let attempts = self.config.checkpoint_retries.max(1);
        state.in_flight = Some(tokio::spawn(async move {
            commit_with_retry(store.as_ref(), &batch, attempts, &logger).await
        }));
        Ok(())
    }

    async fn await_in_flight(&self, state: &mut ScanState) -> Result<()> {
        if let Some(handle) = state.in_flight.take() {
            handle.await.context("Checkpoint task panicked")??;
        }
        Ok(())
    }

    async fn update_progress_message(&self, pb: &ProgressBar, state: &ScanState) {
        let mut parts = vec![format!(
            "clusters: {}, matches: {}",
            state.manager.cluster_count(),
            state.counters.matches
        )];
        if self.progress.should_show_cache_stats() {
            parts.push(format!(
                "cache hit rate: {:.1}%",
                state.cache.stats().hit_rate() * 100.0
            ));
        }
        if self.progress.should_show_memory() {
            parts.push(format!("Memory: {} MB", get_memory_usage().await));
        }
        pb.set_message(parts.join(", "));
    }

    /// Checks every stored match that is still current against the final clusters.
    async fn audit(
        &self,
        run_id: &str,
        snapshot: &PopulationSnapshot,
        manager: &ClusterManager,
    ) -> Result<ClosureAudit> {
        let ids: Vec<String> = snapshot.persons().iter().map(|p| p.person_id.clone()).collect();
        let stored = self
            .store
            .load_matches_among(run_id, &ids)
            .await
            .context("Failed to load recorded matches for the closure audit")?;

        let current: Vec<(PersonIndex, PersonIndex)> = stored
            .iter()
            .filter_map(|m| {
                let a = snapshot.index_of(&m.person_id_1)?;
                let b = snapshot.index_of(&m.person_id_2)?;
                let fresh = snapshot.signature(a) == m.signature_1 && snapshot.signature(b) == m.signature_2;
                fresh.then_some((a, b))
            })
            .collect();
        Ok(audit_transitive_closure(snapshot, manager, &current))
    }
}

async fn commit_with_retry(
    store: &dyn DedupStore,
    batch: &CheckpointBatch,
    attempts: u32,
    logger: &DedupLogger,
) -> Result<()> {
    let mut last_error = None;
    for attempt in 1..=attempts {
        match store.commit_checkpoint(batch).await {
            Ok(()) => {
                logger.log_checkpoint(
                    batch.last_processed_index,
                    batch.comparisons.len(),
                    batch.memberships.len(),
                );
                return Ok(());
            }
            Err(e) => {
                logger.log_checkpoint_retry(attempt, attempts, &e);
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                }
            }
        }
    }
    if let Some(e) = &last_error {
        logger.log_error("Checkpoint could not be persisted", e);
    }
    Err(RunError::CheckpointPersistence {
        run_id: batch.run_id.clone(),
        index: batch.last_processed_index,
        attempts,
        reason: last_error
            .map(|e| format!("{:#}", e))
            .unwrap_or_else(|| "no attempt made".to_string()),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::JudgeError;
    use crate::matching::comparator::tests::ScriptedJudge;
    use crate::matching::comparator::MatchPolicy;
    use crate::matching::external::{ExternalJudge, JudgeContext, Judgment};
    use crate::models::Person;
    use crate::store::{MemoryDedupStore, StaticPopulation};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Says "same" only for the listed id pairs and remembers every pair it was asked about.
    struct PairJudge {
        same: Vec<(&'static str, &'static str)>,
        asked: Mutex<Vec<(String, String)>>,
    }

    impl PairJudge {
        fn asked(&self) -> Vec<(String, String)> {
            let mut asked = self.asked.lock().unwrap().clone();
            asked.sort();
            asked
        }
    }

    #[async_trait]
    impl ExternalJudge for PairJudge {
        async fn judge(&self, a: &Person, b: &Person, _c: &JudgeContext) -> Result<Judgment, JudgeError> {
            let pair = (a.person_id.clone(), b.person_id.clone());
            self.asked.lock().unwrap().push(pair.clone());
            Ok(Judgment {
                is_same_person: self.same.iter().any(|(x, y)| pair.0 == *x && pair.1 == *y),
                confidence_score: 0.9,
                reasoning: "pair list".to_string(),
            })
        }

        fn name(&self) -> &str {
            "pair-judge"
        }
    }

    fn persons() -> Vec<Person> {
        vec![
            Person::new("P1")
                .with_name("Ravi Kumar")
                .with_district("Hyderabad")
                .with_age(30)
                .with_phone("9000000001"),
            Person::new("P2")
                .with_name("Ravi Kumar")
                .with_district("Hyderabad")
                .with_age(30)
                .with_phone("9000000001"),
            Person::new("P3").with_name("Ravi Kumar").with_district("Hyderabad").with_age(45),
            Person::new("P4")
                .with_name("Ravi Kumaar")
                .with_district("Hyderabad")
                .with_age(30)
                .with_phone("9000000001"),
            Person::new("P5")
                .with_name("Ravi Kumar")
                .with_district("Warangal")
                .with_age(30)
                .with_phone("9000000001"),
        ]
    }

    fn config() -> DedupConfig {
        DedupConfig {
            checkpoint_interval: 2,
            cache_capacity: 64,
            comparison_concurrency: 4,
            max_pending: 1_000,
            checkpoint_retries: 2,
            ..DedupConfig::default()
        }
    }

    fn coordinator(store: Arc<MemoryDedupStore>, judge: Arc<ScriptedJudge>, config: DedupConfig) -> RunCoordinator {
        RunCoordinator::new(
            store,
            Arc::new(StaticPopulation::new(persons())),
            PairwiseComparator::new(MatchPolicy::default(), Some(judge)),
            config,
        )
    }

    #[tokio::test]
    async fn test_scenario_partition_and_skip() {
        let store = Arc::new(MemoryDedupStore::new());
        let judge = Arc::new(ScriptedJudge::answering(true, 0.9));
        let summary = coordinator(store.clone(), judge.clone(), config())
            .run(ResumeMode::New, None)
            .await
            .unwrap();

        assert!(summary.is_completed());
        // P5 lives in another district and is never compared with the others.
        assert_eq!(summary.clusters.partition(), vec![vec![0, 1, 3]]);
        assert_eq!(summary.clusters.representative(summary.clusters.find(3).unwrap()), Some(0));
        // P2 and P4 are members once P1 is processed, so both are skipped.
        assert_eq!(summary.run.counters.skipped_persons, 2);
        assert_eq!(judge.calls.load(Ordering::SeqCst), 1);
        assert_eq!(summary.run.counters.external_calls, 1);
        assert!(summary.audit.as_ref().unwrap().is_consistent());

        let stored = store.load_run(&summary.run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert_eq!(stored.last_processed_index, Some(4));
        assert_eq!(stored.counters, summary.run.counters);
    }

    #[tokio::test]
    async fn test_exhaustive_compares_members_too() {
        let store = Arc::new(MemoryDedupStore::new());
        let judge = Arc::new(ScriptedJudge::answering(true, 0.9));
        let summary = coordinator(
            store,
            judge,
            DedupConfig {
                exhaustive: true,
                ..config()
            },
        )
        .run(ResumeMode::New, None)
        .await
        .unwrap();

        assert_eq!(summary.run.counters.skipped_persons, 0);
        assert_eq!(summary.clusters.partition(), vec![vec![0, 1, 3]]);
    }

    #[tokio::test]
    async fn test_second_run_reuses_stored_comparisons() {
        let store = Arc::new(MemoryDedupStore::new());
        let first = coordinator(store.clone(), Arc::new(ScriptedJudge::answering(true, 0.9)), config())
            .run(ResumeMode::New, None)
            .await
            .unwrap();

        let judge = Arc::new(ScriptedJudge::answering(false, 0.9));
        let second = coordinator(store.clone(), judge.clone(), config())
            .run(ResumeMode::New, None)
            .await
            .unwrap();

        assert_ne!(first.run.run_id, second.run.run_id);
        assert_eq!(first.clusters.partition(), second.clusters.partition());
        assert_eq!(judge.calls.load(Ordering::SeqCst), 0);
        assert_eq!(second.run.counters.cached, second.run.counters.comparisons);
        assert!(second.cache_stats.store_hits > 0);
    }

    #[tokio::test]
    async fn test_failed_checkpoint_aborts_and_resumes() {
        let store = Arc::new(MemoryDedupStore::new());
        store.fail_next_checkpoints(2).await;
        let judge = Arc::new(ScriptedJudge::answering(true, 0.9));

        let err = coordinator(store.clone(), judge.clone(), config())
            .run(ResumeMode::New, None)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<RunError>(),
            Some(RunError::CheckpointPersistence { attempts: 2, .. })
        ));

        let stalled = store.latest_running_run().await.unwrap().unwrap();
        assert_eq!(stalled.last_processed_index, None);

        let resumed = coordinator(store.clone(), judge, config())
            .run(ResumeMode::Latest, None)
            .await
            .unwrap();
        assert!(resumed.resumed);
        assert_eq!(resumed.run.run_id, stalled.run_id);
        assert!(resumed.is_completed());
        assert_eq!(resumed.clusters.partition(), vec![vec![0, 1, 3]]);
    }

    #[tokio::test]
    async fn test_cancel_before_start_leaves_run_running() {
        let store = Arc::new(MemoryDedupStore::new());
        let coordinator = coordinator(store.clone(), Arc::new(ScriptedJudge::answering(true, 0.9)), config());
        coordinator.cancel_flag().store(true, Ordering::SeqCst);

        let summary = coordinator.run(ResumeMode::New, None).await.unwrap();
        assert!(!summary.is_completed());
        assert!(summary.audit.is_none());
        assert_eq!(summary.run.last_processed_index, None);
        assert_eq!(store.checkpoint_commits().await, 0);
    }

    #[tokio::test]
    async fn test_resume_rejects_drifted_population() {
        let store = Arc::new(MemoryDedupStore::new());
        let mut drifted = RunMetadata::new("old-run", 5, "another-digest", None);
        drifted.last_processed_index = Some(1);
        store.create_run(&drifted).await.unwrap();

        let err = coordinator(store.clone(), Arc::new(ScriptedJudge::answering(true, 0.9)), config())
            .run(ResumeMode::RunId("old-run".to_string()), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<RunError>(),
            Some(RunError::SnapshotDrift { .. })
        ));

        let err = coordinator(store, Arc::new(ScriptedJudge::answering(true, 0.9)), config())
            .run(ResumeMode::RunId("missing".to_string()), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err.downcast_ref::<RunError>(), Some(RunError::RunNotFound(_))));
    }

    #[tokio::test]
    async fn test_min_confidence_filters_results_not_clusters() {
        let store = Arc::new(MemoryDedupStore::new());
        let summary = coordinator(
            store,
            Arc::new(ScriptedJudge::answering(true, 0.85)),
            DedupConfig {
                min_confidence: 0.9,
                ..config()
            },
        )
        .run(ResumeMode::New, None)
        .await
        .unwrap();

        assert_eq!(summary.clusters.partition(), vec![vec![0, 1, 3]]);
        let pairs: Vec<(usize, usize)> = summary
            .results
            .iter()
            .map(|r| (r.person_index, r.matched_index))
            .collect();
        assert_eq!(pairs, vec![(0, 1)]);
    }

    #[tokio::test]
    async fn test_resume_keeps_threshold_of_the_run() {
        let store = Arc::new(MemoryDedupStore::new());
        let judge = Arc::new(ScriptedJudge::answering(true, 0.85));
        let strict = coordinator(
            store.clone(),
            judge.clone(),
            DedupConfig {
                min_confidence: 0.9,
                ..config()
            },
        );
        strict.cancel_flag().store(true, Ordering::SeqCst);
        let stalled = strict.run(ResumeMode::New, None).await.unwrap();
        assert_eq!(stalled.run.min_confidence, 0.9);

        let resumed = coordinator(store, judge, config())
            .run(ResumeMode::RunId(stalled.run.run_id.clone()), None)
            .await
            .unwrap();
        assert!(resumed.resumed);
        assert_eq!(resumed.run.min_confidence, 0.9);
        let pairs: Vec<(usize, usize)> = resumed
            .results
            .iter()
            .map(|r| (r.person_index, r.matched_index))
            .collect();
        assert_eq!(pairs, vec![(0, 1)]);
    }

    #[tokio::test]
    async fn test_judge_skips_pairs_joined_earlier_in_the_same_person() {
        // 0-1, 0-2, 0-3 and 1-3 only share the name-district-age tier; 1-2 are identical.
        let persons = vec![
            Person::new("Q0").with_name("Ravi Kumaar").with_district("Guntur").with_age(30).with_phone("9000000111"),
            Person::new("Q1").with_name("Ravi Kumar").with_district("Guntur").with_age(30).with_phone("9000000222"),
            Person::new("Q2").with_name("Ravi Kumar").with_district("Guntur").with_age(30).with_phone("9000000222"),
            Person::new("Q3").with_name("Ravi Kumaar").with_district("Guntur").with_age(30).with_phone("9000000333"),
        ];
        let judge = Arc::new(PairJudge {
            same: vec![("Q0", "Q2"), ("Q0", "Q3")],
            asked: Mutex::new(Vec::new()),
        });
        let summary = RunCoordinator::new(
            Arc::new(MemoryDedupStore::new()),
            Arc::new(StaticPopulation::new(persons)),
            PairwiseComparator::new(MatchPolicy::default(), Some(judge.clone())),
            config(),
        )
        .run(ResumeMode::New, None)
        .await
        .unwrap();

        assert_eq!(summary.clusters.partition(), vec![vec![0, 1, 2, 3]]);
        // Q1 joins Q3's cluster through its tier-1 match with Q2, so 1-3 is never judged.
        let expected: Vec<(String, String)> = [("Q0", "Q1"), ("Q0", "Q2"), ("Q0", "Q3")]
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        assert_eq!(judge.asked(), expected);
        assert_eq!(summary.run.counters.external_calls, 3);
        assert!(summary.audit.as_ref().unwrap().is_consistent());
    }
}

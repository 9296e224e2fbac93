// tests/run_coordinator_tests.rs
use async_trait::async_trait;
use dedupe_lib::coordinator::{ResumeMode, RunCoordinator, RunSummary};
use dedupe_lib::errors::JudgeError;
use dedupe_lib::matching::comparator::{MatchPolicy, PairwiseComparator};
use dedupe_lib::matching::external::{ExternalJudge, JudgeContext, Judgment};
use dedupe_lib::models::{Person, RunStatus, Verdict};
use dedupe_lib::store::{DedupStore, MemoryDedupStore, StaticPopulation};
use dedupe_lib::tracker::sync_tracker;
use dedupe_lib::utils::config::DedupConfig;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Says "same person" exactly when both phone numbers agree. Can trip a stop flag on its
/// n-th call, or fail every call.
struct PhoneJudge {
    calls: AtomicUsize,
    stop_after: Option<(usize, Arc<AtomicBool>)>,
    failing: bool,
}

impl PhoneJudge {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            stop_after: None,
            failing: false,
        }
    }

    fn stopping_after(n: usize, flag: Arc<AtomicBool>) -> Self {
        Self {
            stop_after: Some((n, flag)),
            ..Self::new()
        }
    }

    fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExternalJudge for PhoneJudge {
    async fn judge(&self, a: &Person, b: &Person, _context: &JudgeContext) -> Result<Judgment, JudgeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((n, flag)) = &self.stop_after {
            if call >= *n {
                flag.store(true, Ordering::SeqCst);
            }
        }
        if self.failing {
            return Err(JudgeError::Transport("connection refused".to_string()));
        }
        Ok(Judgment {
            is_same_person: a.phone_number == b.phone_number,
            confidence_score: 0.9,
            reasoning: "phone comparison".to_string(),
        })
    }

    fn name(&self) -> &str {
        "phone-judge"
    }
}

fn population() -> Vec<Person> {
    vec![
        // 0..=5: Guntur
        Person::new("A1").with_name("Ravi Kumar").with_district("Guntur").with_age(30).with_phone("9000000001"),
        Person::new("A2").with_name("Ravi Kumar").with_district("Guntur").with_age(30).with_phone("+91 90000 00001"),
        Person::new("A3").with_name("Ravi Kumaar").with_district("Guntur").with_age(30).with_phone("9000000001"),
        Person::new("A4").with_name("Sita Devi").with_relative("Rama").with_district("Guntur").with_age(25),
        Person::new("A5").with_name("Sita Devi").with_relative("Rama").with_district("Guntur").with_age(25),
        Person::new("A6").with_name("Gopal").with_district("Guntur").with_age(40).with_phone("9111111111"),
        // 6..=9: Krishna
        Person::new("B1")
            .with_name("Ravi Kumar")
            .with_district("Krishna")
            .with_age(30)
            .with_phone("9000000001")
            .with_crimes(&["AC1"], &["CR1"]),
        Person::new("B2")
            .with_name("Ravi Kumar")
            .with_district("Krishna")
            .with_age(30)
            .with_phone("9000000001")
            .with_crimes(&["AC2"], &["CR2"]),
        Person::new("B3").with_name("Anil").with_district("Krishna").with_age(50),
        Person::new("B4").with_name("Anil").with_district("Krishna").with_age(50),
        // 10..=11: no district
        Person::new("U1").with_name("Mohan").with_age(33).with_phone("9222222222"),
        Person::new("U2").with_name("Mohan").with_age(33).with_phone("9222222222"),
    ]
}

fn expected_partition() -> Vec<Vec<usize>> {
    vec![vec![0, 1, 2], vec![3, 4], vec![6, 7], vec![8, 9], vec![10, 11]]
}

fn config() -> DedupConfig {
    DedupConfig {
        checkpoint_interval: 3,
        cache_capacity: 128,
        comparison_concurrency: 4,
        max_pending: 1_000,
        checkpoint_retries: 2,
        ..DedupConfig::default()
    }
}

fn coordinator(store: Arc<MemoryDedupStore>, persons: Vec<Person>, judge: Arc<PhoneJudge>) -> RunCoordinator {
    RunCoordinator::new(
        store,
        Arc::new(StaticPopulation::new(persons)),
        PairwiseComparator::new(MatchPolicy::default(), Some(judge)),
        config(),
    )
}

async fn full_run(store: Arc<MemoryDedupStore>, judge: Arc<PhoneJudge>) -> RunSummary {
    coordinator(store, population(), judge)
        .run(ResumeMode::New, Some("integration"))
        .await
        .expect("run completes")
}

#[tokio::test]
async fn full_run_clusters_within_districts() {
    let store = Arc::new(MemoryDedupStore::new());
    let judge = Arc::new(PhoneJudge::new());
    let summary = full_run(store.clone(), judge.clone()).await;

    assert!(summary.is_completed());
    assert_eq!(summary.clusters.partition(), expected_partition());
    // A3 (tier 4), A4/A5 (tier 3) and B3/B4 (tier 5) sit in the review band.
    assert_eq!(judge.calls(), 3);
    assert_eq!(summary.run.counters.external_calls, 3);
    assert_eq!(summary.run.counters.inconclusive, 0);
    assert!(summary.audit.as_ref().unwrap().is_consistent());

    // Representative-only skipping: every non-representative member is skipped.
    assert_eq!(summary.run.counters.skipped_persons, 6);

    // No comparison ever crosses a district block.
    for record in store.stored_comparisons().await {
        let a = &record.person_id_1[..1];
        let b = &record.person_id_2[..1];
        assert_eq!(a, b, "{} compared with {}", record.person_id_1, record.person_id_2);
    }
}

#[tokio::test]
async fn interrupted_run_resumes_to_the_same_partition() {
    let reference = full_run(Arc::new(MemoryDedupStore::new()), Arc::new(PhoneJudge::new())).await;

    let store = Arc::new(MemoryDedupStore::new());
    let stop = Arc::new(AtomicBool::new(false));
    let interrupted = coordinator(
        store.clone(),
        population(),
        Arc::new(PhoneJudge::stopping_after(1, stop.clone())),
    )
    .with_cancel_flag(stop)
    .run(ResumeMode::New, None)
    .await
    .unwrap();

    assert!(!interrupted.is_completed());
    // The first external call happens while processing person 0; the scan stops right after it.
    assert_eq!(interrupted.run.last_processed_index, Some(0));
    let stored = store.load_run(&interrupted.run.run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Running);
    assert_eq!(stored.last_processed_index, Some(0));
    let flushed = store.comparison_count().await;
    assert_eq!(flushed, 5);

    let judge = Arc::new(PhoneJudge::new());
    let resumed = coordinator(store.clone(), population(), judge.clone())
        .run(ResumeMode::RunId(interrupted.run.run_id.clone()), None)
        .await
        .unwrap();

    assert!(resumed.resumed);
    assert!(resumed.is_completed());
    assert_eq!(resumed.clusters.partition(), reference.clusters.partition());
    assert_eq!(resumed.run.counters.comparisons, reference.run.counters.comparisons);
    assert_eq!(resumed.run.counters.matches, reference.run.counters.matches);
    // Person 0's comparisons were persisted before the stop and never recomputed.
    assert_eq!(judge.calls(), 2);

    let mut pairs: Vec<(usize, usize)> = resumed.results.iter().map(|r| (r.person_index, r.matched_index)).collect();
    let mut expected: Vec<(usize, usize)> =
        reference.results.iter().map(|r| (r.person_index, r.matched_index)).collect();
    pairs.sort();
    expected.sort();
    assert_eq!(pairs, expected);
}

#[tokio::test]
async fn edited_person_invalidates_only_its_comparisons() {
    let store = Arc::new(MemoryDedupStore::new());
    full_run(store.clone(), Arc::new(PhoneJudge::new())).await;

    let mut edited = population();
    edited[2] = edited[2].clone().with_gender("M");
    let judge = Arc::new(PhoneJudge::new());
    let second = coordinator(store, edited, judge.clone())
        .run(ResumeMode::New, None)
        .await
        .unwrap();

    assert_eq!(second.clusters.partition(), expected_partition());
    assert_eq!(judge.calls(), 1);
    assert_eq!(second.run.counters.cached + 1, second.run.counters.comparisons);
}

#[tokio::test]
async fn judge_outage_is_inconclusive_and_retried_by_a_later_run() {
    let store = Arc::new(MemoryDedupStore::new());
    let failing = Arc::new(PhoneJudge::failing());
    let first = coordinator(store.clone(), population(), failing.clone())
        .run(ResumeMode::New, None)
        .await
        .unwrap();

    assert!(first.is_completed());
    assert_eq!(first.run.counters.inconclusive, 3);
    assert_eq!(store.inconclusive_count().await, 3);
    assert_eq!(
        first.clusters.partition(),
        vec![vec![0, 1], vec![6, 7], vec![10, 11]]
    );

    let judge = Arc::new(PhoneJudge::new());
    let second = full_run(store.clone(), judge.clone()).await;
    assert_eq!(judge.calls(), 3);
    assert_eq!(second.clusters.partition(), expected_partition());
    assert_eq!(store.inconclusive_count().await, 0);
    assert!(store
        .stored_comparisons()
        .await
        .iter()
        .all(|r| r.verdict != Verdict::Inconclusive));
}

#[tokio::test]
async fn offline_decisions_are_revisited_once_a_judge_is_available() {
    let store = Arc::new(MemoryDedupStore::new());
    let offline = RunCoordinator::new(
        store.clone(),
        Arc::new(StaticPopulation::new(population())),
        PairwiseComparator::new(MatchPolicy::default(), None),
        config(),
    )
    .run(ResumeMode::New, None)
    .await
    .unwrap();

    assert!(offline.is_completed());
    // Only A4/A5 clear the offline bar; A1/A3 and B3/B4 stay apart.
    assert_eq!(
        offline.clusters.partition(),
        vec![vec![0, 1], vec![3, 4], vec![6, 7], vec![10, 11]]
    );
    assert_eq!(offline.run.counters.external_calls, 0);
    assert_eq!(store.provisional_count().await, 3);
    assert_eq!(store.inconclusive_count().await, 0);
    assert!(offline.audit.as_ref().unwrap().is_consistent());
    assert!(store.stored_comparisons().await.iter().all(|r| !r.method.is_offline()));

    let judge = Arc::new(PhoneJudge::new());
    let judged = full_run(store.clone(), judge.clone()).await;
    assert_eq!(judge.calls(), 3);
    assert_eq!(judged.clusters.partition(), expected_partition());
    assert_eq!(store.provisional_count().await, 0);
}

#[tokio::test]
async fn tracker_lists_every_person_once() {
    let store = Arc::new(MemoryDedupStore::new());
    let summary = full_run(store.clone(), Arc::new(PhoneJudge::new())).await;

    let written = sync_tracker(store.as_ref(), &summary.snapshot, &summary.clusters, &summary.run)
        .await
        .unwrap();
    // Five clusters plus A6 on its own.
    assert_eq!(written, 6);

    let records = store.tracker_records().await;
    let mut seen = HashSet::new();
    for record in &records {
        for id in &record.all_person_ids {
            assert!(seen.insert(id.clone()), "{} appears twice", id);
        }
    }
    assert_eq!(seen.len(), population().len());

    let krishna = records.iter().find(|r| r.canonical_person_id == "B1").unwrap();
    assert_eq!(krishna.all_crime_ids, vec!["CR1", "CR2"]);
    assert_eq!(krishna.matching_tier, Some(1));
    assert!(!krishna.uses_external_judgment);

    // A2 joined on tier 1; A3 joined through the judge, which carries no tier.
    let ravi = records.iter().find(|r| r.canonical_person_id == "A1").unwrap();
    assert_eq!(ravi.matching_tier, Some(1));
    assert!(ravi.uses_external_judgment);
    assert_eq!(ravi.person_record_count, 3);

    let gopal = records.iter().find(|r| r.canonical_person_id == "A6").unwrap();
    assert_eq!(gopal.person_record_count, 1);
}

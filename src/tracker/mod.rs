// src/tracker/mod.rs
pub mod db;
pub mod sync;

use anyhow::Result;

use crate::clustering::cluster_manager::ClusterManager;
use crate::errors::RunError;
use crate::models::{PopulationSnapshot, RunMetadata, RunStatus};
use crate::store::DedupStore;
use crate::utils::progress_bars::logging::DedupLogger;

/// Rebuilds the canonical identity table from the final clusters of a completed run.
pub async fn sync_tracker(
    store: &dyn DedupStore,
    snapshot: &PopulationSnapshot,
    manager: &ClusterManager,
    run: &RunMetadata,
) -> Result<usize> {
    if run.status != RunStatus::Completed {
        return Err(RunError::InvalidRunState {
            run_id: run.run_id.clone(),
            status: run.status.as_str().to_string(),
            expected: RunStatus::Completed.as_str().to_string(),
        }
        .into());
    }

    let logger = DedupLogger::tracker();
    logger.log_phase("Building canonical identity records", Some(&run.run_id));
    let records = sync::build_records(snapshot, manager, &run.run_id);
    let clusters = records.iter().filter(|r| r.person_record_count > 1).count();
    logger.log_phase(
        "Replacing tracker contents",
        Some(&format!(
            "{} records ({} clusters, {} singletons)",
            records.len(),
            clusters,
            records.len() - clusters
        )),
    );

    let written = store.replace_tracker(&records).await?;
    logger.log_phase("Tracker rebuilt", Some(&format!("{} rows", written)));
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComparisonMethod, Person};
    use crate::store::MemoryDedupStore;

    #[tokio::test]
    async fn test_refuses_running_run() {
        let store = MemoryDedupStore::new();
        let snapshot = PopulationSnapshot::new(vec![Person::new("P1").with_name("Ravi")]);
        let manager = ClusterManager::new(1);
        let run = RunMetadata::new("r1", 1, snapshot.digest(), None);

        let err = sync_tracker(&store, &snapshot, &manager, &run).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RunError>(),
            Some(RunError::InvalidRunState { .. })
        ));
        assert!(store.tracker_records().await.is_empty());
    }

    #[tokio::test]
    async fn test_full_rebuild_replaces_previous_rows() {
        let store = MemoryDedupStore::new();
        let snapshot = PopulationSnapshot::new(vec![
            Person::new("P1").with_name("Ravi"),
            Person::new("P2").with_name("Ravi"),
            Person::new("P3").with_name("Sita"),
        ]);
        let mut run = RunMetadata::new("r1", 3, snapshot.digest(), None);
        run.status = RunStatus::Completed;

        let manager = ClusterManager::new(3);
        assert_eq!(sync_tracker(&store, &snapshot, &manager, &run).await.unwrap(), 3);

        let mut manager = ClusterManager::new(3);
        manager.union(0, 1, ComparisonMethod::Tier(5), 0.65);
        assert_eq!(sync_tracker(&store, &snapshot, &manager, &run).await.unwrap(), 2);
        let rows = store.tracker_records().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].all_person_ids, vec!["P1", "P2"]);
    }
}

// src/cache/comparison_cache.rs
use anyhow::Result;
use log::debug;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;

use crate::models::stats_models::CacheStats;
use crate::models::{ComparisonLookup, ComparisonRecord, PairKey, PersonIndex, PopulationSnapshot};
use crate::store::DedupStore;

/// Two-level lookup for finished comparisons: a bounded in-process LRU in front of the durable
/// store. Records not yet committed sit in `pending`, which eviction never touches.
pub struct ComparisonCache {
    memory: LruCache<PairKey, ComparisonRecord>,
    pending: HashMap<PairKey, ComparisonRecord>,
    stats: CacheStats,
}

pub fn lookup_for(snapshot: &PopulationSnapshot, key: PairKey) -> ComparisonLookup {
    ComparisonLookup {
        key,
        person_id_1: snapshot.person(key.low).person_id.clone(),
        person_id_2: snapshot.person(key.high).person_id.clone(),
        signature_1: snapshot.signature(key.low).to_string(),
        signature_2: snapshot.signature(key.high).to_string(),
    }
}

impl ComparisonCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            memory: LruCache::new(capacity),
            pending: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Resolves the pairs `(person, c)` for every candidate `c`. Memory is checked first; the
    /// remaining pairs go to the store in one batched lookup. Absent pairs need a fresh comparison.
    pub async fn get_many(
        &mut self,
        store: &dyn DedupStore,
        snapshot: &PopulationSnapshot,
        run_id: &str,
        person: PersonIndex,
        candidates: &[PersonIndex],
    ) -> Result<HashMap<PairKey, ComparisonRecord>> {
        let mut found = HashMap::with_capacity(candidates.len());
        let mut missing = Vec::new();

        for &candidate in candidates {
            let key = PairKey::new(person, candidate);
            if let Some(record) = self.memory.get(&key).or_else(|| self.pending.get(&key)) {
                found.insert(key, record.clone());
                self.stats.memory_hits += 1;
            } else {
                missing.push(lookup_for(snapshot, key));
            }
        }

        if missing.is_empty() {
            return Ok(found);
        }

        let stored = store.lookup_comparisons(run_id, &missing).await?;
        self.stats.store_hits += stored.len() as u64;
        self.stats.misses += (missing.len() - stored.len()) as u64;
        debug!(
            "Person {}: {} memory hits, {} store hits, {} misses",
            person,
            found.len(),
            stored.len(),
            missing.len() - stored.len()
        );

        for (key, record) in stored {
            self.remember(key, record.clone());
            found.insert(key, record);
        }
        Ok(found)
    }

    /// Stores a freshly computed record. It stays pending until drained for a checkpoint.
    pub fn put(&mut self, record: ComparisonRecord) {
        let key = record.key();
        self.remember(key, record.clone());
        self.pending.insert(key, record);
    }

    fn remember(&mut self, key: PairKey, record: ComparisonRecord) {
        if let Some((evicted, _)) = self.memory.push(key, record) {
            if evicted != key {
                self.stats.evictions += 1;
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Takes every uncommitted record, ordered by pair.
    pub fn drain_pending(&mut self) -> Vec<ComparisonRecord> {
        let mut records: Vec<ComparisonRecord> = self.pending.drain().map(|(_, r)| r).collect();
        records.sort_by_key(|r| r.key());
        records
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

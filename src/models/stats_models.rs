// src/models/stats_models.rs
use serde::{Deserialize, Serialize};

/// Hit/miss statistics for the two cache levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub store_hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn total_lookups(&self) -> u64 {
        self.memory_hits + self.store_hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total_lookups();
        if total == 0 {
            0.0
        } else {
            (self.memory_hits + self.store_hits) as f64 / total as f64
        }
    }
}

/// Summary of the post-run transitive-closure audit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClosureAudit {
    pub recorded_matches: usize,
    pub match_components: usize,
    /// Recorded matches whose endpoints ended up in different clusters.
    pub split_pairs: Vec<(String, String)>,
}

impl ClosureAudit {
    pub fn is_consistent(&self) -> bool {
        self.split_pairs.is_empty()
    }
}

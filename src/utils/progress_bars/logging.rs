// src/utils/progress_bars/logging.rs - Phase logging for deduplication runs
use log::{error, info, warn};
use std::time::Instant;

use crate::models::stats_models::{CacheStats, ClosureAudit};
use crate::models::RunCounters;

#[derive(Clone)]
pub struct DedupLogger {
    component: &'static str,
    emoji: &'static str,
    start_time: Instant,
}

impl DedupLogger {
    pub fn new(component: &'static str, emoji: &'static str) -> Self {
        Self {
            component,
            emoji,
            start_time: Instant::now(),
        }
    }

    pub fn run() -> Self {
        Self::new("DEDUP", "👥")
    }

    pub fn tracker() -> Self {
        Self::new("TRACKER", "🗂️")
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn log_start(&self, run_id: &str, resumed: bool, has_judge: bool) {
        info!(
            "[{}] {} 🚀 {} run {}{}",
            self.component,
            self.emoji,
            if resumed { "Resuming" } else { "Starting" },
            run_id,
            if has_judge {
                " with external judge for the review band"
            } else {
                " (external judge disabled)"
            }
        );
    }

    pub fn log_phase(&self, phase: &str, details: Option<&str>) {
        let elapsed = self.start_time.elapsed();
        match details {
            Some(details) => info!(
                "[{}] {} 🔄 Phase: {} - {} [+{:.1}s]",
                self.component,
                self.emoji,
                phase,
                details,
                elapsed.as_secs_f32()
            ),
            None => info!(
                "[{}] {} 🔄 Phase: {} [+{:.1}s]",
                self.component,
                self.emoji,
                phase,
                elapsed.as_secs_f32()
            ),
        }
    }

    pub fn log_data_loaded(&self, count: usize, data_type: &str) {
        info!(
            "[{}] {} 📊 Loaded {} {} records",
            self.component, self.emoji, count, data_type
        );
    }

    pub fn log_blocking(&self, blocks: usize, candidate_pairs: u64) {
        info!(
            "[{}] {} 🧱 {} district blocks, {} candidate pairs before skipping",
            self.component, self.emoji, blocks, candidate_pairs
        );
    }

    pub fn log_checkpoint(&self, index: usize, comparisons: usize, memberships: usize) {
        info!(
            "[{}] {} 💾 Checkpoint at person {} ({} comparisons, {} memberships flushed) [+{:.1}s]",
            self.component,
            self.emoji,
            index,
            comparisons,
            memberships,
            self.start_time.elapsed().as_secs_f32()
        );
    }

    pub fn log_checkpoint_retry(&self, attempt: u32, max_attempts: u32, err: &anyhow::Error) {
        warn!(
            "[{}] {} ⚠️  Checkpoint commit attempt {}/{} failed: {:#}",
            self.component, self.emoji, attempt, max_attempts, err
        );
    }

    pub fn log_cache_results(&self, stats: &CacheStats) {
        let total = stats.total_lookups();
        if total > 0 {
            info!(
                "[{}] {} 💾 Cache: {} memory hits, {} store hits, {} misses ({:.1}% hit rate), {} evictions",
                self.component,
                self.emoji,
                stats.memory_hits,
                stats.store_hits,
                stats.misses,
                stats.hit_rate() * 100.0,
                stats.evictions
            );
        }
    }

    pub fn log_audit(&self, audit: &ClosureAudit) {
        if audit.is_consistent() {
            info!(
                "[{}] {} 🔗 Closure audit: {} recorded matches form {} components, all reflected in clusters",
                self.component, self.emoji, audit.recorded_matches, audit.match_components
            );
        } else {
            warn!(
                "[{}] {} 🔗 Closure audit: {} recorded matches not reflected in final clusters",
                self.component,
                self.emoji,
                audit.split_pairs.len()
            );
        }
    }

    pub fn log_interrupted(&self, run_id: &str, last_index: Option<usize>) {
        warn!(
            "[{}] {} ⏸️  Run {} interrupted; checkpoint at {} (resume with --run-id {})",
            self.component,
            self.emoji,
            run_id,
            last_index.map_or_else(|| "none".to_string(), |i| i.to_string()),
            run_id
        );
    }

    pub fn log_completion(&self, counters: &RunCounters, clusters: usize, clustered_persons: usize) {
        info!(
            "[{}] {} 🎉 COMPLETED in {:.2?}: {} clusters covering {} persons",
            self.component,
            self.emoji,
            self.start_time.elapsed(),
            clusters,
            clustered_persons
        );
        info!(
            "[{}] {} 📊 Comparisons: {} ({} cached) → {} matches, {} non-matches, {} inconclusive; {} persons skipped, {} external calls",
            self.component,
            self.emoji,
            counters.comparisons,
            counters.cached,
            counters.matches,
            counters.non_matches,
            counters.inconclusive,
            counters.skipped_persons,
            counters.external_calls
        );
    }

    pub fn log_error(&self, context: &str, err: &anyhow::Error) {
        error!(
            "[{}] {} ❌ {}: {:#}",
            self.component, self.emoji, context, err
        );
    }
}

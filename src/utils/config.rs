// src/utils/config.rs
use log::info;
use std::env;

/// Run-level knobs. Read from `DEDUP_*` environment variables; CLI flags override.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Persons processed between checkpoints.
    pub checkpoint_interval: usize,
    /// Capacity of the in-process comparison LRU.
    pub cache_capacity: usize,
    /// Candidate comparisons in flight for a single person.
    pub comparison_concurrency: usize,
    /// Pending unflushed records that force an early checkpoint.
    pub max_pending: usize,
    /// Attempts at committing one checkpoint before the run aborts.
    pub checkpoint_retries: u32,
    /// Compare non-representative members too.
    pub exhaustive: bool,
    /// Reporting threshold for the result map.
    pub min_confidence: f64,
    /// Keep only the best match per person in the report.
    pub best_only: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 500,
            cache_capacity: 100_000,
            comparison_concurrency: (num_cpus::get() * 2).max(1),
            max_pending: 5_000,
            checkpoint_retries: 3,
            exhaustive: false,
            min_confidence: 0.0,
            best_only: false,
        }
    }
}

impl DedupConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let count = |key: &str, default: usize| -> usize {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
                .max(1)
        };
        let flag = |key: &str| -> bool {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(false)
        };

        Self {
            checkpoint_interval: count("DEDUP_CHECKPOINT_INTERVAL", defaults.checkpoint_interval),
            cache_capacity: count("DEDUP_CACHE_CAPACITY", defaults.cache_capacity),
            comparison_concurrency: count("DEDUP_COMPARISON_CONCURRENCY", defaults.comparison_concurrency),
            max_pending: count("DEDUP_MAX_PENDING", defaults.max_pending),
            checkpoint_retries: lookup("DEDUP_CHECKPOINT_RETRIES")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.checkpoint_retries)
                .max(1),
            exhaustive: flag("DEDUP_EXHAUSTIVE"),
            min_confidence: lookup("DEDUP_MIN_CONFIDENCE")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .unwrap_or(defaults.min_confidence)
                .clamp(0.0, 1.0),
            best_only: flag("DEDUP_BEST_ONLY"),
        }
    }

    pub fn log_config(&self) {
        info!("Deduplication configuration:");
        info!("  Checkpoint interval: {} persons", self.checkpoint_interval);
        info!("  Cache capacity: {}", self.cache_capacity);
        info!("  Comparison concurrency: {}", self.comparison_concurrency);
        info!("  Max pending records: {}", self.max_pending);
        info!("  Checkpoint retries: {}", self.checkpoint_retries);
        info!("  Exhaustive: {}", self.exhaustive);
        info!("  Min confidence: {:.2}", self.min_confidence);
        info!("  Best only: {}", self.best_only);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = DedupConfig::default();
        assert_eq!(config.checkpoint_interval, 500);
        assert_eq!(config.cache_capacity, 100_000);
        assert!(config.comparison_concurrency >= 2);
        assert_eq!(config.checkpoint_retries, 3);
        assert!(!config.exhaustive);
        assert!(!config.best_only);
    }

    #[test]
    fn test_lookup_config() {
        let vars: HashMap<&str, &str> = [
            ("DEDUP_CHECKPOINT_INTERVAL", "25"),
            ("DEDUP_CACHE_CAPACITY", "0"),
            ("DEDUP_COMPARISON_CONCURRENCY", "not-a-number"),
            ("DEDUP_CHECKPOINT_RETRIES", "5"),
            ("DEDUP_EXHAUSTIVE", "true"),
            ("DEDUP_MIN_CONFIDENCE", "1.7"),
        ]
        .into_iter()
        .collect();

        let config = DedupConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.checkpoint_interval, 25);
        assert_eq!(config.cache_capacity, 1);
        assert_eq!(
            config.comparison_concurrency,
            DedupConfig::default().comparison_concurrency
        );
        assert_eq!(config.max_pending, DedupConfig::default().max_pending);
        assert_eq!(config.checkpoint_retries, 5);
        assert!(config.exhaustive);
        assert!(!config.best_only);
        assert_eq!(config.min_confidence, 1.0);
    }

    #[test]
    fn test_empty_lookup_gives_defaults() {
        let config = DedupConfig::from_lookup(|_| None);
        let defaults = DedupConfig::default();
        assert_eq!(config.checkpoint_interval, defaults.checkpoint_interval);
        assert_eq!(config.cache_capacity, defaults.cache_capacity);
        assert_eq!(config.checkpoint_retries, defaults.checkpoint_retries);
        assert_eq!(config.min_confidence, 0.0);
    }
}

// src/utils/progress_bars/progress_config.rs

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::env;

/// Configuration for progress tracking during a deduplication run
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Whether to show progress bars at all
    pub enabled: bool,
    /// Refresh rate for progress bars in milliseconds
    pub refresh_rate_ms: u64,
    /// Whether to show memory usage in progress messages
    pub show_memory: bool,
    /// Whether to show comparison cache statistics in progress messages
    pub show_cache_stats: bool,
    /// Whether to show database connection pool statistics
    pub show_db_connection_stats: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_rate_ms: 100,
            show_memory: true,
            show_cache_stats: true,
            show_db_connection_stats: true,
        }
    }
}

impl ProgressConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env::var("PROGRESS_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            refresh_rate_ms: env::var("PROGRESS_REFRESH_RATE_MS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .unwrap_or(100),
            show_memory: env::var("PROGRESS_SHOW_MEMORY")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            show_cache_stats: env::var("PROGRESS_SHOW_CACHE_STATS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            show_db_connection_stats: env::var("PROGRESS_SHOW_DB_CONNECTIONS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
        }
    }

    /// Progress bar over the person scan, hidden when progress is disabled.
    pub fn scan_bar(&self, total: u64, start_at: u64) -> ProgressBar {
        if !self.enabled {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::with_draw_target(
            Some(total),
            ProgressDrawTarget::stderr_with_hz(self.refresh_hz()),
        );
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        pb.set_position(start_at);
        pb
    }

    fn refresh_hz(&self) -> u8 {
        let per_second = 1000 / self.refresh_rate_ms.max(1);
        per_second.clamp(1, 60) as u8
    }

    pub fn should_show_memory(&self) -> bool {
        self.enabled && self.show_memory
    }

    pub fn should_show_cache_stats(&self) -> bool {
        self.enabled && self.show_cache_stats
    }

    pub fn should_show_db_connection_stats(&self) -> bool {
        self.enabled && self.show_db_connection_stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = ProgressConfig::default();
        assert!(config.enabled);
        assert_eq!(config.refresh_rate_ms, 100);
        assert!(config.show_memory);
        assert!(config.show_cache_stats);
        assert!(config.show_db_connection_stats);
    }

    #[test]
    fn test_env_config() {
        env::set_var("PROGRESS_ENABLED", "false");
        env::set_var("PROGRESS_REFRESH_RATE_MS", "50");
        env::set_var("PROGRESS_SHOW_MEMORY", "false");
        env::set_var("PROGRESS_SHOW_CACHE_STATS", "false");
        env::set_var("PROGRESS_SHOW_DB_CONNECTIONS", "false");

        let config = ProgressConfig::from_env();
        assert!(!config.enabled);
        assert_eq!(config.refresh_rate_ms, 50);
        assert!(!config.show_memory);
        assert!(!config.show_cache_stats);
        assert!(!config.show_db_connection_stats);

        env::remove_var("PROGRESS_ENABLED");
        env::remove_var("PROGRESS_REFRESH_RATE_MS");
        env::remove_var("PROGRESS_SHOW_MEMORY");
        env::remove_var("PROGRESS_SHOW_CACHE_STATS");
        env::remove_var("PROGRESS_SHOW_DB_CONNECTIONS");
    }

    #[test]
    fn test_disabled_bar_is_hidden() {
        let config = ProgressConfig {
            enabled: false,
            ..ProgressConfig::default()
        };
        assert!(config.scan_bar(10, 0).is_hidden());
        assert!(!config.should_show_memory());
        assert!(!config.should_show_cache_stats());
    }

    #[test]
    fn test_refresh_hz_is_bounded() {
        let mut config = ProgressConfig::default();
        config.refresh_rate_ms = 0;
        assert_eq!(config.refresh_hz(), 60);
        config.refresh_rate_ms = 5000;
        assert_eq!(config.refresh_hz(), 1);
        config.refresh_rate_ms = 100;
        assert_eq!(config.refresh_hz(), 10);
    }
}

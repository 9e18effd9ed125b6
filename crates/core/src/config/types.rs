use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::orchestrator::ImportConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub youtube: YoutubeConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// YouTube Data API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct YoutubeConfig {
    /// API key for the YouTube Data API v3.
    pub api_key: String,
    /// Base URL (default: https://www.googleapis.com/youtube/v3).
    #[serde(default = "default_youtube_base_url")]
    pub base_url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Items requested per page (the API caps this at 50).
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Stop paginating after this many items.
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

fn default_youtube_base_url() -> String {
    "https://www.googleapis.com/youtube/v3".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_page_size() -> u32 {
    50
}

fn default_max_items() -> usize {
    200
}

/// Quota window for outgoing upstream requests
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Longest a caller will wait for a slot before giving up.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

fn default_max_requests() -> u32 {
    90
}

fn default_window_secs() -> u64 {
    100
}

fn default_max_wait_ms() -> u64 {
    5000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Time-to-live for cached pages in seconds.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// How often expired entries are swept, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    600 // 10 minutes
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Page fetch behaviour
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry configuration for transient upstream failures.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Maximum attempts per page (including the first).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound for a single backoff delay in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exp);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }
}

/// Catalog persistence configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Primary data file.
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
    /// Directory for timestamped backups (default: `backups/` next to the data file).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,
    /// Number of backups to keep.
    #[serde(default = "default_backup_retention")]
    pub backup_retention: usize,
    /// Quiet interval before a dirty catalog is written, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("character_bot_data.json")
}

fn default_backup_retention() -> usize {
    5
}

fn default_debounce_ms() -> u64 {
    5000
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
            backup_dir: None,
            backup_retention: default_backup_retention(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl CatalogConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Resolved backup directory.
    pub fn backup_dir(&self) -> PathBuf {
        match &self.backup_dir {
            Some(dir) => dir.clone(),
            None => self
                .path
                .parent()
                .map(|p| p.join("backups"))
                .unwrap_or_else(|| PathBuf::from("backups")),
        }
    }
}

/// Logging output
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

/// Sanitized config for display (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub youtube: SanitizedYoutubeConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub catalog: CatalogConfig,
    pub import: ImportConfig,
}

/// Sanitized YouTube config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedYoutubeConfig {
    pub base_url: String,
    pub api_key_configured: bool,
    pub timeout_secs: u64,
    pub page_size: u32,
    pub max_items: usize,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            youtube: SanitizedYoutubeConfig {
                base_url: config.youtube.base_url.clone(),
                api_key_configured: !config.youtube.api_key.is_empty(),
                timeout_secs: config.youtube.timeout_secs,
                page_size: config.youtube.page_size,
                max_items: config.youtube.max_items,
            },
            rate_limit: config.rate_limit.clone(),
            cache: config.cache.clone(),
            fetch: config.fetch.clone(),
            catalog: config.catalog.clone(),
            import: config.import.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 350,
            backoff_multiplier: 2.0,
        };
        assert_eq!(retry.delay_for(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for(3), Duration::from_millis(350));
    }

    #[test]
    fn test_backup_dir_defaults_next_to_data_file() {
        let config = CatalogConfig {
            path: PathBuf::from("/var/lib/combot/data.json"),
            ..Default::default()
        };
        assert_eq!(config.backup_dir(), PathBuf::from("/var/lib/combot/backups"));

        let config = CatalogConfig {
            backup_dir: Some(PathBuf::from("/srv/backups")),
            ..Default::default()
        };
        assert_eq!(config.backup_dir(), PathBuf::from("/srv/backups"));
    }

    #[test]
    fn test_sanitized_config_hides_api_key() {
        let config = Config {
            youtube: YoutubeConfig {
                api_key: "secret".to_string(),
                base_url: default_youtube_base_url(),
                timeout_secs: 30,
                page_size: 50,
                max_items: 200,
            },
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            fetch: FetchConfig::default(),
            catalog: CatalogConfig::default(),
            import: ImportConfig::default(),
            logging: LoggingConfig::default(),
        };

        let sanitized = SanitizedConfig::from(&config);
        assert!(sanitized.youtube.api_key_configured);
        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret"));
    }
}

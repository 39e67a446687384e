//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence
//! (highest to lowest):
//! 1. Environment variables (prefix: `HYBRIDNS_`, `__` as the nesting separator)
//! 2. Current working directory: `./config.toml`
//! 3. XDG config directory: `~/.config/hybridns/config.toml`
//! 4. System directory: `/etc/hybridns/config.toml`
//! 5. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::store::backend_libsql::{StoreConfig, StoreMode};

/// Top-level configuration, matching the external schema byte-for-byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Ambient service identity, not part of the domain schema.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Directory the resolver reads its config and zone files from.
    #[serde(default = "default_bind_etc")]
    pub bind_etc: PathBuf,

    /// Root directory for content-addressed backups.
    #[serde(default = "default_backup_root")]
    pub backup_root: PathBuf,

    /// Interval between forwarder health probe sweeps.
    #[serde(default = "default_health_probe_interval_s")]
    pub health_probe_interval_s: u32,

    /// Per-query DNS probe timeout.
    #[serde(default = "default_dns_probe_timeout_ms")]
    pub dns_probe_timeout_ms: u32,

    /// Bounded worker count for concurrent forwarder probing.
    #[serde(default = "default_health_worker_count")]
    pub health_worker_count: u16,

    /// Interval between RPZ/threat-feed refresh sweeps.
    #[serde(default = "default_feed_refresh_interval_s")]
    pub feed_refresh_interval_s: u32,

    /// Path to the resolver's query log file.
    #[serde(default = "default_query_log_path")]
    pub query_log_path: PathBuf,

    /// Flush the log ingestor's buffer at least this often.
    #[serde(default = "default_log_flush_interval_s")]
    pub log_flush_interval_s: u16,

    /// Flush the log ingestor's buffer once it reaches this many rows.
    #[serde(default = "default_log_flush_batch")]
    pub log_flush_batch: u16,

    /// Event bus configuration.
    #[serde(default)]
    pub event_bus: EventBusConfig,

    /// Backups to retain per `backup_type`, beyond which `prune()` removes the oldest.
    #[serde(default = "default_backup_retain_per_type")]
    pub backup_retain_per_type: u16,

    /// Backups older than this many days are pruned regardless of count.
    #[serde(default = "default_backup_retain_days")]
    pub backup_retain_days: u16,

    /// How long a caller may wait for the process-wide projection lock.
    #[serde(default = "default_projection_lock_timeout_s")]
    pub projection_lock_timeout_s: u16,

    /// Model store connection settings.
    #[serde(default)]
    pub store: StoreConfig,
}

/// Ambient service identity — no HTTP-specific fields (no `port`, no
/// `cors_mode`): those belonged to the teacher's HTTP surface and are out of
/// scope here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name, used for the XDG/system config directory lookup.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

/// Event bus tuning — Open Questions 3 and 4 from the design notes resolve
/// here: rate limits and default persistence are configuration, not
/// hardcoded contracts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Maximum events accumulated in one batch before a forced flush.
    #[serde(default = "default_event_max_batch_items")]
    pub max_batch_items: u16,

    /// Maximum serialised batch size in bytes before a forced flush.
    #[serde(default = "default_event_max_batch_bytes")]
    pub max_batch_bytes: u32,

    /// Maximum time a batch may accumulate before a forced flush.
    #[serde(default = "default_event_batch_timeout_ms")]
    pub batch_timeout_ms: u32,

    /// Batches at or above this serialised size are compressed.
    #[serde(default = "default_event_compression_min_bytes")]
    pub compression_min_bytes: u32,

    /// Bounded per-subscriber queue capacity.
    #[serde(default = "default_event_queue_capacity")]
    pub queue_capacity: u32,

    /// Subscribe/unsubscribe requests allowed per connection per minute.
    #[serde(default = "default_subscribe_rate_per_min")]
    pub subscribe_rate_per_min: u16,

    /// Client-facing messages allowed per connection per minute.
    #[serde(default = "default_message_rate_per_min")]
    pub message_rate_per_min: u16,

    /// Default value of `Event::persist` when an emit call site doesn't override it.
    #[serde(default = "default_true")]
    pub persist_events_by_default: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_batch_items: default_event_max_batch_items(),
            max_batch_bytes: default_event_max_batch_bytes(),
            batch_timeout_ms: default_event_batch_timeout_ms(),
            compression_min_bytes: default_event_compression_min_bytes(),
            queue_capacity: default_event_queue_capacity(),
            subscribe_rate_per_min: default_subscribe_rate_per_min(),
            message_rate_per_min: default_message_rate_per_min(),
            persist_events_by_default: true,
        }
    }
}

impl EventBusConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms as u64)
    }
}

fn default_bind_etc() -> PathBuf {
    PathBuf::from("/etc/named")
}

fn default_backup_root() -> PathBuf {
    PathBuf::from("/var/lib/hybridns/backups")
}

fn default_health_probe_interval_s() -> u32 {
    300
}

fn default_dns_probe_timeout_ms() -> u32 {
    5_000
}

fn default_health_worker_count() -> u16 {
    8
}

fn default_feed_refresh_interval_s() -> u32 {
    3_600
}

fn default_query_log_path() -> PathBuf {
    PathBuf::from("/var/log/named/query.log")
}

fn default_log_flush_interval_s() -> u16 {
    5
}

fn default_log_flush_batch() -> u16 {
    100
}

fn default_event_max_batch_items() -> u16 {
    50
}

fn default_event_max_batch_bytes() -> u32 {
    64 * 1024
}

fn default_event_batch_timeout_ms() -> u32 {
    200
}

fn default_event_compression_min_bytes() -> u32 {
    8 * 1024
}

fn default_event_queue_capacity() -> u32 {
    1_000
}

fn default_subscribe_rate_per_min() -> u16 {
    10
}

fn default_message_rate_per_min() -> u16 {
    100
}

fn default_backup_retain_per_type() -> u16 {
    20
}

fn default_backup_retain_days() -> u16 {
    30
}

fn default_projection_lock_timeout_s() -> u16 {
    30
}

fn default_service_name() -> String {
    "hybridns".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from all sources, inferring the service name from
    /// the current binary.
    pub fn load() -> Result<Self> {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(default_service_name);

        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name.
    ///
    /// This is the recommended way to load config in production.
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        tracing::debug!("searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Merge in reverse (lowest priority first) so later merges override.
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed("HYBRIDNS_").split("__"));

        let config = figment.extract()?;
        Ok(config)
    }

    /// Load configuration from a specific file, bypassing XDG directories.
    /// Useful for testing or non-standard deployments.
    pub fn load_from(path: &str) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("HYBRIDNS_").split("__"))
            .extract()?;

        Ok(config)
    }

    /// Candidate config file paths, in priority order (highest first):
    /// 1. Current working directory
    /// 2. XDG config directory
    /// 3. System directory
    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        paths.push(PathBuf::from("config.toml"));

        let xdg_dirs = xdg::BaseDirectories::with_prefix("hybridns");
        let config_file_path = Path::new(service_name).join("config.toml");
        if let Ok(path) = xdg_dirs.place_config_file(&config_file_path) {
            paths.push(path);
        }

        paths.push(PathBuf::from("/etc/hybridns").join(service_name).join("config.toml"));

        paths
    }

    /// The recommended config path for a service in production:
    /// `~/.config/hybridns/{service_name}/config.toml`.
    pub fn recommended_path(service_name: &str) -> PathBuf {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("hybridns");
        let config_file_path = Path::new(service_name).join("config.toml");

        xdg_dirs.place_config_file(&config_file_path).unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| String::from("~")))
                .join(".config/hybridns")
                .join(service_name)
                .join("config.toml")
        })
    }

    /// Create the config directory structure for a service.
    pub fn create_config_dir(service_name: &str) -> Result<PathBuf> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("hybridns");
        let config_file_path = Path::new(service_name).join("config.toml");

        let config_path = xdg_dirs
            .place_config_file(&config_file_path)
            .map_err(|e| crate::error::Error::FilesystemFailed(std::io::Error::other(format!("failed to create config directory: {e}"))))?;

        Ok(config_path
            .parent()
            .ok_or_else(|| crate::error::Error::FilesystemFailed(std::io::Error::other("invalid config path")))?
            .to_path_buf())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            bind_etc: default_bind_etc(),
            backup_root: default_backup_root(),
            health_probe_interval_s: default_health_probe_interval_s(),
            dns_probe_timeout_ms: default_dns_probe_timeout_ms(),
            health_worker_count: default_health_worker_count(),
            feed_refresh_interval_s: default_feed_refresh_interval_s(),
            query_log_path: default_query_log_path(),
            log_flush_interval_s: default_log_flush_interval_s(),
            log_flush_batch: default_log_flush_batch(),
            event_bus: EventBusConfig::default(),
            backup_retain_per_type: default_backup_retain_per_type(),
            backup_retain_days: default_backup_retain_days(),
            projection_lock_timeout_s: default_projection_lock_timeout_s(),
            store: StoreConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service.name, "hybridns");
        assert_eq!(config.health_probe_interval_s, 300);
        assert_eq!(config.event_bus.subscribe_rate_per_min, 10);
        assert_eq!(config.event_bus.message_rate_per_min, 100);
        assert!(config.event_bus.persist_events_by_default);
    }

    #[test]
    fn test_load_from_missing_file_falls_back_to_defaults() {
        let config = Config::load_from("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config.backup_retain_per_type, 20);
    }
}

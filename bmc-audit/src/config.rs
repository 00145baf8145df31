//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence
//! (highest to lowest):
//! 1. Environment variables (prefix: BMC_AUDIT_, nested keys joined with `__`,
//!    e.g. `BMC_AUDIT_SYNC__WAIT_TIMEOUT_SECS=2`)
//! 2. Current working directory: ./config.toml
//! 3. System directory: /etc/bmc-audit/config.toml
//! 4. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,

    /// Bus (NATS) configuration
    #[serde(default)]
    pub bus: BusConfig,

    /// Durability sync configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Journal scan configuration
    #[serde(default)]
    pub scan: ScanConfig,

    /// Audit file sink configuration (optional; absent means records are
    /// returned to callers only)
    #[serde(default)]
    pub sink: Option<SinkConfig>,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name (used as the NATS connection name)
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format ("text" or "json")
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Send the daemon's own log output to the systemd journal
    #[serde(default = "default_false")]
    pub journald: bool,
}

/// Bus (NATS) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// NATS server URL
    #[serde(default = "default_bus_url")]
    pub url: String,

    /// Subject the notify endpoint is served on
    #[serde(default = "default_subject")]
    pub subject: String,

    /// Queue group for the notify endpoint (one daemon answers per request)
    #[serde(default = "default_queue_group")]
    pub queue_group: String,

    /// Max reconnection attempts once connected
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: usize,

    /// Maximum retry attempts for the initial connection
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between initial-connection retries in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Client-side reply timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Durability sync configuration
///
/// The defaults match the journald contract: the store maintains a decimal
/// monotonic-microseconds marker file and flushes when its main process
/// receives SIGRTMIN+1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Path of the synchronization marker file maintained by the store
    #[serde(default = "default_marker_path")]
    pub marker_path: PathBuf,

    /// Upper bound on check/wait iterations per sync call
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// How long one wait for a marker change may block, in seconds
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,

    /// Command that asks the store to flush, as an argv vector
    #[serde(default = "default_flush_command")]
    pub flush_command: Vec<String>,
}

/// Journal scan configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Journal field holding the correlation id
    #[serde(default = "default_transaction_field")]
    pub transaction_field: String,

    /// Metadata fields extracted from matching entries
    #[serde(default = "default_metadata_fields")]
    pub fields: Vec<String>,

    /// Optional bound on how many entries one scan may examine
    #[serde(default)]
    pub max_entries: Option<u64>,

    /// Path of the journalctl binary
    #[serde(default = "default_journalctl_path")]
    pub journalctl_path: String,
}

/// Audit file sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// File the sink appends one JSON record per notification to
    pub path: PathBuf,
}

impl BusConfig {
    /// Delay between initial-connection retries as a Duration
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Client-side reply timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SyncConfig {
    /// Per-iteration wait timeout as a Duration
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Split the flush command into program and arguments
    ///
    /// Returns `None` when the command is configured empty, which disables
    /// flush requests altogether.
    pub fn flush_argv(&self) -> Option<(&str, &[String])> {
        self.flush_command
            .split_first()
            .map(|(prog, args)| (prog.as_str(), args))
    }
}

// Default value functions
fn default_service_name() -> String {
    "bmc-audit".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_false() -> bool {
    false
}

fn default_bus_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_subject() -> String {
    "bmc.audit.notify".to_string()
}

fn default_queue_group() -> String {
    "bmc-audit".to_string()
}

fn default_max_reconnects() -> usize {
    10
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    2
}

fn default_request_timeout() -> u64 {
    30
}

fn default_marker_path() -> PathBuf {
    PathBuf::from("/run/systemd/journal/synced")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_wait_timeout() -> u64 {
    5
}

fn default_flush_command() -> Vec<String> {
    [
        "systemctl",
        "kill",
        "--kill-who=main",
        "--signal=SIGRTMIN+1",
        "systemd-journald.service",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_transaction_field() -> String {
    "TRANSACTION_ID".to_string()
}

fn default_metadata_fields() -> Vec<String> {
    ["EVENT_TYPE", "EVENT_RC", "EVENT_USER", "EVENT_ADDR", "MESSAGE"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_journalctl_path() -> String {
    "journalctl".to_string()
}

impl Config {
    /// Load configuration from all sources
    ///
    /// Searches for config files in this order (first found wins over later
    /// ones): ./config.toml, then /etc/bmc-audit/config.toml. Environment
    /// variables (BMC_AUDIT_ prefix) override all file-based configs.
    pub fn load() -> Result<Self> {
        let config_paths = [
            PathBuf::from("config.toml"),
            PathBuf::from("/etc/bmc-audit/config.toml"),
        ];

        let mut figment = Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Config::default()));

        // Merge config files in reverse order (lowest priority first)
        // so that higher priority files override lower ones
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        // Environment variables have highest priority
        figment = figment.merge(Env::prefixed("BMC_AUDIT_").split("__"));

        let config = figment.extract()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// Bypasses the search order and loads directly from the given path.
    /// Useful for testing or non-standard deployments.
    pub fn load_from(path: &str) -> Result<Self> {
        let config = Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Config::default()))
            // Load from config file (if exists)
            .merge(Toml::file(path))
            // Override with environment variables
            .merge(Env::prefixed("BMC_AUDIT_").split("__"))
            .extract()?;

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            bus: BusConfig::default(),
            sync: SyncConfig::default(),
            scan: ScanConfig::default(),
            sink: None,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            journald: false,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: default_bus_url(),
            subject: default_subject(),
            queue_group: default_queue_group(),
            max_reconnects: default_max_reconnects(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            marker_path: default_marker_path(),
            max_attempts: default_max_attempts(),
            wait_timeout_secs: default_wait_timeout(),
            flush_command: default_flush_command(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            transaction_field: default_transaction_field(),
            fields: default_metadata_fields(),
            max_entries: None,
            journalctl_path: default_journalctl_path(),
        }
    }
}

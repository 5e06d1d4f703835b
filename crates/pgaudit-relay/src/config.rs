use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use audit_log::{CloudLoggingConfig, DEFAULT_LOCATION, DEFAULT_LOG_ID};
use log_tailer::{StartPosition, TailOptions, WatcherConfig, DEFAULT_CHANNEL_CAPACITY};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tail: TailConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub cloud_logging: CloudLoggingSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TailConfig {
    #[serde(default)]
    pub from_beginning: bool,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_read_interval")]
    pub read_interval_ms: u64,
    #[serde(default = "default_rotation_check")]
    pub rotation_check_secs: u64,
    #[serde(default = "default_rescan_interval")]
    pub rescan_interval_secs: u64,
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            from_beginning: false,
            retry_interval_secs: default_retry_interval(),
            read_interval_ms: default_read_interval(),
            rotation_check_secs: default_rotation_check(),
            rescan_interval_secs: default_rescan_interval(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudLoggingSection {
    #[serde(default = "default_log_id")]
    pub log_id: String,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

impl Default for CloudLoggingSection {
    fn default() -> Self {
        Self {
            log_id: default_log_id(),
            location: default_location(),
            endpoint: default_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_retry_interval() -> u64 {
    5
}

fn default_read_interval() -> u64 {
    100
}

fn default_rotation_check() -> u64 {
    5
}

fn default_rescan_interval() -> u64 {
    60
}

fn default_max_line_bytes() -> usize {
    1024 * 1024
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_log_id() -> String {
    DEFAULT_LOG_ID.to_string()
}

fn default_location() -> String {
    DEFAULT_LOCATION.to_string()
}

fn default_endpoint() -> String {
    CloudLoggingConfig::default().endpoint
}

pub fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file.
///
/// Returns `Ok(None)` when the file does not exist so the caller can fall
/// back to defaults once logging is up.
pub fn load(path: &Path) -> anyhow::Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    let config: Config = serde_yml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;

    Ok(Some(config))
}

impl Config {
    /// Reject values the tailing pipeline cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let zero = [
            ("tail.retry_interval_secs", self.tail.retry_interval_secs == 0),
            ("tail.read_interval_ms", self.tail.read_interval_ms == 0),
            ("tail.rotation_check_secs", self.tail.rotation_check_secs == 0),
            ("tail.rescan_interval_secs", self.tail.rescan_interval_secs == 0),
            ("tail.max_line_bytes", self.tail.max_line_bytes == 0),
            ("dispatch.channel_capacity", self.dispatch.channel_capacity == 0),
        ];
        if let Some((field, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            anyhow::bail!("{field} must be greater than zero");
        }
        if self.cloud_logging.log_id.is_empty() {
            anyhow::bail!("cloud_logging.log_id must not be empty");
        }
        if self.cloud_logging.location.is_empty() {
            anyhow::bail!("cloud_logging.location must not be empty");
        }
        Ok(())
    }

    /// Watcher settings for `pattern`. `from_beginning` from the command
    /// line wins over the file.
    pub fn watcher(&self, pattern: &str, from_beginning: bool) -> WatcherConfig {
        let start = if from_beginning || self.tail.from_beginning {
            StartPosition::Beginning
        } else {
            StartPosition::End
        };

        WatcherConfig {
            pattern: pattern.to_string(),
            tail: TailOptions {
                start,
                retry_interval: Duration::from_secs(self.tail.retry_interval_secs),
                read_interval: Duration::from_millis(self.tail.read_interval_ms),
                rotation_check_interval: Duration::from_secs(self.tail.rotation_check_secs),
                max_line_bytes: self.tail.max_line_bytes,
            },
            rescan_interval: Duration::from_secs(self.tail.rescan_interval_secs),
        }
    }

    pub fn cloud_logging(&self) -> CloudLoggingConfig {
        CloudLoggingConfig {
            endpoint: self.cloud_logging.endpoint.clone(),
            log_id: self.cloud_logging.log_id.clone(),
            ..CloudLoggingConfig::default()
        }
    }
}

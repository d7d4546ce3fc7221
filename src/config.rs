//! Configuration module for feedrelay.

use serde::Deserialize;
use std::path::Path;

use crate::{RelayError, Result};

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/feedrelay.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Persisted-state storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the JSON state file.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_storage_path() -> String {
    "data/feedrelay.json".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

/// Polling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Timezone the cron schedules are evaluated in (e.g. "Asia/Shanghai", "UTC").
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Maximum number of new items delivered per poll. -1 = unbounded.
    #[serde(default = "default_max_items_per_poll")]
    pub max_items_per_poll: i64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_max_items_per_poll() -> i64 {
    3
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            max_items_per_poll: default_max_items_per_poll(),
        }
    }
}

/// Feed fetch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Total request timeout in seconds.
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,
    /// Maximum number of redirects.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Maximum feed size in bytes.
    #[serde(default = "default_max_feed_size")]
    pub max_feed_size_bytes: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    20
}

fn default_total_timeout() -> u64 {
    30
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_feed_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            total_timeout_secs: default_total_timeout(),
            max_redirects: default_max_redirects(),
            max_feed_size_bytes: default_max_feed_size(),
        }
    }
}

/// Message rendering configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    /// Maximum title length in characters.
    #[serde(default = "default_title_max_length")]
    pub title_max_length: usize,
    /// Maximum description length in characters.
    #[serde(default = "default_description_max_length")]
    pub description_max_length: usize,
    /// Render the text block to a single image and drop the raw text.
    #[serde(default)]
    pub text_to_image: bool,
    /// Omit the item link from the rendered message.
    #[serde(default)]
    pub hide_url: bool,
    /// Merge all items of one tick into a single forwarded bundle
    /// (platform support permitting).
    #[serde(default = "default_compose_forward")]
    pub compose_forward: bool,
}

fn default_title_max_length() -> usize {
    30
}

fn default_description_max_length() -> usize {
    500
}

fn default_compose_forward() -> bool {
    true
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            title_max_length: default_title_max_length(),
            description_max_length: default_description_max_length(),
            text_to_image: false,
            hide_url: false,
            compose_forward: default_compose_forward(),
        }
    }
}

/// Image handling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PicConfig {
    /// Extract embedded image URLs from item content.
    #[serde(default)]
    pub enable_images: bool,
    /// Apply the per-image adjustment filter before delivery.
    #[serde(default)]
    pub adjust_images: bool,
    /// Maximum images attached per item. -1 = unbounded.
    #[serde(default = "default_max_images_per_item")]
    pub max_images_per_item: i64,
}

fn default_max_images_per_item() -> i64 {
    3
}

impl Default for PicConfig {
    fn default() -> Self {
        Self {
            enable_images: false,
            adjust_images: false,
            max_images_per_item: default_max_images_per_item(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Polling configuration.
    #[serde(default)]
    pub poll: PollConfig,
    /// Fetch configuration.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Rendering configuration.
    #[serde(default)]
    pub render: RenderConfig,
    /// Image configuration.
    #[serde(default)]
    pub pic: PicConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(RelayError::Io)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| RelayError::Config(format!("config parse error: {e}")))
    }

    /// Validate the configuration.
    ///
    /// Returns an error if the timezone is not a valid IANA name.
    pub fn validate(&self) -> Result<()> {
        if self.poll.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(RelayError::Config(format!(
                "invalid timezone: {}",
                self.poll.timezone
            )));
        }
        Ok(())
    }
}

//! Server configuration
//!
//! Loaded with the `config` crate: an optional TOML file, then environment
//! variables prefixed `RSEMS` (`RSEMS_THREADS__MEDIA_PROCESSOR_THREADS=4`).
//! Every field has a default, so an empty source is a valid configuration.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use rsems_dialog_core::{DialogConfig, TransactionConfig};
use rsems_infra_common::{CallWatcherConfig, Error, LoggingConfig, Result};
use rsems_media_core::MediaSchedulerConfig;
use serde::{Deserialize, Serialize};

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "RSEMS";

/// Complete server configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub threads: ThreadsConfig,
    pub media: MediaConfig,
    pub dialog: DialogConfig,
    pub transactions: TransactionConfig,
    pub watcher: WatcherConfig,
    pub call_control: CallControlConfig,
    pub logging: LoggingConfig,
}

/// Thread pool sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadsConfig {
    /// Workers draining session event queues
    pub session_processor_threads: usize,
    /// Media ticking threads
    pub media_processor_threads: usize,
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self {
            session_processor_threads: 10,
            media_processor_threads: 1,
        }
    }
}

/// Media clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub tick_ms: u64,
    pub sample_rate: u32,
    pub min_sleep_us: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        let scheduler = MediaSchedulerConfig::default();
        Self {
            tick_ms: scheduler.tick_ms,
            sample_rate: scheduler.sample_rate,
            min_sleep_us: scheduler.min_sleep_us,
        }
    }
}

/// Call watcher soft state timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub soft_state_expire_secs: u64,
    pub gc_interval_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            soft_state_expire_secs: 5,
            gc_interval_ms: 2000,
        }
    }
}

/// Parallel call limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallControlConfig {
    /// Concurrent call branches allowed per UUID
    pub max_parallel_calls: u32,
    pub refuse_code: u16,
    pub refuse_reason: String,
}

impl Default for CallControlConfig {
    fn default() -> Self {
        Self {
            max_parallel_calls: 1,
            refuse_code: 402,
            refuse_reason: "Too Many Simultaneous Calls".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load from an optional TOML file plus `RSEMS_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        let config: ServerConfig = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).prefix_separator("_").separator("__").try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document, without environment overrides
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: ServerConfig = toml::from_str(source).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads.session_processor_threads == 0 {
            return Err(Error::Config("session_processor_threads must be at least 1".into()));
        }
        if self.threads.media_processor_threads == 0 {
            return Err(Error::Config("media_processor_threads must be at least 1".into()));
        }
        if self.media.tick_ms == 0 {
            return Err(Error::Config("media tick_ms must be positive".into()));
        }
        if self.media.sample_rate == 0 {
            return Err(Error::Config("media sample_rate must be positive".into()));
        }
        self.transactions
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;
        if self.call_control.max_parallel_calls == 0 {
            return Err(Error::Config("max_parallel_calls must be at least 1".into()));
        }
        Ok(())
    }

    pub fn media_scheduler_config(&self) -> MediaSchedulerConfig {
        MediaSchedulerConfig {
            threads: self.threads.media_processor_threads,
            tick_ms: self.media.tick_ms,
            sample_rate: self.media.sample_rate,
            min_sleep_us: self.media.min_sleep_us,
        }
    }

    pub fn watcher_config(&self) -> CallWatcherConfig {
        CallWatcherConfig {
            soft_state_expire: Duration::from_secs(self.watcher.soft_state_expire_secs),
            gc_interval: Duration::from_millis(self.watcher.gc_interval_ms),
        }
    }
}

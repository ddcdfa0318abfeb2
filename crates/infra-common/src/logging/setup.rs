use crate::errors::types::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level name, e.g. "info" or "debug"
    pub level: String,
    /// Emit JSON lines instead of human readable text
    pub json: bool,
    /// Include file and line information
    pub file_info: bool,
    /// Log span enter/exit events
    pub spans: bool,
    /// Trace every posted and processed queue event at debug level
    pub log_events: bool,
    /// Application name for the welcome banner
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json: false,
            file_info: false,
            spans: false,
            log_events: false,
            app_name: "rsems".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level: level.into(),
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.spans = true;
        self
    }

    pub fn with_event_logging(mut self) -> Self {
        self.log_events = true;
        self
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` directives are honoured on top of the configured level.
/// Installing twice is reported as [`Error::Logging`].
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let level = parse_log_level(&config.level)?;
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let span_events = if config.spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let mut builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_thread_names(true);

    if config.file_info {
        builder = builder.with_file(true).with_line_number(true);
    }

    let installed = if config.json {
        builder.with_writer(std::io::stdout).json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| Error::Logging(e.to_string()))
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level.trim())
        .map_err(|_| Error::Config(format!("Invalid log level: {}", level)))
}

/// Log a welcome message with version info
pub fn log_welcome(app_name: &str, version: &str) {
    tracing::info!("Starting {} v{}", app_name, version);
}

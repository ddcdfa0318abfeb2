//! # rsems-infra-common
//!
//! Shared infrastructure for the rsems crates:
//!
//! - [`errors`]: the infra error type and context helpers
//! - [`logging`]: `tracing` subscriber setup
//! - [`events`]: event queues and the worker pool draining them
//! - [`watcher`]: the call status watcher

pub mod errors;
pub mod events;
pub mod logging;
pub mod watcher;

pub use errors::{Error, ErrorContext, ErrorExt, Result};
pub use events::{
    EventHandler, EventNotificationSink, EventQueue, EventQueueProcessor, FnHandler, ProcessableQueue,
};
pub use logging::{log_welcome, parse_log_level, setup_logging, LoggingConfig};
pub use watcher::{CallStatus, CallStatusEvent, CallWatcher, CallWatcherConfig};

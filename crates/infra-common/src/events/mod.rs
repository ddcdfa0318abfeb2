//! Event queues and the worker pool that drives them

pub mod processor;
pub mod queue;

pub use processor::EventQueueProcessor;
pub use queue::{EventHandler, EventNotificationSink, EventQueue, FnHandler, ProcessableQueue};

//! # rsems - SIP dialog and media scheduling server core
//!
//! The umbrella crate wires the building blocks into a running server:
//!
//! - [`sip_core`]: SIP message model
//! - [`dialog_core`]: transactions and dialogs
//! - [`media_core`]: sample buffers, mixing and the media scheduler
//! - [`infra_common`]: event queues, worker pool, call watcher, logging
//!
//! On top of these it provides the [`config`] layer, [`call_control`]
//! admission, the [`session`] container that routes SIP messages to call
//! legs, and the [`context::ServerContext`] owning all of it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rsems::prelude::*;
//!
//! struct Echo;
//!
//! impl CallLogic for Echo {
//!     fn on_request(&mut self, dialog: &mut Dialog, req: &SipRequest) -> DialogResult<()> {
//!         dialog.reply(req, 200, "OK", MessageOptions::default())
//!     }
//! }
//!
//! struct EchoFactory;
//!
//! impl SessionFactory for EchoFactory {
//!     fn create(&self, _req: &SipRequest, _services: &SessionServices) -> Result<Box<dyn CallLogic>, Refusal> {
//!         Ok(Box::new(Echo))
//!     }
//! }
//!
//! # fn transport() -> Arc<dyn MessageSender> { unimplemented!() }
//! let config = ServerConfig::load(None)?;
//! let server = ServerContext::start(config, transport(), Arc::new(EchoFactory))?;
//! // feed received messages to server.sessions().dispatch_request(..)
//! server.shutdown();
//! # Ok::<(), anyhow::Error>(())
//! ```

pub use rsems_dialog_core as dialog_core;
pub use rsems_infra_common as infra_common;
pub use rsems_media_core as media_core;
pub use rsems_sip_core as sip_core;

pub mod call_control;
pub mod config;
pub mod context;
pub mod session;

pub use call_control::{Admission, ParallelCallLimiter};
pub use config::ServerConfig;
pub use context::ServerContext;

/// Commonly used types
pub mod prelude {
    pub use crate::call_control::{Admission, ParallelCallLimiter};
    pub use crate::config::ServerConfig;
    pub use crate::context::ServerContext;
    pub use crate::session::{
        CallLeg, CallLogic, Dispatch, LegStatus, Refusal, SessionContainer, SessionEvent, SessionFactory,
        SessionServices,
    };
    pub use rsems_dialog_core::{
        Dialog, DialogKey, DialogResult, DialogStatus, MessageOptions, MessageSender, TransactionTable,
    };
    pub use rsems_media_core::{MediaScheduler, MediaSession};
    pub use rsems_sip_core::{Method, SipReply, SipRequest};
}

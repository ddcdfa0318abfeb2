//! # rsems-dialog-core
//!
//! SIP transaction tracking and the dialog state machine.
//!
//! ```text
//! transport ──► TransactionTable (match / create) ──► Dialog (status, hooks) ──► session queue
//!                        ▲                                   │
//!                        └──────── MessageSender ◄───────────┘
//! ```
//!
//! - [`transaction::TransactionTable`]: bucket-locked store of in-flight
//!   transactions, shared by all dialogs of a process
//! - [`dialog::Dialog`]: per-call-leg state machine; consults
//!   [`dialog::DialogPolicy`] strategy objects and reports to a
//!   [`events::DialogEventHandler`]
//! - [`transport::MessageSender`]: the outbound boundary

pub mod config;
pub mod dialog;
pub mod errors;
pub mod events;
pub mod transaction;
pub mod transport;

pub use config::{DialogConfig, TransactionConfig};
pub use dialog::{Dialog, DialogId, DialogPolicy, DialogStatus, MessageOptions, RxReply, RxRequest, SanityVerdict};
pub use errors::{DialogError, DialogResult};
pub use events::DialogEventHandler;
pub use transaction::{DialogKey, ExpiredTransaction, TransactionId, TransactionTable, TransactionType};
pub use transport::MessageSender;

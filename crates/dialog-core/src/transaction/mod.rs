//! SIP transaction bookkeeping
//!
//! The [`TransactionTable`] owns every transaction. Dialogs keep only
//! [`TransactionId`] handles and look transactions up again on each use.

pub mod table;
pub mod types;
pub mod utils;

pub use table::TransactionTable;
pub use types::{
    DialogKey, ExpiredTransaction, Transaction, TransactionId, TransactionState, TransactionSummary,
    TransactionType,
};
pub use utils::{generate_branch, generate_tag};

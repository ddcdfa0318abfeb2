//! Dialog status
//!
//! The legal path is
//! `Disconnected → Trying → Proceeding → {Cancelling | Early} → Connected → Disconnecting → Disconnected`.

use std::fmt;
use serde::{Serialize, Deserialize};

/// Status of a dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DialogStatus {
    /// No call, initial and terminal status
    Disconnected,

    /// INVITE sent or received, nothing answered yet
    Trying,

    /// 100 Trying seen
    Proceeding,

    /// CANCEL sent or received for the pending INVITE
    Cancelling,

    /// Provisional reply with To-tag seen
    Early,

    /// 2xx to INVITE seen
    Connected,

    /// BYE sent or received
    Disconnecting,
}

impl fmt::Display for DialogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialogStatus::Disconnected => write!(f, "Disconnected"),
            DialogStatus::Trying => write!(f, "Trying"),
            DialogStatus::Proceeding => write!(f, "Proceeding"),
            DialogStatus::Cancelling => write!(f, "Cancelling"),
            DialogStatus::Early => write!(f, "Early"),
            DialogStatus::Connected => write!(f, "Connected"),
            DialogStatus::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

impl DialogStatus {
    /// An INVITE exchange is running and not yet answered finally
    pub fn is_pending_setup(&self) -> bool {
        matches!(self, DialogStatus::Trying | DialogStatus::Proceeding | DialogStatus::Early)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, DialogStatus::Connected)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, DialogStatus::Disconnected)
    }

    /// Requests may be sent within the dialog
    pub fn is_active(&self) -> bool {
        matches!(self, DialogStatus::Early | DialogStatus::Connected)
    }
}

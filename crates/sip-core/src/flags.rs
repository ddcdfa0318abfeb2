//! Send-time flags altering how a dialog builds an outgoing message

use serde::{Deserialize, Serialize};

/// Flags accepted by `send_request` / `send_reply`.
///
/// Each flag suppresses one piece of automatic message decoration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SendFlags {
    /// Send the message exactly as given, no header rewriting at all
    pub verbatim: bool,
    /// Do not add credentials
    pub no_auth: bool,
    /// Do not add a Contact header
    pub no_contact: bool,
    /// Do not add a local To-tag on replies
    pub no_tag: bool,
    /// Do not blacklist the destination on transport failure
    pub no_blacklist: bool,
}

impl SendFlags {
    /// No flag set
    pub const NONE: SendFlags = SendFlags {
        verbatim: false,
        no_auth: false,
        no_contact: false,
        no_tag: false,
        no_blacklist: false,
    };

    pub fn verbatim() -> Self {
        Self { verbatim: true, ..Self::NONE }
    }

    pub fn with_no_contact(mut self) -> Self {
        self.no_contact = true;
        self
    }

    pub fn with_no_tag(mut self) -> Self {
        self.no_tag = true;
        self
    }

    pub fn with_no_auth(mut self) -> Self {
        self.no_auth = true;
        self
    }

    pub fn with_no_blacklist(mut self) -> Self {
        self.no_blacklist = true;
        self
    }
}

//! # rsems-sip-core
//!
//! SIP message model shared by the dialog, media and server crates.
//!
//! The types here are deliberately plain: a request or reply carries the
//! identifiers that transaction matching and dialog state depend on
//! (Call-ID, tags, CSeq, Via branch, RAck/RSeq) as typed fields, and keeps
//! all other headers in an ordered [`Headers`] list.

pub mod error;
pub mod flags;
pub mod headers;
pub mod message;
pub mod method;
pub mod status;

pub use error::{Error, Result};
pub use flags::SendFlags;
pub use headers::{Header, Headers};
pub use message::{Endpoints, RAck, SipReply, SipRequest, RFC3261_BRANCH_COOKIE};
pub use method::Method;

/// Commonly used imports
pub mod prelude {
    pub use crate::flags::SendFlags;
    pub use crate::headers::Headers;
    pub use crate::message::{SipReply, SipRequest};
    pub use crate::method::Method;
    pub use crate::status;
}

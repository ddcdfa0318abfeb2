//! # SIP Request and Reply
//!
//! Parsed representations of SIP messages as the dialog layer sees them.
//! Wire parsing is left to the transport; the structs here carry the fields
//! that transaction matching and dialog state need, plus the remaining
//! headers and body untouched.
//!
//! ## Examples
//!
//! ```
//! use rsems_sip_core::{Method, SipRequest, SipReply};
//!
//! let invite = SipRequest::new(Method::Invite, "sip:bob@example.com", "call-1", 1)
//!     .with_from("<sip:alice@example.com>", "a1")
//!     .with_branch("z9hG4bK776asdhds");
//!
//! let ringing = SipReply::from_request(&invite, 180, "Ringing").with_to_tag("b1");
//! assert_eq!(ringing.cseq_method, Method::Invite);
//! assert!(ringing.is_provisional());
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::method::Method;
use crate::status;

/// Magic cookie identifying RFC 3261 branch parameters
pub const RFC3261_BRANCH_COOKIE: &str = "z9hG4bK";

/// Content of a RAck header (RFC 3262)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RAck {
    /// RSeq of the acknowledged provisional reply
    pub rseq: u32,
    /// CSeq number of the INVITE the provisional reply belongs to
    pub cseq: u32,
    /// Method of that request, normally INVITE
    pub method: Method,
}

/// Network endpoint information of a received or sent message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub remote_ip: String,
    pub remote_port: u16,
    pub local_ip: String,
    pub local_port: u16,
    /// Transport name, e.g. "udp"
    pub transport: String,
}

/// A SIP request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SipRequest {
    pub method: Method,
    /// Request-URI
    pub r_uri: String,
    /// Full From header value without the tag parameter
    pub from: String,
    pub from_tag: String,
    /// Full To header value without the tag parameter
    pub to: String,
    /// Empty for dialog-creating requests
    pub to_tag: String,
    pub call_id: String,
    pub cseq: u32,
    /// RAck content, PRACK only
    pub rack: Option<RAck>,
    /// Branch parameter of the topmost Via
    pub via_branch: String,
    /// Complete Via header list as received
    pub vias: String,
    pub max_forwards: u32,
    pub contact: String,
    pub route: String,
    /// Remaining headers
    pub hdrs: Headers,
    pub content_type: String,
    #[serde(skip)]
    pub body: Bytes,
    pub endpoints: Endpoints,
}

impl SipRequest {
    /// Create a request with the fields every request needs
    pub fn new(method: Method, r_uri: impl Into<String>, call_id: impl Into<String>, cseq: u32) -> Self {
        Self {
            method,
            r_uri: r_uri.into(),
            from: String::new(),
            from_tag: String::new(),
            to: String::new(),
            to_tag: String::new(),
            call_id: call_id.into(),
            cseq,
            rack: None,
            via_branch: String::new(),
            vias: String::new(),
            max_forwards: 70,
            contact: String::new(),
            route: String::new(),
            hdrs: Headers::new(),
            content_type: String::new(),
            body: Bytes::new(),
            endpoints: Endpoints::default(),
        }
    }

    pub fn with_from(mut self, from: impl Into<String>, tag: impl Into<String>) -> Self {
        self.from = from.into();
        self.from_tag = tag.into();
        self
    }

    pub fn with_to(mut self, to: impl Into<String>, tag: impl Into<String>) -> Self {
        self.to = to.into();
        self.to_tag = tag.into();
        self
    }

    pub fn with_to_tag(mut self, tag: impl Into<String>) -> Self {
        self.to_tag = tag.into();
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.via_branch = branch.into();
        self
    }

    pub fn with_rack(mut self, rseq: u32, cseq: u32, method: Method) -> Self {
        self.rack = Some(RAck { rseq, cseq, method });
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.hdrs.add(name, value);
        self
    }

    pub fn with_body(mut self, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.content_type = content_type.into();
        self.body = body.into();
        self
    }

    /// Whether the topmost Via carries an RFC 3261 branch
    pub fn has_rfc3261_branch(&self) -> bool {
        self.via_branch.starts_with(RFC3261_BRANCH_COOKIE)
    }

    /// Whether the request is sent within an existing dialog
    pub fn is_in_dialog(&self) -> bool {
        !self.to_tag.is_empty()
    }

    /// Check the fields transaction matching relies on
    pub fn validate(&self) -> Result<()> {
        if self.call_id.is_empty() {
            return Err(Error::MissingField("Call-ID"));
        }
        if self.r_uri.is_empty() {
            return Err(Error::MissingField("Request-URI"));
        }
        if self.method == Method::Prack && self.rack.is_none() {
            return Err(Error::MissingField("RAck"));
        }
        Ok(())
    }
}

/// A SIP reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SipReply {
    pub code: u16,
    pub reason: String,
    pub from: String,
    pub from_tag: String,
    pub to: String,
    pub to_tag: String,
    /// URI taken from the To header
    pub to_uri: String,
    pub call_id: String,
    pub cseq: u32,
    /// Method of the request this reply answers
    pub cseq_method: Method,
    /// RSeq of a reliable provisional reply, 0 otherwise
    pub rseq: u32,
    /// Branch parameter of the topmost Via
    pub via_branch: String,
    pub contact: String,
    pub route: String,
    pub hdrs: Headers,
    pub content_type: String,
    #[serde(skip)]
    pub body: Bytes,
    pub endpoints: Endpoints,
}

impl SipReply {
    /// Build a reply answering `req`.
    ///
    /// Dialog identifiers, CSeq and the Via branch are copied; the To-tag is
    /// the request's (empty for dialog-creating requests).
    pub fn from_request(req: &SipRequest, code: u16, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            code,
            reason: if reason.is_empty() { status::reason_phrase(code).to_string() } else { reason },
            from: req.from.clone(),
            from_tag: req.from_tag.clone(),
            to: req.to.clone(),
            to_tag: req.to_tag.clone(),
            to_uri: req.r_uri.clone(),
            call_id: req.call_id.clone(),
            cseq: req.cseq,
            cseq_method: req.method.clone(),
            rseq: 0,
            via_branch: req.via_branch.clone(),
            contact: String::new(),
            route: String::new(),
            hdrs: Headers::new(),
            content_type: String::new(),
            body: Bytes::new(),
            endpoints: req.endpoints.clone(),
        }
    }

    pub fn with_to_tag(mut self, tag: impl Into<String>) -> Self {
        self.to_tag = tag.into();
        self
    }

    pub fn with_rseq(mut self, rseq: u32) -> Self {
        self.rseq = rseq;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.hdrs.add(name, value);
        self
    }

    pub fn with_body(mut self, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.content_type = content_type.into();
        self.body = body.into();
        self
    }

    pub fn is_provisional(&self) -> bool {
        status::is_provisional(self.code)
    }

    pub fn is_final(&self) -> bool {
        status::is_final(self.code)
    }

    pub fn is_success(&self) -> bool {
        status::is_success(self.code)
    }

    /// Reject codes outside 100..=699 and missing identifiers
    pub fn validate(&self) -> Result<()> {
        if !status::is_valid(self.code) {
            return Err(Error::InvalidStatusCode(self.code));
        }
        if self.call_id.is_empty() {
            return Err(Error::MissingField("Call-ID"));
        }
        Ok(())
    }
}

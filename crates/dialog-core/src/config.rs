//! Dialog and transaction layer configuration

use std::time::Duration;

use rsems_sip_core::Method;
use serde::{Deserialize, Serialize};

use crate::errors::{DialogError, DialogResult};

/// Per-dialog behaviour switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogConfig {
    /// Max-Forwards value put on locally generated requests
    pub max_forwards: u32,

    /// Accept NOTIFY with a remote CSeq lower than the last one seen
    pub ignore_notify_lower_cseq: bool,

    /// Further methods for which a lower remote CSeq is tolerated
    pub lower_cseq_methods: Vec<Method>,

    /// Accept 2xx from a fork with a different To-tag
    pub accept_forked_dialogs: bool,

    /// ACK 2xx replies to INVITE automatically
    pub auto_ack_2xx: bool,

    /// Value of the User-Agent / Server header, if any
    pub signature: Option<String>,

    /// Outbound proxy URI for requests without a route set
    pub outbound_proxy: Option<String>,

    /// Use the outbound proxy for in-dialog requests as well
    pub force_outbound_proxy: bool,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            max_forwards: 70,
            ignore_notify_lower_cseq: false,
            lower_cseq_methods: Vec::new(),
            accept_forked_dialogs: true,
            auto_ack_2xx: true,
            signature: None,
            outbound_proxy: None,
            force_outbound_proxy: false,
        }
    }
}

impl DialogConfig {
    /// Whether a request with `method` may carry a CSeq lower than the last one
    pub fn tolerates_lower_cseq(&self, method: &Method) -> bool {
        (self.ignore_notify_lower_cseq && *method == Method::Notify)
            || self.lower_cseq_methods.contains(method)
    }
}

/// Transaction table sizing and timers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Number of hash buckets, must be a power of two
    pub bucket_count: usize,
    /// RFC 3261 T1 in milliseconds
    pub t1_ms: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            bucket_count: 65536,
            t1_ms: 500,
        }
    }
}

impl TransactionConfig {
    pub fn t1(&self) -> Duration {
        Duration::from_millis(self.t1_ms)
    }

    /// Timer B/F: how long a client transaction may wait for a final reply
    pub fn transaction_timeout(&self) -> Duration {
        self.t1() * 64
    }

    pub fn validate(&self) -> DialogResult<()> {
        if self.bucket_count == 0 || !self.bucket_count.is_power_of_two() {
            return Err(DialogError::configuration(format!(
                "bucket_count must be a power of two, got {}",
                self.bucket_count
            )));
        }
        if self.t1_ms == 0 {
            return Err(DialogError::configuration("t1_ms must be greater than zero"));
        }
        Ok(())
    }
}

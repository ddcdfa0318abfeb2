//! # Transaction Table
//!
//! Hash-bucketed store of in-flight transactions. A transaction lives in the
//! bucket selected by `hash(call-id, cseq)`; every bucket has its own lock,
//! and collisions are resolved by a linear scan of the bucket's list.
//!
//! ## Matching rules
//!
//! | message | matched against | rule |
//! |---------|-----------------|------|
//! | request, RFC 3261 branch | same role | branch + method (ACK matches INVITE) |
//! | request, RFC 2543 | same role | call-id + cseq + from-tag + method |
//! | ACK for a 2xx | UAS INVITE | call-id + cseq + from-tag + to-tag, reply 2xx |
//! | reply | UAC | branch + CSeq method, RFC 2543 fallback as above |
//! | PRACK | UAS INVITE | call-id + RAck cseq + tags + RSeq |
//!
//! An ACK for a 2xx never gets a transaction of its own: it is resolved by
//! [`TransactionTable::match_200_ack`], which consumes the INVITE entry.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rsems_sip_core::{status, Method, SipReply, SipRequest};
use tracing::{debug, trace};

use super::types::{
    DialogKey, ExpiredTransaction, Transaction, TransactionId, TransactionState, TransactionSummary,
    TransactionType,
};
use crate::config::TransactionConfig;
use crate::errors::DialogResult;

#[derive(Default)]
struct Bucket {
    entries: Vec<Transaction>,
}

impl Bucket {
    fn find(&self, key: u64) -> Option<&Transaction> {
        self.entries.iter().find(|t| t.key == key)
    }

    fn find_mut(&mut self, key: u64) -> Option<&mut Transaction> {
        self.entries.iter_mut().find(|t| t.key == key)
    }

    fn remove(&mut self, key: u64) -> Option<Transaction> {
        let pos = self.entries.iter().position(|t| t.key == key)?;
        Some(self.entries.remove(pos))
    }
}

fn method_matches(trans: &Transaction, method: &Method) -> bool {
    match method {
        Method::Ack => trans.is_invite(),
        m => trans.method() == m,
    }
}

/// Bucket-locked store of SIP transactions
pub struct TransactionTable {
    buckets: Vec<Mutex<Bucket>>,
    mask: usize,
    next_key: AtomicU64,
    timeout: Duration,
}

impl TransactionTable {
    /// Create a table; `bucket_count` must be a power of two
    pub fn new(config: &TransactionConfig) -> DialogResult<Self> {
        config.validate()?;
        let buckets = (0..config.bucket_count).map(|_| Mutex::new(Bucket::default())).collect();

        Ok(TransactionTable {
            buckets,
            mask: config.bucket_count - 1,
            next_key: AtomicU64::new(1),
            timeout: config.transaction_timeout(),
        })
    }

    /// Bucket selected for a call-id / cseq pair
    pub fn bucket_index(&self, call_id: &str, cseq: u32) -> usize {
        let mut hasher = DefaultHasher::new();
        call_id.hash(&mut hasher);
        cseq.hash(&mut hasher);
        (hasher.finish() as usize) & self.mask
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Find the transaction a received or sent request belongs to.
    ///
    /// `None` means the caller should create a new one. For an ACK the
    /// INVITE transaction is returned, whether the ACK is for a 2xx (pass it
    /// on to [`match_200_ack`](Self::match_200_ack)) or for a negative reply.
    pub fn match_request(&self, req: &SipRequest, trans_type: TransactionType) -> Option<TransactionId> {
        let bucket_idx = self.bucket_index(&req.call_id, req.cseq);
        let bucket = self.buckets[bucket_idx].lock();

        let found = bucket.entries.iter().find(|t| {
            if t.trans_type != trans_type || !method_matches(t, &req.method) {
                return false;
            }
            if req.has_rfc3261_branch() {
                t.branch() == req.via_branch
            } else {
                t.call_id() == req.call_id && t.cseq() == req.cseq && t.request.from_tag == req.from_tag
            }
        });

        let found = found.or_else(|| {
            if req.method != Method::Ack {
                return None;
            }
            // ACK for a 2xx carries a fresh branch
            bucket.entries.iter().find(|t| Self::is_200_ack_for(t, req))
        });

        found.map(|t| TransactionId { bucket: bucket_idx, key: t.key })
    }

    fn is_200_ack_for(trans: &Transaction, ack: &SipRequest) -> bool {
        trans.trans_type == TransactionType::Uas
            && trans.is_invite()
            && status::is_success(trans.reply_code)
            && trans.call_id() == ack.call_id
            && trans.cseq() == ack.cseq
            && trans.request.from_tag == ack.from_tag
            && trans.to_tag == ack.to_tag
    }

    /// Find the UAC transaction a reply answers
    pub fn match_reply(&self, reply: &SipReply) -> Option<TransactionId> {
        let bucket_idx = self.bucket_index(&reply.call_id, reply.cseq);
        let bucket = self.buckets[bucket_idx].lock();
        let rfc3261 = reply.via_branch.starts_with(rsems_sip_core::RFC3261_BRANCH_COOKIE);

        bucket
            .entries
            .iter()
            .find(|t| {
                if t.trans_type != TransactionType::Uac || *t.method() != reply.cseq_method {
                    return false;
                }
                if rfc3261 {
                    t.branch() == reply.via_branch
                } else {
                    t.call_id() == reply.call_id
                        && t.cseq() == reply.cseq
                        && t.request.from_tag == reply.from_tag
                }
            })
            .map(|t| TransactionId { bucket: bucket_idx, key: t.key })
    }

    /// Find the UAS INVITE transaction whose reliable provisional reply a
    /// PRACK acknowledges
    pub fn match_1xx_prack(&self, prack: &SipRequest) -> Option<TransactionId> {
        let rack = prack.rack.as_ref()?;
        let bucket_idx = self.bucket_index(&prack.call_id, rack.cseq);
        let bucket = self.buckets[bucket_idx].lock();

        bucket
            .entries
            .iter()
            .find(|t| {
                t.trans_type == TransactionType::Uas
                    && *t.method() == rack.method
                    && t.call_id() == prack.call_id
                    && t.cseq() == rack.cseq
                    && t.request.from_tag == prack.from_tag
                    && t.to_tag == prack.to_tag
                    && t.rseq == rack.rseq
                    && status::is_provisional(t.reply_code)
            })
            .map(|t| TransactionId { bucket: bucket_idx, key: t.key })
    }

    /// Resolve an ACK against the INVITE transaction `id`.
    ///
    /// Returns `true` if the ACK acknowledges the 2xx of that transaction;
    /// the INVITE transaction is then consumed. No entry is ever created for
    /// the ACK itself.
    pub fn match_200_ack(&self, id: TransactionId, ack: &SipRequest) -> bool {
        let Some(slot) = self.buckets.get(id.bucket) else {
            return false;
        };
        let mut bucket = slot.lock();

        let is_200_ack = bucket.find(id.key).is_some_and(|t| Self::is_200_ack_for(t, ack));
        if is_200_ack {
            bucket.remove(id.key);
            trace!(call_id = %ack.call_id, cseq = ack.cseq, "ACK for 2xx consumed INVITE transaction");
        }
        is_200_ack
    }

    /// Insert a new transaction for `req`, owned by dialog `dialog`
    pub fn add_trans(&self, req: &SipRequest, trans_type: TransactionType, dialog: &DialogKey) -> TransactionId {
        let bucket_idx = self.bucket_index(&req.call_id, req.cseq);
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);

        let trans = Transaction {
            key,
            trans_type,
            state: TransactionState::Trying,
            request: req.clone(),
            dialog: dialog.clone(),
            to_tag: String::new(),
            reply_code: 0,
            rseq: 0,
            last_reply: None,
            deadline: Instant::now() + self.timeout,
        };

        self.buckets[bucket_idx].lock().entries.push(trans);
        trace!(call_id = %req.call_id, cseq = req.cseq, method = %req.method, %trans_type, "added transaction");
        TransactionId { bucket: bucket_idx, key }
    }

    /// Latest UAC INVITE transaction of a dialog for the given CSeq
    pub fn find_uac_trans(&self, dialog: &DialogKey, inv_cseq: u32) -> Option<TransactionId> {
        let bucket_idx = self.bucket_index(&dialog.call_id, inv_cseq);
        let bucket = self.buckets[bucket_idx].lock();

        bucket
            .entries
            .iter()
            .rev()
            .find(|t| {
                t.trans_type == TransactionType::Uac
                    && t.is_invite()
                    && t.cseq() == inv_cseq
                    && t.dialog == *dialog
            })
            .map(|t| TransactionId { bucket: bucket_idx, key: t.key })
    }

    /// Record a reply sent (UAS) or received (UAC) on transaction `id`.
    ///
    /// A final reply completes the transaction; it then lingers for
    /// retransmission handling until its deadline.
    pub fn update_reply(&self, id: TransactionId, reply: &SipReply) -> bool {
        let Some(slot) = self.buckets.get(id.bucket) else {
            return false;
        };
        let mut bucket = slot.lock();
        let Some(trans) = bucket.find_mut(id.key) else {
            return false;
        };

        trans.reply_code = reply.code;
        if !reply.to_tag.is_empty() {
            trans.to_tag = reply.to_tag.clone();
        }
        if reply.rseq != 0 {
            trans.rseq = reply.rseq;
        }
        if reply.is_final() {
            trans.state = TransactionState::Completed;
            trans.deadline = Instant::now() + self.timeout;
        } else {
            trans.state = TransactionState::Proceeding;
        }
        if trans.trans_type == TransactionType::Uas {
            trans.last_reply = Some(reply.clone());
        }
        true
    }

    /// Run `f` on transaction `id` if it still exists
    pub fn with_transaction<R>(&self, id: TransactionId, f: impl FnOnce(&mut Transaction) -> R) -> Option<R> {
        let mut bucket = self.buckets.get(id.bucket)?.lock();
        bucket.find_mut(id.key).map(f)
    }

    /// Copy of transaction `id`
    pub fn get(&self, id: TransactionId) -> Option<Transaction> {
        self.buckets.get(id.bucket)?.lock().find(id.key).cloned()
    }

    pub fn contains(&self, id: TransactionId) -> bool {
        self.buckets.get(id.bucket).is_some_and(|b| b.lock().find(id.key).is_some())
    }

    pub fn remove(&self, id: TransactionId) -> Option<Transaction> {
        let removed = self.buckets.get(id.bucket)?.lock().remove(id.key);
        if let Some(trans) = &removed {
            trace!(call_id = %trans.call_id(), cseq = trans.cseq(), "removed transaction");
        }
        removed
    }

    /// Remove every transaction whose deadline passed.
    ///
    /// Completed transactions are dropped quietly; the ones still waiting
    /// for a final reply are returned so their dialogs can be told.
    pub fn collect_expired(&self, now: Instant) -> Vec<ExpiredTransaction> {
        let mut expired = Vec::new();

        for slot in &self.buckets {
            let mut bucket = slot.lock();
            if bucket.entries.is_empty() {
                continue;
            }
            bucket.entries.retain(|t| {
                if t.deadline > now {
                    return true;
                }
                if t.state.is_pending() {
                    expired.push(ExpiredTransaction {
                        trans_type: t.trans_type,
                        dialog: t.dialog.clone(),
                        method: t.method().clone(),
                        cseq: t.cseq(),
                        request: t.request.clone(),
                    });
                }
                false
            });
        }

        if !expired.is_empty() {
            debug!("{} transactions timed out", expired.len());
        }
        expired
    }

    /// Total number of stored transactions
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.lock().entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all transactions
    pub fn summaries(&self) -> Vec<TransactionSummary> {
        let mut out = Vec::new();
        for (bucket_idx, slot) in self.buckets.iter().enumerate() {
            for t in &slot.lock().entries {
                out.push(TransactionSummary {
                    id: TransactionId { bucket: bucket_idx, key: t.key },
                    trans_type: t.trans_type,
                    state: t.state,
                    method: t.method().to_string(),
                    call_id: t.call_id().to_string(),
                    cseq: t.cseq(),
                    reply_code: t.reply_code,
                });
            }
        }
        out
    }

    /// Log all transactions at debug level
    pub fn dump(&self) {
        let all = self.summaries();
        debug!("transaction table: {} entries", all.len());
        for t in all {
            debug!(
                id = %t.id, trans_type = %t.trans_type, state = ?t.state,
                method = %t.method, call_id = %t.call_id, cseq = t.cseq, code = t.reply_code,
                "transaction"
            );
        }
    }
}

//! Parallel call limiting
//!
//! Each UUID (account, trunk, ...) may have at most `max_parallel_calls`
//! call branches up at once. A branch is identified by its leg tag, so a
//! retried `start` for a branch that is already counted is admitted again
//! without counting it twice, and `end` only releases branches that were
//! admitted.

use std::collections::HashSet;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::config::CallControlConfig;

/// Outcome of [`ParallelCallLimiter::start`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Refuse { code: u16, reason: String },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admit)
    }
}

/// Strict cap on concurrent call branches per UUID
#[derive(Debug)]
pub struct ParallelCallLimiter {
    config: CallControlConfig,
    branches: DashMap<String, HashSet<String>>,
}

impl ParallelCallLimiter {
    pub fn new(config: CallControlConfig) -> Self {
        Self {
            config,
            branches: DashMap::new(),
        }
    }

    /// Count branch `ltag` against `uuid`
    pub fn start(&self, uuid: &str, ltag: &str) -> Admission {
        let max = self.config.max_parallel_calls as usize;
        match self.branches.entry(uuid.to_string()) {
            Entry::Occupied(mut entry) => {
                let active = entry.get_mut();
                if active.contains(ltag) {
                    return Admission::Admit;
                }
                if active.len() >= max {
                    info!(uuid, ltag, active = active.len(), max, "parallel call limit reached");
                    return Admission::Refuse {
                        code: self.config.refuse_code,
                        reason: self.config.refuse_reason.clone(),
                    };
                }
                active.insert(ltag.to_string());
                debug!(uuid, ltag, active = active.len(), "call branch admitted");
            }
            Entry::Vacant(entry) => {
                if max == 0 {
                    return Admission::Refuse {
                        code: self.config.refuse_code,
                        reason: self.config.refuse_reason.clone(),
                    };
                }
                entry.insert(HashSet::from([ltag.to_string()]));
                debug!(uuid, ltag, active = 1, "call branch admitted");
            }
        }
        Admission::Admit
    }

    /// Release branch `ltag`. Returns `false` if it was never admitted.
    pub fn end(&self, uuid: &str, ltag: &str) -> bool {
        let Entry::Occupied(mut entry) = self.branches.entry(uuid.to_string()) else {
            debug!(uuid, ltag, "end for unknown uuid");
            return false;
        };
        let released = entry.get_mut().remove(ltag);
        if entry.get().is_empty() {
            entry.remove();
        }
        if !released {
            debug!(uuid, ltag, "end for branch that was not admitted");
        }
        released
    }

    /// Branches currently counted for `uuid`
    pub fn active_calls(&self, uuid: &str) -> usize {
        self.branches.get(uuid).map(|b| b.len()).unwrap_or(0)
    }

    /// Number of UUIDs with at least one active branch
    pub fn tracked_uuids(&self) -> usize {
        self.branches.len()
    }
}

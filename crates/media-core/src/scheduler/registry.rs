//! Callgroup bookkeeping

use std::collections::HashMap;

use tracing::debug;

use super::session::SessionKey;

/// Which thread each callgroup and session lives on
#[derive(Debug, Default)]
pub(crate) struct Registry {
    callgroup_thread: HashMap<String, usize>,
    callgroup_members: HashMap<String, usize>,
    session_callgroup: HashMap<SessionKey, String>,
    thread_load: Vec<usize>,
}

impl Registry {
    pub fn new(threads: usize) -> Self {
        Registry {
            thread_load: vec![0; threads],
            ..Default::default()
        }
    }

    /// Pick the thread for `key` and record its membership in `callgroup`
    pub fn place(&mut self, key: SessionKey, callgroup: &str) -> usize {
        let thread = match self.callgroup_thread.get(callgroup) {
            Some(thread) => *thread,
            None => {
                let thread = self.least_loaded();
                self.callgroup_thread.insert(callgroup.to_string(), thread);
                thread
            }
        };

        *self.callgroup_members.entry(callgroup.to_string()).or_insert(0) += 1;
        self.session_callgroup.insert(key, callgroup.to_string());
        self.thread_load[thread] += 1;
        thread
    }

    fn least_loaded(&self) -> usize {
        self.thread_load
            .iter()
            .enumerate()
            .min_by_key(|(i, load)| (**load, *i))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Drop `key` from its callgroup. Returns the thread it was on.
    pub fn forget(&mut self, key: SessionKey) -> Option<usize> {
        let callgroup = self.session_callgroup.remove(&key)?;
        let thread = self.callgroup_thread.get(&callgroup).copied()?;

        let remaining = match self.callgroup_members.get_mut(&callgroup) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            self.callgroup_members.remove(&callgroup);
            self.callgroup_thread.remove(&callgroup);
            debug!(callgroup = %callgroup, "callgroup empty, erasing it");
        }

        if let Some(load) = self.thread_load.get_mut(thread) {
            *load = load.saturating_sub(1);
        }
        Some(thread)
    }

    /// Like [`forget`](Self::forget), but only while `key` is still placed
    /// on `thread`. A session moved elsewhere keeps its new registration.
    pub fn forget_on(&mut self, key: SessionKey, thread: usize) -> bool {
        let placed = self
            .session_callgroup
            .get(&key)
            .and_then(|group| self.callgroup_thread.get(group))
            .is_some_and(|t| *t == thread);
        placed && self.forget(key).is_some()
    }

    pub fn contains(&self, key: SessionKey) -> bool {
        self.session_callgroup.contains_key(&key)
    }

    pub fn callgroup_thread(&self, callgroup: &str) -> Option<usize> {
        self.callgroup_thread.get(callgroup).copied()
    }

    pub fn callgroup_size(&self, callgroup: &str) -> usize {
        self.callgroup_members.get(callgroup).copied().unwrap_or(0)
    }

    pub fn thread_load(&self, thread: usize) -> Option<usize> {
        self.thread_load.get(thread).copied()
    }

    pub fn session_count(&self) -> usize {
        self.session_callgroup.len()
    }

    pub fn callgroups(&self) -> impl Iterator<Item = (&str, usize, usize)> {
        self.callgroup_thread
            .iter()
            .map(|(group, thread)| (group.as_str(), *thread, self.callgroup_size(group)))
    }
}

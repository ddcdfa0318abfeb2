//! # Call Watcher
//!
//! Keeps the latest status of every active call so that other components
//! (status queries, monitoring) can read it without touching the call's
//! own state.
//!
//! Updates arrive as [`CallStatusEvent`]s on a dedicated queue served by one
//! thread. A call that ends is not forgotten immediately: its status moves
//! to a *soft state* that stays readable until it is either queried once or
//! expires. A collector thread purges expired soft states.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::errors::{Error, ErrorExt, Result};
use crate::events::{EventHandler, EventQueue};

/// Status record kept per call
pub trait CallStatus: Clone + Send + Sync + fmt::Debug + 'static {
    /// Payload of an update event
    type Update: Send + fmt::Debug + 'static;

    /// Apply an update to this status
    fn update(&mut self, update: &Self::Update);
}

/// Event consumed by the watcher queue
#[derive(Debug)]
pub enum CallStatusEvent<S: CallStatus> {
    /// Start tracking a call
    Initialize { call_id: String, status: S },
    /// Change the status of a tracked call
    Update { call_id: String, update: S::Update },
    /// The call ended; keep its status as soft state for a while
    Obsolete { call_id: String },
}

/// Timing knobs of the watcher
#[derive(Debug, Clone, Copy)]
pub struct CallWatcherConfig {
    /// How long an obsolete call stays queryable
    pub soft_state_expire: Duration,
    /// Interval between garbage collection runs
    pub gc_interval: Duration,
}

impl Default for CallWatcherConfig {
    fn default() -> Self {
        Self {
            soft_state_expire: Duration::from_secs(5),
            gc_interval: Duration::from_millis(2000),
        }
    }
}

struct SoftState<S> {
    status: S,
    expires_at: Instant,
}

struct Tables<S> {
    states: DashMap<String, S>,
    soft_states: DashMap<String, SoftState<S>>,
}

struct WatcherHandler<S: CallStatus> {
    tables: Arc<Tables<S>>,
    soft_state_expire: Duration,
}

impl<S: CallStatus> EventHandler for WatcherHandler<S> {
    type Event = CallStatusEvent<S>;

    fn process(&mut self, event: CallStatusEvent<S>) {
        match event {
            CallStatusEvent::Initialize { call_id, status } => {
                debug!(%call_id, "call watcher: initialize");
                if self.tables.states.insert(call_id.clone(), status).is_some() {
                    warn!(%call_id, "call watcher: call already initialized, overwriting status");
                }
            }
            CallStatusEvent::Update { call_id, update } => {
                if let Some(mut status) = self.tables.states.get_mut(&call_id) {
                    status.update(&update);
                } else if let Some(mut soft) = self.tables.soft_states.get_mut(&call_id) {
                    soft.status.update(&update);
                } else {
                    debug!(%call_id, "call watcher: update for unknown call");
                }
            }
            CallStatusEvent::Obsolete { call_id } => match self.tables.states.remove(&call_id) {
                Some((id, status)) => {
                    debug!(call_id = %id, "call watcher: moving to soft state");
                    self.tables.soft_states.insert(
                        id,
                        SoftState {
                            status,
                            expires_at: Instant::now() + self.soft_state_expire,
                        },
                    );
                }
                None => debug!(%call_id, "call watcher: obsolete for unknown call"),
            },
        }
    }
}

struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

/// Tracks call statuses across their lifetime
pub struct CallWatcher<S: CallStatus> {
    queue: Arc<EventQueue<WatcherHandler<S>>>,
    tables: Arc<Tables<S>>,
    stop: Arc<StopSignal>,
    running: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: CallStatus> CallWatcher<S> {
    /// Start the watcher and its garbage collector
    pub fn start(config: CallWatcherConfig) -> Result<Self> {
        let tables = Arc::new(Tables {
            states: DashMap::new(),
            soft_states: DashMap::new(),
        });
        let queue = EventQueue::new(
            "CallWatcher",
            WatcherHandler {
                tables: tables.clone(),
                soft_state_expire: config.soft_state_expire,
            },
        );
        let stop = Arc::new(StopSignal {
            stopped: Mutex::new(false),
            cond: Condvar::new(),
        });
        let running = Arc::new(AtomicBool::new(true));

        let processor = {
            let queue = queue.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("CallWatcher".into())
                .spawn(move || {
                    while running.load(Ordering::Acquire) {
                        queue.wait_for_event();
                        queue.process_events();
                    }
                    // updates posted before stop are still applied
                    queue.process_events();
                })
                .map_err(|e| Error::ThreadSpawn(e.to_string()))
                .with_context("CallWatcher", "start")?
        };

        let collector = {
            let tables = tables.clone();
            let stop = stop.clone();
            let interval = config.gc_interval;
            thread::Builder::new()
                .name("CallWatcherGC".into())
                .spawn(move || loop {
                    {
                        let mut stopped = stop.stopped.lock();
                        if !*stopped {
                            stop.cond.wait_for(&mut stopped, interval);
                        }
                        if *stopped {
                            break;
                        }
                    }
                    purge_expired(&tables, Instant::now());
                })
                .map_err(|e| Error::ThreadSpawn(e.to_string()))
                .with_context("CallWatcher", "start")?
        };

        info!("Call watcher started");

        Ok(CallWatcher {
            queue,
            tables,
            stop,
            running,
            threads: Mutex::new(vec![processor, collector]),
        })
    }

    pub fn post_event(&self, event: CallStatusEvent<S>) {
        self.queue.post_event(event);
    }

    pub fn initialize(&self, call_id: impl Into<String>, status: S) {
        self.post_event(CallStatusEvent::Initialize { call_id: call_id.into(), status });
    }

    pub fn update(&self, call_id: impl Into<String>, update: S::Update) {
        self.post_event(CallStatusEvent::Update { call_id: call_id.into(), update });
    }

    pub fn obsolete(&self, call_id: impl Into<String>) {
        self.post_event(CallStatusEvent::Obsolete { call_id: call_id.into() });
    }

    /// Copy of the status of `call_id`.
    ///
    /// A soft state is handed out once and then forgotten.
    pub fn get_status(&self, call_id: &str) -> Option<S> {
        if let Some(status) = self.tables.states.get(call_id) {
            return Some(status.clone());
        }
        self.tables.soft_states.remove(call_id).map(|(_, soft)| soft.status)
    }

    /// Number of (active, soft) entries
    pub fn counts(&self) -> (usize, usize) {
        (self.tables.states.len(), self.tables.soft_states.len())
    }

    /// Purge soft states expired at `now`; returns how many were removed
    pub fn collect_garbage(&self, now: Instant) -> usize {
        purge_expired(&self.tables, now)
    }

    /// Stop both threads. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        {
            let mut stopped = self.stop.stopped.lock();
            *stopped = true;
            self.stop.cond.notify_all();
        }
        self.queue.wakeup();

        for handle in self.threads.lock().drain(..) {
            if handle.join().is_err() {
                warn!("call watcher thread panicked");
            }
        }
        info!("Call watcher stopped");
    }
}

impl<S: CallStatus> Drop for CallWatcher<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn purge_expired<S>(tables: &Tables<S>, now: Instant) -> usize {
    let before = tables.soft_states.len();
    tables.soft_states.retain(|_, soft| soft.expires_at > now);
    let purged = before.saturating_sub(tables.soft_states.len());
    if purged > 0 {
        debug!("call watcher: purged {} soft states", purged);
    }
    purged
}

//! Media scheduler
//!
//! A fixed pool of ticking threads. Every tick a thread reads then writes
//! the streams of each of its sessions at the current wall clock, applies
//! pending session set changes and processes DTMF. Session sets are only
//! changed by their own thread: [`MediaScheduler`] posts [`SchedRequest`]s
//! which the thread applies between ticks.
//!
//! Sessions of one callgroup always share a thread. A new callgroup goes to
//! the thread with the fewest assigned sessions.

mod registry;
mod session;
mod thread;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

pub use session::{MediaSession, SchedRequest, SchedRequestKind, AUDIO_BUFFER_SIZE};

use self::registry::Registry;
use self::session::session_key;
use self::thread::{MediaThread, TickTiming};
use crate::error::{Error, Result};
use crate::timestamp::{WallClock, DEFAULT_TICK_MS, SYSTEM_SAMPLECLOCK_RATE};

/// Media scheduler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSchedulerConfig {
    /// Number of media threads
    pub threads: usize,
    /// Wall clock tick
    pub tick_ms: u64,
    /// System sample clock (Hz)
    pub sample_rate: u32,
    /// Residual tick budget below which a thread does not sleep
    pub min_sleep_us: u64,
}

impl Default for MediaSchedulerConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            tick_ms: DEFAULT_TICK_MS,
            sample_rate: SYSTEM_SAMPLECLOCK_RATE,
            min_sleep_us: 2000,
        }
    }
}

impl MediaSchedulerConfig {
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_tick_ms(mut self, tick_ms: u64) -> Self {
        self.tick_ms = tick_ms;
        self
    }
}

/// Places media sessions on ticking threads
pub struct MediaScheduler {
    threads: Vec<MediaThread>,
    registry: Arc<Mutex<Registry>>,
    increment: u64,
    stopped: AtomicBool,
}

impl MediaScheduler {
    /// Start the media threads
    pub fn start(config: &MediaSchedulerConfig) -> Result<Self> {
        if config.threads == 0 {
            error!("media scheduler configured with zero threads");
            return Err(Error::NoThreads);
        }
        if config.tick_ms == 0 {
            return Err(Error::InvalidConfig("tick_ms must be positive".into()));
        }
        let clock = WallClock::new(config.tick_ms, config.sample_rate)?;
        let timing = TickTiming {
            tick: Duration::from_millis(config.tick_ms),
            min_sleep: Duration::from_micros(config.min_sleep_us),
            clock,
        };

        let registry = Arc::new(Mutex::new(Registry::new(config.threads)));
        let mut threads = Vec::with_capacity(config.threads);
        for index in 0..config.threads {
            match MediaThread::spawn(index, timing, registry.clone()) {
                Ok(thread) => threads.push(thread),
                Err(e) => {
                    for started in &threads {
                        started.stop();
                    }
                    return Err(e);
                }
            }
        }

        info!(threads = config.threads, tick_ms = config.tick_ms, increment = clock.increment(), "media scheduler started");
        Ok(MediaScheduler {
            threads,
            registry,
            increment: clock.increment(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Schedule `session` with the members of `callgroup`. Returns the thread index.
    pub fn add_session(&self, session: Arc<dyn MediaSession>, callgroup: &str) -> Result<usize> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::Stopped);
        }

        let key = session_key(&session);
        if self.registry.lock().contains(key) {
            warn!(callgroup, "session already scheduled, moving it");
            self.remove_from_processor(&session, SchedRequestKind::SoftRemove);
        }

        session.on_media_processing_started();

        let thread = self.registry.lock().place(key, callgroup);
        debug!(callgroup, thread, "adding session to media thread");
        self.threads[thread].post_request(SchedRequest::new(SchedRequestKind::Insert, session));
        Ok(thread)
    }

    /// Remove `session` and notify it
    pub fn remove_session(&self, session: &Arc<dyn MediaSession>) -> bool {
        self.remove_from_processor(session, SchedRequestKind::Remove)
    }

    /// Remove `session`, clearing its audio first
    pub fn clear_session(&self, session: &Arc<dyn MediaSession>) -> bool {
        self.remove_from_processor(session, SchedRequestKind::Clear)
    }

    /// Detach `session` without the termination notification
    pub fn soft_remove_session(&self, session: &Arc<dyn MediaSession>) -> bool {
        self.remove_from_processor(session, SchedRequestKind::SoftRemove)
    }

    /// Move `session` to `callgroup`
    pub fn change_callgroup(&self, session: Arc<dyn MediaSession>, callgroup: &str) -> Result<usize> {
        self.remove_from_processor(&session, SchedRequestKind::SoftRemove);
        self.add_session(session, callgroup)
    }

    fn remove_from_processor(&self, session: &Arc<dyn MediaSession>, kind: SchedRequestKind) -> bool {
        let Some(thread) = self.registry.lock().forget(session_key(session)) else {
            debug!(?kind, "session not scheduled");
            return false;
        };
        debug!(?kind, thread, "removing session from media thread");
        self.threads[thread].post_request(SchedRequest::new(kind, session.clone()));
        true
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Sessions assigned to thread `index`
    pub fn thread_load(&self, index: usize) -> Option<usize> {
        self.registry.lock().thread_load(index)
    }

    /// Sessions thread `index` is actually ticking right now
    pub fn active_sessions(&self, index: usize) -> Option<usize> {
        self.threads.get(index).map(|t| t.active_sessions())
    }

    pub fn callgroup_thread(&self, callgroup: &str) -> Option<usize> {
        self.registry.lock().callgroup_thread(callgroup)
    }

    pub fn session_count(&self) -> usize {
        self.registry.lock().session_count()
    }

    /// Wall clock samples per tick
    pub fn increment(&self) -> u64 {
        self.increment
    }

    /// Log thread loads and callgroups
    pub fn dump(&self) {
        let (loads, callgroups): (Vec<usize>, Vec<(String, usize, usize)>) = {
            let registry = self.registry.lock();
            (
                (0..self.threads.len()).map(|i| registry.thread_load(i).unwrap_or(0)).collect(),
                registry.callgroups().map(|(g, t, m)| (g.to_string(), t, m)).collect(),
            )
        };
        for (index, thread) in self.threads.iter().enumerate() {
            debug!(thread = index, assigned = loads[index], active = thread.active_sessions(), "media thread");
        }
        for (group, thread, members) in callgroups {
            debug!(callgroup = %group, thread, members, "  callgroup");
        }
    }

    /// Stop all threads. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("stopping media scheduler");
        for thread in &self.threads {
            thread.stop();
        }
    }
}

impl Drop for MediaScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

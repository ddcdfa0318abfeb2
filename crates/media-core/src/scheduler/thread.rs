//! One media processing thread

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rsems_infra_common::{EventHandler, EventQueue};
use tracing::{debug, error, info, trace, warn};

use super::registry::Registry;
use super::session::{session_key, MediaSession, SchedRequest, SchedRequestKind, SessionKey, AUDIO_BUFFER_SIZE};
use crate::error::{Error, Result};
use crate::timestamp::WallClock;

type SessionSet = Arc<Mutex<BTreeMap<SessionKey, Arc<dyn MediaSession>>>>;

/// Tick timing shared by all media threads
#[derive(Debug, Clone, Copy)]
pub(crate) struct TickTiming {
    pub tick: Duration,
    pub min_sleep: Duration,
    pub clock: WallClock,
}

/// Applies [`SchedRequest`]s to the owning thread's session set
struct SchedHandler {
    index: usize,
    sessions: SessionSet,
}

impl EventHandler for SchedHandler {
    type Event = SchedRequest;

    fn process(&mut self, request: SchedRequest) {
        let key = session_key(&request.session);
        let mut sessions = self.sessions.lock();

        match request.kind {
            SchedRequestKind::Insert => {
                sessions.insert(key, request.session.clone());
                request.session.clear_rtp_timeout();
                debug!(thread = self.index, "session inserted into media thread");
            }
            SchedRequestKind::Remove => {
                if let Some(session) = sessions.remove(&key) {
                    session.on_media_processing_terminated();
                    debug!(thread = self.index, "session removed from media thread");
                }
            }
            SchedRequestKind::Clear => {
                if let Some(session) = sessions.remove(&key) {
                    session.clear_audio();
                    session.on_media_processing_terminated();
                    debug!(thread = self.index, "session cleared from media thread");
                }
            }
            SchedRequestKind::SoftRemove => {
                if sessions.remove(&key).is_some() {
                    debug!(thread = self.index, "session removed softly from media thread");
                }
            }
        }
    }
}

pub(crate) struct MediaThread {
    index: usize,
    events: Arc<EventQueue<SchedHandler>>,
    sessions: SessionSet,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MediaThread {
    pub fn spawn(index: usize, timing: TickTiming, registry: Arc<Mutex<Registry>>) -> Result<Self> {
        let sessions: SessionSet = Arc::new(Mutex::new(BTreeMap::new()));
        let events = EventQueue::new(
            format!("MediaProcessorThread-{}", index),
            SchedHandler { index, sessions: sessions.clone() },
        );
        let running = Arc::new(AtomicBool::new(true));

        let ticker = Ticker {
            index,
            timing,
            events: events.clone(),
            sessions: sessions.clone(),
            running: running.clone(),
            registry,
            buffer: vec![0u8; AUDIO_BUFFER_SIZE],
        };

        let handle = thread::Builder::new()
            .name(format!("MediaProcessorThread-{}", index))
            .spawn(move || ticker.run())
            .map_err(|e| {
                error!(thread = index, "failed to spawn media thread: {}", e);
                Error::ThreadSpawn(e.to_string())
            })?;

        Ok(MediaThread {
            index,
            events,
            sessions,
            running,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn post_request(&self, request: SchedRequest) {
        self.events.post_event(request);
    }

    /// Sessions currently in this thread's set
    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!(thread = self.index, "media thread panicked");
            }
        }
    }
}

/// State owned by the running thread
struct Ticker {
    index: usize,
    timing: TickTiming,
    events: Arc<EventQueue<SchedHandler>>,
    sessions: SessionSet,
    running: Arc<AtomicBool>,
    registry: Arc<Mutex<Registry>>,
    buffer: Vec<u8>,
}

impl Ticker {
    fn run(mut self) {
        info!(thread = self.index, increment = self.timing.clock.increment(), "media thread started");
        let mut clock = self.timing.clock;
        let mut next_tick = Instant::now() + self.timing.tick;

        while self.running.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now < next_tick {
                let budget = next_tick - now;
                if budget > self.timing.min_sleep {
                    thread::sleep(budget);
                }
            }

            self.process_audio(clock.now());
            self.events.process_events();
            self.process_dtmf_events();

            clock.advance();
            // deadlines follow the schedule, not the time we woke up
            next_tick += self.timing.tick;
        }

        info!(thread = self.index, "media thread stopped");
    }

    fn process_audio(&mut self, ts: u64) {
        let mut failed: Vec<Arc<dyn MediaSession>> = Vec::new();
        {
            let sessions = self.sessions.lock();
            for session in sessions.values() {
                if let Err(e) = session.read_streams(ts, &mut self.buffer) {
                    warn!(thread = self.index, ts, "read failed, removing session: {}", e);
                    failed.push(session.clone());
                }
            }
            for (key, session) in sessions.iter() {
                if failed.iter().any(|f| session_key(f) == *key) {
                    continue;
                }
                if let Err(e) = session.write_streams(ts, &mut self.buffer) {
                    warn!(thread = self.index, ts, "write failed, removing session: {}", e);
                    failed.push(session.clone());
                }
            }
        }

        for session in failed {
            // a session moved to another thread mid-tick belongs to that thread now
            if !self.registry.lock().forget_on(session_key(&session), self.index) {
                debug!(thread = self.index, "failed session already moved away");
                continue;
            }
            self.events.post_event(SchedRequest::new(SchedRequestKind::Clear, session));
        }
        trace!(thread = self.index, ts, "tick");
    }

    fn process_dtmf_events(&self) {
        let sessions = self.sessions.lock();
        for session in sessions.values() {
            session.process_dtmf_events();
        }
    }
}

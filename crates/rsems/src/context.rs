//! Server context
//!
//! Owns every process-wide component. Nothing in rsems is a global: the
//! context is built once at startup and handed to whoever needs it.
//!
//! Start order: logging, transaction table, session worker pool, media
//! scheduler, call watcher, session container, transaction timer.
//! [`ServerContext::shutdown`] undoes it in reverse.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use parking_lot::{Condvar, Mutex};
use rsems_dialog_core::{MessageSender, TransactionTable};
use rsems_infra_common::{log_welcome, setup_logging, CallWatcher, Error as InfraError, EventQueueProcessor};
use rsems_media_core::MediaScheduler;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::call_control::ParallelCallLimiter;
use crate::config::ServerConfig;
use crate::session::{LegStatus, SessionContainer, SessionFactory, SessionServices};

/// Shortest interval between transaction timer sweeps
const MIN_TIMER_INTERVAL: Duration = Duration::from_millis(10);

/// How long shutdown waits for terminated legs to be released
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Periodically expires transactions and routes timeouts to their legs
struct TransactionTimer {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: JoinHandle<()>,
}

impl TransactionTimer {
    fn spawn(table: Arc<TransactionTable>, sessions: Arc<SessionContainer>, interval: Duration) -> anyhow::Result<Self> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_stop = stop.clone();

        let handle = thread::Builder::new()
            .name("TransactionTimer".to_string())
            .spawn(move || {
                let (lock, cvar) = &*thread_stop;
                let mut stopped = lock.lock();
                while !*stopped {
                    cvar.wait_for(&mut stopped, interval);
                    if *stopped {
                        break;
                    }
                    for expired in table.collect_expired(Instant::now()) {
                        sessions.dispatch_timeout(expired);
                    }
                }
                debug!("transaction timer stopped");
            })
            .context("spawning transaction timer")?;

        Ok(TransactionTimer { stop, handle })
    }

    fn stop(self) {
        {
            let (lock, cvar) = &*self.stop;
            *lock.lock() = true;
            cvar.notify_all();
        }
        if self.handle.join().is_err() {
            error!("transaction timer panicked");
        }
    }
}

/// Every long-lived component of a running server
pub struct ServerContext {
    config: ServerConfig,
    table: Arc<TransactionTable>,
    processor: Arc<EventQueueProcessor>,
    media: Arc<MediaScheduler>,
    watcher: Arc<CallWatcher<LegStatus>>,
    limiter: Arc<ParallelCallLimiter>,
    sessions: Arc<SessionContainer>,
    timer: Mutex<Option<TransactionTimer>>,
    stopped: AtomicBool,
}

impl ServerContext {
    /// Build and start all components
    pub fn start(
        config: ServerConfig,
        transport: Arc<dyn MessageSender>,
        factory: Arc<dyn SessionFactory>,
    ) -> anyhow::Result<Self> {
        config.validate().context("invalid server configuration")?;

        match setup_logging(&config.logging) {
            Ok(()) => log_welcome(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            // a subscriber from an embedding application stays in charge
            Err(InfraError::Logging(msg)) => debug!("logging already set up: {}", msg),
            Err(e) => return Err(e).context("setting up logging"),
        }

        let table = Arc::new(TransactionTable::new(&config.transactions).context("creating transaction table")?);

        let processor = Arc::new(
            EventQueueProcessor::new(config.threads.session_processor_threads)
                .context("starting session processor threads")?,
        );

        let media = Arc::new(
            MediaScheduler::start(&config.media_scheduler_config()).context("starting media processor threads")?,
        );

        let watcher = Arc::new(CallWatcher::start(config.watcher_config()).context("starting call watcher")?);

        let limiter = Arc::new(ParallelCallLimiter::new(config.call_control.clone()));

        let sessions = SessionContainer::new(
            table.clone(),
            transport,
            Arc::new(config.dialog.clone()),
            processor.clone(),
            factory,
            SessionServices { media: media.clone(), limiter: limiter.clone() },
            Some(watcher.clone()),
        );

        let interval = (config.transactions.t1() / 5).max(MIN_TIMER_INTERVAL);
        let timer = TransactionTimer::spawn(table.clone(), sessions.clone(), interval)?;

        info!(
            session_threads = processor.worker_count(),
            media_threads = media.thread_count(),
            buckets = table.bucket_count(),
            "server context started"
        );

        Ok(ServerContext {
            config,
            table,
            processor,
            media,
            watcher,
            limiter,
            sessions,
            timer: Mutex::new(Some(timer)),
            stopped: AtomicBool::new(false),
        })
    }

    /// Terminate every call leg, wait a bounded time for them to be
    /// released, then stop all components in reverse start order.
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down server context");

        self.sessions.terminate_all();
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while !self.sessions.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if !self.sessions.is_empty() {
            warn!(legs = self.sessions.len(), "call legs still alive after shutdown grace period");
        }

        if let Some(timer) = self.timer.lock().take() {
            timer.stop();
        }
        self.watcher.stop();
        self.media.stop();
        self.processor.stop();

        info!("server context stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn transactions(&self) -> &Arc<TransactionTable> {
        &self.table
    }

    pub fn processor(&self) -> &Arc<EventQueueProcessor> {
        &self.processor
    }

    pub fn media(&self) -> &Arc<MediaScheduler> {
        &self.media
    }

    pub fn watcher(&self) -> &Arc<CallWatcher<LegStatus>> {
        &self.watcher
    }

    pub fn limiter(&self) -> &Arc<ParallelCallLimiter> {
        &self.limiter
    }

    pub fn sessions(&self) -> &Arc<SessionContainer> {
        &self.sessions
    }

    /// Snapshot of the server state
    pub fn status_json(&self) -> Value {
        let (active_calls, soft_calls) = self.watcher.counts();
        let media_loads: Vec<usize> = (0..self.media.thread_count())
            .map(|i| self.media.thread_load(i).unwrap_or(0))
            .collect();
        let worker_loads: Vec<usize> = (0..self.processor.worker_count())
            .map(|i| self.processor.worker_load(i).unwrap_or(0))
            .collect();

        json!({
            "running": self.is_running(),
            "transactions": self.table.len(),
            "sessions": self.sessions.len(),
            "workers": {
                "count": self.processor.worker_count(),
                "loads": worker_loads,
            },
            "media": {
                "threads": self.media.thread_count(),
                "loads": media_loads,
                "sessions": self.media.session_count(),
            },
            "calls": {
                "active": active_calls,
                "soft": soft_calls,
            },
        })
    }
}

impl Drop for ServerContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

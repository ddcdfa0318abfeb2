//! # Event Queue Worker Pool
//!
//! A fixed set of named OS threads that drain event queues on demand.
//!
//! Queues are assigned to workers round-robin when they are started and
//! stay with that worker for their whole life: the worker registers itself
//! as the queue's notification sink, so every later rising edge of the
//! queue's pending flag lands in the same worker's ready list. A queue is
//! listed at most once per worker, which together with the handler lock in
//! [`EventQueue`](super::EventQueue) keeps draining single-threaded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use super::queue::{EventNotificationSink, ProcessableQueue};
use crate::errors::{Error, Result};

struct WorkerState {
    ready: VecDeque<Arc<dyn ProcessableQueue>>,
    running: bool,
    /// Queues currently assigned to this worker
    assigned: usize,
}

struct WorkerShared {
    index: usize,
    state: Mutex<WorkerState>,
    cond: Condvar,
}

fn same_queue(a: &Arc<dyn ProcessableQueue>, b: &Arc<dyn ProcessableQueue>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl EventNotificationSink for WorkerShared {
    fn notify(&self, queue: Arc<dyn ProcessableQueue>) {
        let mut state = self.state.lock();
        if !state.ready.iter().any(|q| same_queue(q, &queue)) {
            state.ready.push_back(queue);
            self.cond.notify_one();
        }
    }
}

impl WorkerShared {
    fn run(self: Arc<Self>) {
        debug!(worker = self.index, "event queue worker started");

        loop {
            let queue = {
                let mut state = self.state.lock();
                while state.running && state.ready.is_empty() {
                    self.cond.wait(&mut state);
                }
                // a stopping worker still drains the queues already signalled
                match state.ready.pop_front() {
                    Some(queue) => queue,
                    None => break,
                }
            };

            if !queue.processing_cycle() {
                debug!(worker = self.index, queue = queue.name(), "releasing event queue");
                queue.set_event_notification_sink(None);
                queue.finalize();

                let mut state = self.state.lock();
                state.ready.retain(|q| !same_queue(q, &queue));
                state.assigned = state.assigned.saturating_sub(1);
            }
        }

        debug!(worker = self.index, "event queue worker stopped");
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        state.running = false;
        self.cond.notify_all();
    }
}

struct Worker {
    shared: Arc<WorkerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Pool of worker threads driving [`EventQueue`](super::EventQueue)s
pub struct EventQueueProcessor {
    workers: Vec<Worker>,
    next_worker: AtomicUsize,
    stopped: AtomicBool,
}

impl EventQueueProcessor {
    /// Spawn `num_workers` threads named `EventQueueWorker-<n>`.
    ///
    /// A pool without workers is accepted here; every attempt to start a
    /// queue on it is then refused.
    pub fn new(num_workers: usize) -> Result<Self> {
        let mut workers = Vec::with_capacity(num_workers);

        for index in 0..num_workers {
            let shared = Arc::new(WorkerShared {
                index,
                state: Mutex::new(WorkerState {
                    ready: VecDeque::new(),
                    running: true,
                    assigned: 0,
                }),
                cond: Condvar::new(),
            });

            let runner = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("EventQueueWorker-{}", index))
                .spawn(move || runner.run())
                .map_err(|e| Error::ThreadSpawn(format!("EventQueueWorker-{}: {}", index, e)))?;

            workers.push(Worker {
                shared,
                handle: Mutex::new(Some(handle)),
            });
        }

        info!("Started event queue processor with {} workers", num_workers);

        Ok(EventQueueProcessor {
            workers,
            next_worker: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        })
    }

    fn get_worker(&self) -> Result<&Worker> {
        if self.workers.is_empty() {
            error!("No event queue workers configured");
            return Err(Error::NoWorkerAvailable("zero worker threads configured".into()));
        }
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        Ok(&self.workers[index])
    }

    /// Hand `queue` to the next worker in round-robin order.
    ///
    /// Returns the index of the worker now owning the queue.
    pub fn start_event_queue(&self, queue: Arc<dyn ProcessableQueue>) -> Result<usize> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::Stopped("event queue processor".into()));
        }

        let worker = self.get_worker()?;
        worker.shared.state.lock().assigned += 1;
        debug!(worker = worker.shared.index, queue = queue.name(), "assigned event queue");

        let sink: Arc<dyn EventNotificationSink> = worker.shared.clone();
        queue.set_event_notification_sink(Some(sink));
        Ok(worker.shared.index)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of queues currently assigned to worker `index`
    pub fn worker_load(&self, index: usize) -> Option<usize> {
        self.workers.get(index).map(|w| w.shared.state.lock().assigned)
    }

    /// Stop all workers and join them. Queues already signalled are drained
    /// before a worker exits.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        for worker in &self.workers {
            worker.shared.stop();
        }

        for worker in &self.workers {
            if let Some(handle) = worker.handle.lock().take() {
                if handle.join().is_err() {
                    warn!(worker = worker.shared.index, "event queue worker panicked");
                }
            }
        }

        info!("Event queue processor stopped");
    }
}

impl Drop for EventQueueProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::queue::{EventQueue, FnHandler};

    #[test]
    fn test_zero_workers_refuses_queues() {
        let pool = EventQueueProcessor::new(0).unwrap();
        let queue = EventQueue::new("q", FnHandler::new(|_: u8| {}));
        assert!(matches!(
            pool.start_event_queue(queue),
            Err(Error::NoWorkerAvailable(_))
        ));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let pool = EventQueueProcessor::new(2).unwrap();
        pool.stop();
        pool.stop();

        let queue = EventQueue::new("late", FnHandler::new(|_: u8| {}));
        assert!(matches!(pool.start_event_queue(queue), Err(Error::Stopped(_))));
    }
}

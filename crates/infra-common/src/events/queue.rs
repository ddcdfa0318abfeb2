//! # Event Queue
//!
//! A mailbox of typed events bound to exactly one [`EventHandler`].
//!
//! The queue keeps a `pending` flag next to its FIFO. Posting an event onto
//! an idle queue flips the flag from `false` to `true` and, on that edge
//! only, notifies the registered [`EventNotificationSink`]. Further posts
//! before the queue is drained coalesce into that single notification.
//!
//! Draining ([`EventQueue::process_events`]) runs until the FIFO is empty,
//! so events posted while a drain is running are handled in the same pass.
//! The handler sits behind its own lock: two threads can never run it for
//! the same queue at the same time.
//!
//! ```
//! use rsems_infra_common::events::{EventQueue, FnHandler};
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! let queue = EventQueue::new("demo", FnHandler::new(move |ev: u32| sink.lock().push(ev)));
//!
//! queue.post_event(1);
//! queue.post_event(2);
//! assert!(queue.event_pending());
//!
//! queue.process_events();
//! assert_eq!(*seen.lock(), vec![1, 2]);
//! assert!(!queue.event_pending());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// Consumer side of an [`EventQueue`]
pub trait EventHandler: Send + 'static {
    type Event: Send + fmt::Debug + 'static;

    /// Handle one event
    fn process(&mut self, event: Self::Event);

    /// Whether the queue should stay registered with its worker.
    ///
    /// Returning `false` makes the worker finalize and release the queue
    /// after the current drain.
    fn is_active(&self) -> bool {
        true
    }

    /// Called exactly once when the queue is released
    fn on_finalize(&mut self) {}
}

/// Receives the queue whenever its pending flag goes from `false` to `true`
pub trait EventNotificationSink: Send + Sync {
    fn notify(&self, queue: Arc<dyn ProcessableQueue>);
}

/// Type-erased view on a queue, as seen by the worker pool
pub trait ProcessableQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Drain the queue; `false` means the queue wants to be released
    fn processing_cycle(&self) -> bool;

    /// Release the handler. Idempotent.
    fn finalize(&self);

    fn event_pending(&self) -> bool;

    fn set_event_notification_sink(&self, sink: Option<Arc<dyn EventNotificationSink>>);
}

struct QueueState<E> {
    events: VecDeque<E>,
    pending: bool,
    sink: Option<Arc<dyn EventNotificationSink>>,
}

/// Thread-safe FIFO of events with an edge-triggered pending flag
pub struct EventQueue<H: EventHandler> {
    name: String,
    state: Mutex<QueueState<H::Event>>,
    cond: Condvar,
    handler: Mutex<H>,
    finalized: AtomicBool,
    log_events: bool,
    self_ref: Weak<EventQueue<H>>,
}

impl<H: EventHandler> EventQueue<H> {
    /// Create a queue bound to `handler`
    pub fn new(name: impl Into<String>, handler: H) -> Arc<Self> {
        Self::with_logging(name, handler, false)
    }

    /// Create a queue that traces every post and every processed event
    pub fn with_logging(name: impl Into<String>, handler: H, log_events: bool) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|self_ref| EventQueue {
            name,
            state: Mutex::new(QueueState {
                events: VecDeque::new(),
                pending: false,
                sink: None,
            }),
            cond: Condvar::new(),
            handler: Mutex::new(handler),
            finalized: AtomicBool::new(false),
            log_events,
            self_ref: self_ref.clone(),
        })
    }

    /// Append an event; notifies the sink on the pending flag's rising edge
    pub fn post_event(&self, event: H::Event) {
        let sink = {
            let mut state = self.state.lock();
            if self.log_events {
                debug!(queue = %self.name, ?event, "post event");
            }
            state.events.push_back(event);
            let rising = !state.pending;
            state.pending = true;
            self.cond.notify_all();
            if rising { state.sink.clone() } else { None }
        };

        if let Some(sink) = sink {
            self.notify_sink(sink);
        }
    }

    /// Drain every queued event, including those posted during the drain
    pub fn process_events(&self) {
        let mut handler = self.handler.lock();
        self.drain(&mut handler);
    }

    /// Process at most one event. Returns whether an event was handled.
    pub fn process_single_event(&self) -> bool {
        let mut handler = self.handler.lock();
        let event = {
            let mut state = self.state.lock();
            let event = state.events.pop_front();
            if state.events.is_empty() {
                state.pending = false;
            }
            event
        };

        match event {
            Some(event) => {
                if self.log_events {
                    debug!(queue = %self.name, ?event, "process event");
                }
                handler.process(event);
                true
            }
            None => false,
        }
    }

    /// Block until the pending flag is set
    pub fn wait_for_event(&self) {
        let mut state = self.state.lock();
        while !state.pending {
            self.cond.wait(&mut state);
        }
    }

    /// Block until the pending flag is set or `timeout` elapsed.
    /// Returns the pending flag.
    pub fn wait_for_event_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.pending {
            self.cond.wait_for(&mut state, timeout);
        }
        state.pending
    }

    /// Set the pending flag without an event, releasing any waiter
    pub fn wakeup(&self) {
        let sink = {
            let mut state = self.state.lock();
            let rising = !state.pending;
            state.pending = true;
            self.cond.notify_all();
            if rising { state.sink.clone() } else { None }
        };

        if let Some(sink) = sink {
            self.notify_sink(sink);
        }
    }

    pub fn event_pending(&self) -> bool {
        self.state.lock().pending
    }

    /// Number of events currently queued
    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register (or clear) the notification sink.
    ///
    /// A queue that already has pending work notifies the new sink right
    /// away so that events posted before registration are not lost.
    pub fn set_event_notification_sink(&self, sink: Option<Arc<dyn EventNotificationSink>>) {
        let notify = {
            let mut state = self.state.lock();
            state.sink = sink.clone();
            if state.pending { sink } else { None }
        };

        if let Some(sink) = notify {
            self.notify_sink(sink);
        }
    }

    /// Run `f` with exclusive access to the handler
    pub fn with_handler<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(&mut self.handler.lock())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    fn drain(&self, handler: &mut H) {
        loop {
            let event = {
                let mut state = self.state.lock();
                match state.events.pop_front() {
                    Some(event) => event,
                    None => {
                        state.pending = false;
                        return;
                    }
                }
            };

            if self.log_events {
                debug!(queue = %self.name, ?event, "process event");
            }
            handler.process(event);
        }
    }

    fn notify_sink(&self, sink: Arc<dyn EventNotificationSink>) {
        if let Some(me) = self.self_ref.upgrade() {
            sink.notify(me);
        }
    }
}

impl<H: EventHandler> ProcessableQueue for EventQueue<H> {
    fn name(&self) -> &str {
        &self.name
    }

    fn processing_cycle(&self) -> bool {
        let mut handler = self.handler.lock();
        self.drain(&mut handler);
        handler.is_active()
    }

    fn finalize(&self) {
        if !self.finalized.swap(true, Ordering::AcqRel) {
            debug!(queue = %self.name, "finalizing event queue");
            self.handler.lock().on_finalize();
        }
    }

    fn event_pending(&self) -> bool {
        EventQueue::event_pending(self)
    }

    fn set_event_notification_sink(&self, sink: Option<Arc<dyn EventNotificationSink>>) {
        EventQueue::set_event_notification_sink(self, sink)
    }
}

impl<H: EventHandler> fmt::Debug for EventQueue<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventQueue")
            .field("name", &self.name)
            .field("queued", &state.events.len())
            .field("pending", &state.pending)
            .finish()
    }
}

/// Adapter turning a closure into an [`EventHandler`]
pub struct FnHandler<E, F> {
    f: F,
    _event: PhantomData<fn(E)>,
}

impl<E, F> FnHandler<E, F>
where
    F: FnMut(E) + Send + 'static,
{
    pub fn new(f: F) -> Self {
        FnHandler { f, _event: PhantomData }
    }
}

impl<E, F> EventHandler for FnHandler<E, F>
where
    E: Send + fmt::Debug + 'static,
    F: FnMut(E) + Send + 'static,
{
    type Event = E;

    fn process(&mut self, event: E) {
        (self.f)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSink(AtomicUsize);

    impl EventNotificationSink for CountingSink {
        fn notify(&self, _queue: Arc<dyn ProcessableQueue>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn collecting_queue() -> (Arc<EventQueue<FnHandler<u32, impl FnMut(u32) + Send + 'static>>>, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let out = seen.clone();
        let queue = EventQueue::new("test", FnHandler::new(move |ev: u32| out.lock().push(ev)));
        (queue, seen)
    }

    #[test]
    fn test_posts_coalesce_into_one_notification() {
        let (queue, _) = collecting_queue();
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        queue.set_event_notification_sink(Some(sink.clone()));

        for i in 0..10 {
            queue.post_event(i);
        }
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);

        queue.process_events();
        assert!(!queue.event_pending());

        queue.post_event(42);
        assert_eq!(sink.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fifo_order() {
        let (queue, seen) = collecting_queue();
        for i in 0..5 {
            queue.post_event(i);
        }
        queue.process_events();
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_sink_registered_late_is_notified() {
        let (queue, _) = collecting_queue();
        queue.post_event(1);

        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        queue.set_event_notification_sink(Some(sink.clone()));
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_process_single_event() {
        let (queue, seen) = collecting_queue();
        queue.post_event(1);
        queue.post_event(2);

        assert!(queue.process_single_event());
        assert!(queue.event_pending());
        assert!(queue.process_single_event());
        assert!(!queue.event_pending());
        assert!(!queue.process_single_event());
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_drain_includes_events_posted_by_handler() {
        struct Reposter {
            queue: Option<Arc<EventQueue<Reposter>>>,
            seen: Vec<u32>,
        }

        impl EventHandler for Reposter {
            type Event = u32;

            fn process(&mut self, event: u32) {
                self.seen.push(event);
                if event < 3 {
                    if let Some(q) = &self.queue {
                        q.post_event(event + 1);
                    }
                }
            }
        }

        let queue = EventQueue::new("reposter", Reposter { queue: None, seen: Vec::new() });
        queue.with_handler(|h| h.queue = Some(queue.clone()));
        queue.post_event(0);
        queue.process_events();

        assert_eq!(queue.with_handler(|h| h.seen.clone()), vec![0, 1, 2, 3]);
        assert!(!queue.event_pending());
        queue.with_handler(|h| h.queue = None);
    }

    #[test]
    fn test_wait_for_event_timeout() {
        let (queue, _) = collecting_queue();
        assert!(!queue.wait_for_event_timeout(Duration::from_millis(10)));

        let waiter = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.wait_for_event())
        };
        queue.wakeup();
        waiter.join().unwrap();
        assert!(queue.event_pending());

        queue.process_events();
        assert!(!queue.event_pending());
    }

    #[test]
    fn test_finalize_runs_once() {
        struct Finalizing(Arc<AtomicUsize>);
        impl EventHandler for Finalizing {
            type Event = ();
            fn process(&mut self, _event: ()) {}
            fn on_finalize(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        let queue = EventQueue::new("fin", Finalizing(count.clone()));
        queue.finalize();
        queue.finalize();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(queue.is_finalized());
    }
}

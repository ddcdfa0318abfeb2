use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rsems_infra_common::events::{EventHandler, EventQueue, EventQueueProcessor, FnHandler};

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
fn test_round_robin_assignment() {
    let pool = EventQueueProcessor::new(2).unwrap();

    let mut assigned = Vec::new();
    for i in 0..5 {
        let queue = EventQueue::new(format!("q{}", i + 1), FnHandler::new(|_: u32| {}));
        queue.post_event(i);
        assigned.push(pool.start_event_queue(queue).unwrap());
    }

    // queues 1, 3, 5 on worker 0; 2, 4 on worker 1
    assert_eq!(assigned, vec![0, 1, 0, 1, 0]);
    assert_eq!(pool.worker_load(0), Some(3));
    assert_eq!(pool.worker_load(1), Some(2));
    pool.stop();
}

#[test]
fn test_events_are_processed_by_worker() {
    let pool = EventQueueProcessor::new(3).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let out = seen.clone();
    let queue = EventQueue::new("collector", FnHandler::new(move |ev: u32| out.lock().push(ev)));
    pool.start_event_queue(queue.clone()).unwrap();

    for i in 0..100 {
        queue.post_event(i);
    }

    assert!(wait_until(Duration::from_secs(5), || seen.lock().len() == 100));
    assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    pool.stop();
}

struct ReentrancyCheck {
    busy: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
    processed: Arc<AtomicUsize>,
}

impl EventHandler for ReentrancyCheck {
    type Event = u32;

    fn process(&mut self, _event: u32) {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        thread::sleep(Duration::from_micros(50));
        self.busy.store(false, Ordering::SeqCst);
        self.processed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_single_drainer_under_concurrent_posts() {
    let pool = Arc::new(EventQueueProcessor::new(4).unwrap());
    let overlaps = Arc::new(AtomicUsize::new(0));
    let processed = Arc::new(AtomicUsize::new(0));

    let queue = EventQueue::new(
        "tracked",
        ReentrancyCheck {
            busy: Arc::new(AtomicBool::new(false)),
            overlaps: overlaps.clone(),
            processed: processed.clone(),
        },
    );
    pool.start_event_queue(queue.clone()).unwrap();

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..250 {
                    queue.post_event(i);
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    assert!(wait_until(Duration::from_secs(10), || processed.load(Ordering::SeqCst) == 1000));
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    pool.stop();
}

struct OneShot {
    finalized: Arc<AtomicBool>,
    done: bool,
}

impl EventHandler for OneShot {
    type Event = &'static str;

    fn process(&mut self, event: &'static str) {
        if event == "terminate" {
            self.done = true;
        }
    }

    fn is_active(&self) -> bool {
        !self.done
    }

    fn on_finalize(&mut self) {
        self.finalized.store(true, Ordering::SeqCst);
    }
}

#[test]
fn test_inactive_queue_is_finalized_and_released() {
    let pool = EventQueueProcessor::new(1).unwrap();
    let finalized = Arc::new(AtomicBool::new(false));
    let queue = EventQueue::new(
        "oneshot",
        OneShot { finalized: finalized.clone(), done: false },
    );
    pool.start_event_queue(queue.clone()).unwrap();
    assert_eq!(pool.worker_load(0), Some(1));

    queue.post_event("hello");
    queue.post_event("terminate");

    assert!(wait_until(Duration::from_secs(5), || finalized.load(Ordering::SeqCst)));
    assert!(wait_until(Duration::from_secs(5), || pool.worker_load(0) == Some(0)));
    assert!(queue.is_finalized());
    pool.stop();
}

#[test]
fn test_stop_drains_signalled_queues() {
    let pool = EventQueueProcessor::new(2).unwrap();
    let flags: Vec<Arc<AtomicBool>> = (0..500).map(|_| Arc::new(AtomicBool::new(false))).collect();

    for (i, finalized) in flags.iter().enumerate() {
        let queue = EventQueue::new(format!("leg-{}", i), OneShot { finalized: finalized.clone(), done: false });
        pool.start_event_queue(queue.clone()).unwrap();
        queue.post_event("terminate");
    }
    pool.stop();

    assert!(flags.iter().all(|f| f.load(Ordering::SeqCst)));
    assert_eq!(pool.worker_load(0), Some(0));
    assert_eq!(pool.worker_load(1), Some(0));
}

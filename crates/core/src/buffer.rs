//! Timestamp-paced delivery of frames.
//!
//! [`PacingBuffer`] sits between the network reader and the decoder. Items
//! arrive with network jitter and sometimes out of order; the buffer keeps
//! them sorted by timestamp and hands them to a sink at the cadence their
//! timestamps describe.
//!
//! ## Pacing cycle
//!
//! ```text
//! receive(item) ─> sorted list ─> worker: peek head
//!                                   │ wait min(head.ts - prev.ts, latency)
//!                                   │ new head arrived while waiting? ─> peek again
//!                                   └ pop head ─> sink(item)
//! ```
//!
//! The worker thread is spawned by the first `receive` and exits after the
//! list has stayed empty for one latency period; the next `receive` spawns
//! a new one. Waits use a condition variable, so an insert at the head
//! wakes the worker immediately.
//!
//! Delivered timestamps never decrease within a run: an item slightly
//! older than the last delivered one is dropped on arrival. A backward jump
//! of more than [`DISCONTINUITY_MS`] (a source clock reset, a seek) starts
//! a new run instead, and pacing restarts from that item. The run also
//! ends when the worker goes idle or the buffer is interrupted.
//!
//! The latency budget is a floor on end-to-end delay, not a bound: every
//! upstream stage adds its own.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{Result, RtspError};
use crate::media::{Frame, Sample};

/// Anything with a presentation timestamp in milliseconds.
pub trait Timestamped {
    fn timestamp(&self) -> i64;
}

impl Timestamped for Frame {
    fn timestamp(&self) -> i64 {
        self.sample.timestamp
    }
}

impl Timestamped for Sample {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// Backward jump, in milliseconds, treated as a timeline reset rather
/// than a late item.
pub const DISCONTINUITY_MS: i64 = 1_000;

type Sink<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Entry<T> {
    timestamp: i64,
    item: T,
}

struct State<T> {
    /// Ascending by timestamp; equal timestamps keep insertion order.
    items: VecDeque<Entry<T>>,
    latency: Duration,
    /// Bumped whenever a new item becomes the head.
    head_generation: u64,
    /// Bumped by `interrupt`; a worker from an older epoch exits.
    epoch: u64,
    worker_running: bool,
    previous: Option<i64>,
    last_delivered: Option<i64>,
    destroyed: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    wakeup: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
    sink: Sink<T>,
}

/// Reordering, pacing buffer with a lazily spawned delivery thread.
///
/// Cloning yields another handle to the same buffer.
pub struct PacingBuffer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for PacingBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Timestamped + Send + 'static> PacingBuffer<T> {
    /// Create a buffer that delivers to `sink` from its worker thread.
    pub fn new(latency: Duration, sink: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    items: VecDeque::new(),
                    latency,
                    head_generation: 0,
                    epoch: 0,
                    worker_running: false,
                    previous: None,
                    last_delivered: None,
                    destroyed: false,
                }),
                wakeup: Condvar::new(),
                worker: Mutex::new(None),
                sink: Arc::new(sink),
            }),
        }
    }

    /// Queue an item for paced delivery.
    ///
    /// Fails with [`RtspError::Destroyed`] after [`destroy`](Self::destroy).
    pub fn receive(&self, item: T) -> Result<()> {
        let timestamp = item.timestamp();
        let mut state = self.shared.state.lock();
        if state.destroyed {
            return Err(RtspError::Destroyed);
        }
        if let Some(last) = state.last_delivered
            && timestamp < last
        {
            if last - timestamp <= DISCONTINUITY_MS {
                tracing::debug!(timestamp, last, "late item dropped");
                return Ok(());
            }
            tracing::debug!(timestamp, last, "timestamp discontinuity, pacing restarted");
            state.last_delivered = None;
            state.previous = None;
        }

        let position = state.items.partition_point(|e| e.timestamp <= timestamp);
        if position == 0 {
            state.head_generation += 1;
        }
        state.items.insert(position, Entry { timestamp, item });

        if !state.worker_running {
            state.worker_running = true;
            let epoch = state.epoch;
            drop(state);
            self.spawn_worker(epoch)?;
        } else {
            drop(state);
        }
        self.shared.wakeup.notify_all();
        Ok(())
    }

    fn spawn_worker(&self, epoch: u64) -> Result<()> {
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("rtsp-pacing".into())
            .spawn(move || run(shared, epoch));
        match spawned {
            Ok(handle) => {
                // A previous worker, if any, has already left its loop.
                *self.shared.worker.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.state.lock().worker_running = false;
                Err(RtspError::Io(e))
            }
        }
    }

    pub fn set_latency(&self, latency: Duration) {
        self.shared.state.lock().latency = latency;
        self.shared.wakeup.notify_all();
    }

    pub fn latency(&self) -> Duration {
        self.shared.state.lock().latency
    }

    /// Items waiting for delivery.
    pub fn len(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a worker thread is currently alive.
    pub fn is_playing(&self) -> bool {
        self.shared.state.lock().worker_running
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.state.lock().destroyed
    }

    /// Stop the worker and drop every queued item. The buffer stays usable.
    pub fn interrupt(&self) {
        self.stop(false);
    }

    /// Stop the worker, drop every queued item, and refuse further input.
    ///
    /// Safe to call from the sink itself: the worker is not joined then,
    /// it exits once the sink returns.
    pub fn destroy(&self) {
        self.stop(true);
    }

    fn stop(&self, destroy: bool) {
        let dropped = {
            let mut state = self.shared.state.lock();
            state.epoch += 1;
            state.worker_running = false;
            state.previous = None;
            state.last_delivered = None;
            if destroy {
                state.destroyed = true;
            }
            let dropped = state.items.len();
            state.items.clear();
            dropped
        };
        self.shared.wakeup.notify_all();

        let handle = self.shared.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                tracing::trace!("pacing buffer stopped from its own sink");
            } else if handle.join().is_err() {
                tracing::warn!("pacing worker panicked");
            }
        }
        tracing::debug!(dropped, destroy, "pacing buffer stopped");
    }
}

/// Worker loop: deliver the head when its time comes, exit when idle for a
/// whole latency period or when the epoch changes.
fn run<T: Timestamped + Send + 'static>(shared: Arc<Shared<T>>, epoch: u64) {
    let mut state = shared.state.lock();
    tracing::trace!(epoch, "pacing worker started");

    loop {
        if state.epoch != epoch {
            break;
        }

        let Some(head) = state.items.front().map(|e| e.timestamp) else {
            let deadline = Instant::now() + state.latency;
            while state.items.is_empty() && state.epoch == epoch {
                if shared.wakeup.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
            if state.items.is_empty() && state.epoch == epoch {
                state.worker_running = false;
                state.previous = None;
                state.last_delivered = None;
                break;
            }
            continue;
        };

        let delay = match state.previous {
            Some(previous) => Duration::from_millis(head.saturating_sub(previous).max(0) as u64),
            None => state.latency,
        }
        .min(state.latency);

        let generation = state.head_generation;
        if !delay.is_zero() {
            let deadline = Instant::now() + delay;
            while state.epoch == epoch && state.head_generation == generation {
                if shared.wakeup.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
            if state.epoch != epoch {
                break;
            }
            if state.head_generation != generation {
                // An earlier item took the head while we waited.
                continue;
            }
        }

        let Some(entry) = state.items.pop_front() else {
            continue;
        };
        state.previous = Some(entry.timestamp);
        state.last_delivered = Some(entry.timestamp);

        let sink = shared.sink.clone();
        MutexGuard::unlocked(&mut state, || sink(entry.item));
    }

    tracing::trace!(epoch, "pacing worker exited");
}

impl<T> fmt::Debug for PacingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("PacingBuffer")
            .field("queued", &state.items.len())
            .field("latency", &state.latency)
            .field("playing", &state.worker_running)
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Item(i64);

    impl Timestamped for Item {
        fn timestamp(&self) -> i64 {
            self.0
        }
    }

    fn collecting(latency_ms: u64) -> (PacingBuffer<Item>, mpsc::Receiver<(i64, Instant)>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let buffer = PacingBuffer::new(Duration::from_millis(latency_ms), move |item: Item| {
            let _ = tx.lock().send((item.0, Instant::now()));
        });
        (buffer, rx)
    }

    fn drain(rx: &mpsc::Receiver<(i64, Instant)>, count: usize) -> Vec<i64> {
        (0..count)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap().0)
            .collect()
    }

    #[test]
    fn out_of_order_input_is_delivered_sorted() {
        let (buffer, rx) = collecting(30);
        for ts in [30, 10, 20, 0, 20] {
            buffer.receive(Item(ts)).unwrap();
        }
        assert_eq!(drain(&rx, 5), vec![0, 10, 20, 20, 30]);
    }

    #[test]
    fn delivery_is_non_decreasing_for_any_interleaving() {
        let (buffer, rx) = collecting(5);
        let input = [7i64, 3, 9, 1, 4, 4, 8, 2, 6, 5, 0, 11, 10];
        for (i, ts) in input.iter().enumerate() {
            buffer.receive(Item(*ts)).unwrap();
            if i % 4 == 3 {
                thread::sleep(Duration::from_millis(8));
            }
        }
        thread::sleep(Duration::from_millis(300));

        let delivered: Vec<i64> = rx.try_iter().map(|(ts, _)| ts).collect();
        assert!(!delivered.is_empty());
        assert!(
            delivered.windows(2).all(|w| w[0] <= w[1]),
            "not monotonic: {:?}",
            delivered
        );
    }

    #[test]
    fn earlier_item_arriving_during_wait_goes_first() {
        let (buffer, rx) = collecting(300);
        buffer.receive(Item(1000)).unwrap();
        thread::sleep(Duration::from_millis(50));
        // The worker is waiting on 1000; 500 takes the head.
        buffer.receive(Item(500)).unwrap();
        assert_eq!(drain(&rx, 2), vec![500, 1000]);
    }

    #[test]
    fn late_items_are_dropped() {
        let (buffer, rx) = collecting(200);
        buffer.receive(Item(100)).unwrap();
        assert_eq!(drain(&rx, 1), vec![100]);

        buffer.receive(Item(50)).unwrap();
        buffer.receive(Item(100)).unwrap();
        buffer.receive(Item(110)).unwrap();
        assert_eq!(drain(&rx, 2), vec![100, 110]);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn backward_jump_past_threshold_restarts_the_run() {
        let (buffer, rx) = collecting(200);
        buffer.receive(Item(47_721_825)).unwrap();
        assert_eq!(drain(&rx, 1), vec![47_721_825]);

        for ts in [6, 46, 86] {
            buffer.receive(Item(ts)).unwrap();
        }
        assert_eq!(drain(&rx, 3), vec![6, 46, 86]);

        // Still late within the new run.
        buffer.receive(Item(50)).unwrap();
        buffer.receive(Item(126)).unwrap();
        assert_eq!(drain(&rx, 1), vec![126]);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn interrupt_forgets_the_last_delivered_timestamp() {
        let (buffer, rx) = collecting(10);
        buffer.receive(Item(500)).unwrap();
        assert_eq!(drain(&rx, 1), vec![500]);

        buffer.interrupt();
        buffer.receive(Item(400)).unwrap();
        assert_eq!(drain(&rx, 1), vec![400]);
    }

    #[test]
    fn gaps_are_paced_up_to_latency() {
        let (buffer, rx) = collecting(200);
        buffer.receive(Item(0)).unwrap();
        buffer.receive(Item(80)).unwrap();
        buffer.receive(Item(5000)).unwrap();

        let (_, t0) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let (_, t1) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let (_, t2) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(t1 - t0 >= Duration::from_millis(70), "gap of 80 ms is honored");
        let capped = t2 - t1;
        assert!(capped >= Duration::from_millis(180), "large gap waits the latency");
        assert!(capped < Duration::from_secs(2), "but no more than about the latency");
    }

    #[test]
    fn worker_exits_when_idle_and_restarts() {
        let (buffer, rx) = collecting(10);
        buffer.receive(Item(1)).unwrap();
        assert_eq!(drain(&rx, 1), vec![1]);

        thread::sleep(Duration::from_millis(150));
        assert!(!buffer.is_playing());

        buffer.receive(Item(2)).unwrap();
        assert_eq!(drain(&rx, 1), vec![2]);
    }

    #[test]
    fn destroy_abandons_items_and_rejects_input() {
        let (buffer, rx) = collecting(1000);
        for ts in 0..5 {
            buffer.receive(Item(ts * 1000)).unwrap();
        }
        let start = Instant::now();
        buffer.destroy();
        assert!(start.elapsed() < Duration::from_millis(500), "destroy must not wait out the latency");
        assert!(buffer.is_destroyed());
        assert!(!buffer.is_playing());
        assert!(buffer.is_empty());
        assert!(matches!(buffer.receive(Item(9)), Err(RtspError::Destroyed)));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn destroy_from_sink_does_not_deadlock() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let slot: Arc<Mutex<Option<PacingBuffer<Item>>>> = Arc::new(Mutex::new(None));
        let inner = slot.clone();
        let buffer = PacingBuffer::new(Duration::from_millis(5), move |item: Item| {
            if let Some(buffer) = inner.lock().take() {
                buffer.destroy();
            }
            let _ = tx.lock().send(item.0);
        });
        *slot.lock() = Some(buffer.clone());

        buffer.receive(Item(1)).unwrap();
        buffer.receive(Item(2)).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(buffer.is_destroyed());
    }

    #[test]
    fn interrupt_keeps_buffer_usable() {
        let (buffer, rx) = collecting(500);
        buffer.receive(Item(0)).unwrap();
        buffer.interrupt();
        assert!(buffer.is_empty());
        assert!(!buffer.is_destroyed());

        buffer.set_latency(Duration::from_millis(5));
        assert_eq!(buffer.latency(), Duration::from_millis(5));
        buffer.receive(Item(10)).unwrap();
        assert_eq!(drain(&rx, 1), vec![10]);
    }
}

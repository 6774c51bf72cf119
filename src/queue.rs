//! Bounded single-producer/single-consumer batch queue.
//!
//! Decouples the hardware acquirer thread from the frame-consuming pipeline
//! thread. The capacity is the single tuning knob for how much downstream
//! stall the driver absorbs before hardware pacing is affected: `enqueue`
//! blocks only once the queue is full, which stops the acquirer issuing
//! vendor reads and lets the vendor's own buffer apply backpressure.
//!
//! `dequeue` waits a bounded interval so the consumer can observe a stop
//! request promptly even when no samples arrive.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

pub const DEFAULT_DEQUEUE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
    dequeue_timeout: Duration,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self::with_timeout(capacity, DEFAULT_DEQUEUE_TIMEOUT)
    }

    pub fn with_timeout(capacity: usize, dequeue_timeout: Duration) -> Self {
        BoundedQueue {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity: capacity.max(1),
            dequeue_timeout,
        }
    }

    /// Appends a batch, blocking while the queue is at capacity. A `reset`
    /// from the consumer side unblocks pending producers.
    pub fn enqueue(&self, item: T) {
        let mut items = self.items.lock();
        while items.len() >= self.capacity {
            self.writable.wait(&mut items);
        }
        items.push_back(item);
        self.readable.notify_one();
    }

    /// Removes the oldest batch, waiting up to the configured timeout.
    /// Returns `None` on timeout.
    pub fn dequeue(&self) -> Option<T> {
        let mut items = self.items.lock();
        if items.is_empty() {
            self.readable.wait_for(&mut items, self.dequeue_timeout);
        }
        let item = items.pop_front();
        if item.is_some() {
            self.writable.notify_one();
        }
        item
    }

    /// Drops all queued batches and wakes any blocked producer. Called on
    /// pipeline stop.
    pub fn reset(&self) {
        let mut items = self.items.lock();
        items.clear();
        self.writable.notify_all();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

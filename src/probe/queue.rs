//! Bounded FIFO between a probe thread and its consumer.
//!
//! The producer never waits indefinitely: with [`BackpressurePolicy::DropNewest`] a
//! full queue rejects the new sample immediately, with [`BackpressurePolicy::Block`]
//! the producer waits at most the configured timeout. Either way a rejected sample is
//! counted, never silently lost. The consumer polls with a bound so it can re-check
//! its loop condition.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the producer does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressurePolicy {
    /// Discard the new sample without waiting
    #[default]
    DropNewest,
    /// Wait up to `timeout` for space, then discard
    Block {
        /// Upper bound on the producer's wait
        timeout: Duration,
    },
}

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The item is in the queue
    Enqueued,
    /// The queue stayed full and the item was discarded
    Dropped,
}

struct QueueInner<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

/// Cloneable handle on a bounded hand-off queue.
pub struct HandoffQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for HandoffQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> HandoffQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(QueueInner {
                items: Mutex::new(VecDeque::with_capacity(capacity)),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                capacity,
                enqueued: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Offer `item` according to `policy`.
    pub fn push(&self, item: T, policy: BackpressurePolicy) -> PushOutcome {
        let mut items = self.inner.items.lock();
        if items.len() >= self.inner.capacity {
            if let BackpressurePolicy::Block { timeout } = policy {
                let deadline = Instant::now() + timeout;
                while items.len() >= self.inner.capacity {
                    if self
                        .inner
                        .not_full
                        .wait_until(&mut items, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
            }
        }

        if items.len() >= self.inner.capacity {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return PushOutcome::Dropped;
        }

        items.push_back(item);
        self.inner.enqueued.fetch_add(1, Ordering::Relaxed);
        self.inner.not_empty.notify_one();
        PushOutcome::Enqueued
    }

    /// Take the oldest item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        let item = self.inner.items.lock().pop_front();
        if item.is_some() {
            self.inner.not_full.notify_one();
        }
        item
    }

    /// Take the oldest item, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.inner.items.lock();
        while items.is_empty() {
            if self
                .inner
                .not_empty
                .wait_until(&mut items, deadline)
                .timed_out()
            {
                break;
            }
        }
        let item = items.pop_front();
        drop(items);
        if item.is_some() {
            self.inner.not_full.notify_one();
        }
        item
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.items.lock().is_empty()
    }

    /// Items accepted so far.
    pub fn enqueued(&self) -> u64 {
        self.inner.enqueued.load(Ordering::Relaxed)
    }

    /// Items discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl<T> std::fmt::Debug for HandoffQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandoffQueue")
            .field("capacity", &self.inner.capacity)
            .field("len", &self.len())
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = HandoffQueue::new(4);
        for i in 0..3 {
            assert_eq!(queue.push(i, BackpressurePolicy::DropNewest), PushOutcome::Enqueued);
        }
        assert_eq!(queue.try_pop(), Some(0));
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_full_queue_drops_newest() {
        let queue = HandoffQueue::new(1);
        assert_eq!(queue.push("first", BackpressurePolicy::DropNewest), PushOutcome::Enqueued);
        assert_eq!(queue.push("second", BackpressurePolicy::DropNewest), PushOutcome::Dropped);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.enqueued(), 1);
        assert_eq!(queue.try_pop(), Some("first"));
    }

    #[test]
    fn test_block_policy_times_out() {
        let queue = HandoffQueue::new(1);
        let policy = BackpressurePolicy::Block {
            timeout: Duration::from_millis(30),
        };
        queue.push(1, policy);
        let start = Instant::now();
        assert_eq!(queue.push(2, policy), PushOutcome::Dropped);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_block_policy_waits_for_space() {
        let queue = HandoffQueue::new(1);
        queue.push(1, BackpressurePolicy::DropNewest);

        let consumer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            consumer.try_pop()
        });

        let outcome = queue.push(
            2,
            BackpressurePolicy::Block {
                timeout: Duration::from_secs(2),
            },
        );
        assert_eq!(outcome, PushOutcome::Enqueued);
        assert_eq!(handle.join().unwrap(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
    }

    #[test]
    fn test_pop_timeout_on_empty() {
        let queue: HandoffQueue<u32> = HandoffQueue::new(2);
        let start = Instant::now();
        assert_eq!(queue.pop_timeout(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_pop_wakes_on_push() {
        let queue = HandoffQueue::new(2);
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.push(7u32, BackpressurePolicy::DropNewest)
        });
        assert_eq!(queue.pop_timeout(Duration::from_secs(2)), Some(7));
        assert_eq!(handle.join().unwrap(), PushOutcome::Enqueued);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let queue: HandoffQueue<u8> = HandoffQueue::new(0);
        assert_eq!(queue.capacity(), 1);
    }
}

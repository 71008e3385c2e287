//! Bounded, lossy FIFO queue decoupling one producer side from one
//! consumer side.
//!
//! Overflow policy is drop-oldest: a `put` on a full queue discards the
//! front element before appending, so `put` never blocks the producer.
//! `take` blocks the consumer while the queue is empty.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

struct Inner<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// A bounded FIFO queue with capacity `N >= 1`. Full queues drop the
/// oldest element on `put` rather than rejecting the new one.
pub struct RingQueue<T> {
    max_size: usize,
    state: Mutex<Inner<T>>,
    not_empty: Condvar,
    incoming_count: AtomicU64,
    dropped_count: AtomicU64,
}

impl<T> RingQueue<T> {
    /// Creates a queue holding at most `max_size` items. `max_size` is
    /// clamped to at least 1.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            state: Mutex::new(Inner {
                items: VecDeque::with_capacity(max_size.max(1)),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            incoming_count: AtomicU64::new(0),
            dropped_count: AtomicU64::new(0),
        }
    }

    /// Appends `value`. If the queue is full, the oldest element is
    /// discarded first and `dropped_count` is incremented.
    /// `incoming_count` is incremented unconditionally. Never blocks.
    pub fn put(&self, value: T) {
        let mut inner = self.state.lock().unwrap();
        if inner.items.len() >= self.max_size {
            inner.items.pop_front();
            self.dropped_count.fetch_add(1, Ordering::Relaxed);
        }
        inner.items.push_back(value);
        self.incoming_count.fetch_add(1, Ordering::Relaxed);
        self.not_empty.notify_one();
    }

    /// Removes and returns the front element, blocking while the queue
    /// is empty. Returns `None` once the queue has been shut down and
    /// drained.
    pub fn take(&self) -> Option<T> {
        let mut inner = self.state.lock().unwrap();
        loop {
            if let Some(value) = inner.items.pop_front() {
                return Some(value);
            }
            if inner.shutdown {
                return None;
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Wakes any blocked `take` and causes future calls to return `None`
    /// once the queue drains. Idempotent.
    pub fn shutdown(&self) {
        let mut inner = self.state.lock().unwrap();
        inner.shutdown = true;
        self.not_empty.notify_all();
    }

    pub fn size(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_full(&self) -> bool {
        self.size() >= self.max_size
    }

    pub fn incoming_count(&self) -> u64 {
        self.incoming_count.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order_preserved() {
        let q = RingQueue::new(8);
        q.put(1);
        q.put(2);
        q.put(3);
        assert_eq!(q.take(), Some(1));
        assert_eq!(q.take(), Some(2));
        assert_eq!(q.take(), Some(3));
    }

    #[test]
    fn capacity_one_keeps_latest() {
        let q = RingQueue::new(1);
        for i in 0..10 {
            q.put(i);
        }
        assert_eq!(q.dropped_count(), 9);
        assert_eq!(q.incoming_count(), 10);
        assert_eq!(q.take(), Some(9));
    }

    #[test]
    fn overflow_drops_oldest_first() {
        let q = RingQueue::new(2);
        q.put("a");
        q.put("b");
        q.put("c"); // drops "a"
        assert_eq!(q.dropped_count(), 1);
        assert_eq!(q.take(), Some("b"));
        assert_eq!(q.take(), Some("c"));
    }

    #[test]
    fn size_invariant_never_exceeds_capacity() {
        let q = RingQueue::new(4);
        for i in 0..50 {
            q.put(i);
            assert!(q.size() <= q.max_size());
        }
    }

    #[test]
    fn take_blocks_until_put() {
        let q = Arc::new(RingQueue::new(4));
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.take());

        thread::sleep(Duration::from_millis(50));
        q.put(42);
        assert_eq!(handle.join().unwrap(), Some(42));
    }

    #[test]
    fn shutdown_unblocks_waiting_take() {
        let q = Arc::new(RingQueue::<i32>::new(4));
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.take());

        thread::sleep(Duration::from_millis(50));
        q.shutdown();
        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn no_message_out_of_order_single_consumer_many_producers() {
        let q = Arc::new(RingQueue::new(10_000));
        let mut producers = Vec::new();
        for p in 0..4 {
            let q = Arc::clone(&q);
            producers.push(thread::spawn(move || {
                for i in 0..1000 {
                    q.put((p, i));
                }
            }));
        }
        for p in producers {
            p.join().unwrap();
        }

        let mut last_per_producer = [-1i64; 4];
        let mut seen = 0;
        while seen < q.incoming_count() {
            if let Some((p, i)) = q.take() {
                assert!(i as i64 > last_per_producer[p]);
                last_per_producer[p] = i as i64;
                seen += 1;
            }
        }
    }
}

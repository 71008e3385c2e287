//! Per-subscriber background worker.
//!
//! Each [`SubscriberWorker`] owns one [`RingQueue`] and one callback. A
//! dedicated thread drains the queue and invokes the callback; a
//! callback error is logged and never stops the worker or drops future
//! messages. Grounded on `include/data_bus/subscriber_worker.h`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::ids::next_subscriber_id;
use crate::ring_queue::RingQueue;
use crate::stats::QueueStat;

/// A subscriber's queue plus callback plus drain thread, addressable by
/// `(topic, subscriber_name)` or by its process-unique `subscriber_id`.
pub struct SubscriberWorker<T> {
    topic: String,
    subscriber_name: String,
    subscriber_id: u64,
    queue: Arc<RingQueue<T>>,
    success_count: AtomicU64,
    last_callback: Mutex<Duration>,
    total_callback: Mutex<Duration>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> SubscriberWorker<T> {
    /// Constructs the worker and starts its drain thread immediately.
    pub fn new(
        topic: impl Into<String>,
        subscriber_name: impl Into<String>,
        max_queue_size: usize,
        callback: impl Fn(T) + Send + 'static,
    ) -> Arc<Self> {
        let topic = topic.into();
        let subscriber_name = subscriber_name.into();
        let subscriber_id = next_subscriber_id();
        let queue = Arc::new(RingQueue::new(max_queue_size));
        let running = Arc::new(AtomicBool::new(true));

        let worker = Arc::new(Self {
            topic: topic.clone(),
            subscriber_name: subscriber_name.clone(),
            subscriber_id,
            queue: Arc::clone(&queue),
            success_count: AtomicU64::new(0),
            last_callback: Mutex::new(Duration::ZERO),
            total_callback: Mutex::new(Duration::ZERO),
            running: Arc::clone(&running),
            handle: Mutex::new(None),
        });

        let drain_worker = Arc::clone(&worker);
        let handle = std::thread::Builder::new()
            .name(format!("databus-sub-{subscriber_name}"))
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    let Some(item) = queue.take() else {
                        break;
                    };
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    let started = Instant::now();
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(item)));
                    let elapsed = started.elapsed();
                    *drain_worker.last_callback.lock().unwrap() = elapsed;
                    *drain_worker.total_callback.lock().unwrap() += elapsed;
                    match outcome {
                        Ok(()) => {
                            drain_worker.success_count.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(panic) => {
                            let message = panic
                                .downcast_ref::<&str>()
                                .map(|s| s.to_string())
                                .or_else(|| panic.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "callback panicked".to_string());
                            log::error!(
                                "callback error, topic={:?}, subscriber_name={:?}, subscriber_id={}, error={message}",
                                drain_worker.topic,
                                drain_worker.subscriber_name,
                                drain_worker.subscriber_id,
                            );
                        }
                    }
                }
            })
            .expect("failed to spawn subscriber worker thread");

        *worker.handle.lock().unwrap() = Some(handle);
        worker
    }

    /// Non-blocking enqueue; equivalent to `queue.put`.
    pub fn put_data(&self, payload: T) {
        self.queue.put(payload);
    }

    pub fn subscriber_id(&self) -> u64 {
        self.subscriber_id
    }

    pub fn subscriber_name(&self) -> &str {
        &self.subscriber_name
    }

    pub fn stats(&self) -> QueueStat {
        QueueStat {
            topic: self.topic.clone(),
            subscriber_name: self.subscriber_name.clone(),
            subscriber_id: self.subscriber_id,
            queue_size: self.queue.size(),
            max_queue_size: self.queue.max_size(),
            incoming_count: self.queue.incoming_count(),
            success_count: self.success_count.load(Ordering::Relaxed),
            dropped_count: self.queue.dropped_count(),
            last_callback: *self.last_callback.lock().unwrap(),
            total_callback: *self.total_callback.lock().unwrap(),
        }
    }

    /// Stops the worker: unblocks a pending `take`, then joins the drain
    /// thread. Bounds shutdown latency to at most one in-flight
    /// callback. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.queue.shutdown();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl<T> Drop for SubscriberWorker<T> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.queue.shutdown();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn drains_messages_in_order() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let received2 = Arc::clone(&received);
        let worker = SubscriberWorker::new("t", "A", 8, move |msg: i32| {
            received2.lock().unwrap().push(msg);
        });
        worker.put_data(1);
        worker.put_data(2);
        std::thread::sleep(Duration::from_millis(50));
        worker.stop();
        assert_eq!(*received.lock().unwrap(), vec![1, 2]);
        let stats = worker.stats();
        assert_eq!(stats.incoming_count, 2);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.dropped_count, 0);
    }

    #[test]
    fn panicking_callback_does_not_stop_worker() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let worker = SubscriberWorker::new("t", "A", 8, move |msg: i32| {
            count2.fetch_add(1, Ordering::Relaxed);
            if msg == 1 {
                panic!("boom");
            }
        });
        worker.put_data(1);
        worker.put_data(2);
        worker.put_data(3);
        std::thread::sleep(Duration::from_millis(50));
        worker.stop();
        assert_eq!(count.load(Ordering::Relaxed), 3);
        // The panicking call doesn't count toward success.
        assert_eq!(worker.stats().success_count, 2);
    }

    #[test]
    fn stop_is_idempotent_and_bounds_shutdown() {
        let worker = SubscriberWorker::new("t", "A", 8, |_: i32| {
            std::thread::sleep(Duration::from_millis(20));
        });
        worker.put_data(1);
        worker.stop();
        worker.stop();
    }

    #[test]
    fn no_callback_fires_after_stop_returns() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let worker = SubscriberWorker::new("t", "A", 8, move |_: i32| {
            count2.fetch_add(1, Ordering::Relaxed);
        });
        worker.put_data(1);
        std::thread::sleep(Duration::from_millis(50));
        worker.stop();
        let after_stop = count.load(Ordering::Relaxed);
        worker.put_data(2);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::Relaxed), after_stop);
    }
}

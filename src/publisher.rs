//! Per-topic fan-out. Grounded on `include/data_bus/publisher.h`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::stats::TopicStat;
use crate::worker::SubscriberWorker;

/// Holds every subscriber worker for one topic and fans a published
/// message out to all of them under a single mutex, so add/remove/
/// publish observe a consistent worker set.
pub struct Publisher<T> {
    topic: String,
    workers: Mutex<HashMap<String, Arc<SubscriberWorker<T>>>>,
    publish_count: AtomicU64,
}

impl<T: Clone + Send + 'static> Publisher<T> {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            workers: Mutex::new(HashMap::new()),
            publish_count: AtomicU64::new(0),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Broadcasts `payload` to every subscriber currently registered,
    /// under the same lock that serializes add/remove.
    pub fn publish(&self, payload: T) {
        let workers = self.workers.lock().unwrap();
        self.publish_count.fetch_add(1, Ordering::Relaxed);
        for worker in workers.values() {
            worker.put_data(payload.clone());
        }
    }

    /// Registers a new subscriber. Fails with `AlreadySubscribed` if
    /// `subscriber_name` is already in use on this topic.
    pub fn add_subscriber(
        &self,
        subscriber_name: impl Into<String>,
        max_queue_size: usize,
        callback: impl Fn(T) + Send + 'static,
    ) -> Result<u64> {
        let subscriber_name = subscriber_name.into();
        let mut workers = self.workers.lock().unwrap();
        if workers.contains_key(&subscriber_name) {
            return Err(Error::AlreadySubscribed {
                topic: self.topic.clone(),
                subscriber_name,
            });
        }
        let worker = SubscriberWorker::new(&self.topic, &subscriber_name, max_queue_size, callback);
        let id = worker.subscriber_id();
        workers.insert(subscriber_name, worker);
        Ok(id)
    }

    /// Removes a subscriber by exact name. The worker is stopped (and
    /// thus joined) before this returns, so no further callback fires
    /// for it afterward.
    pub fn remove_subscriber(&self, subscriber_name: &str) -> bool {
        let removed = self.workers.lock().unwrap().remove(subscriber_name);
        if let Some(worker) = removed {
            worker.stop();
            true
        } else {
            false
        }
    }

    /// Removes a subscriber by its process-unique id — used by
    /// federations (e.g. [`crate::broker::Broker`]) that only know the
    /// id, not the name it was registered under.
    pub fn remove_subscriber_by_id(&self, subscriber_id: u64) -> bool {
        let mut workers = self.workers.lock().unwrap();
        let name = workers
            .iter()
            .find(|(_, w)| w.subscriber_id() == subscriber_id)
            .map(|(name, _)| name.clone());
        match name {
            Some(name) => {
                let worker = workers.remove(&name).unwrap();
                drop(workers);
                worker.stop();
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> TopicStat {
        let workers = self.workers.lock().unwrap();
        TopicStat {
            topic: self.topic.clone(),
            publish_count: self.publish_count.load(Ordering::Relaxed),
            subscribers: workers.values().map(|w| w.stats()).collect(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[test]
    fn fan_out_reaches_all_subscribers() {
        let publisher = Publisher::new("t");
        let a = Arc::new(StdMutex::new(Vec::new()));
        let b = Arc::new(StdMutex::new(Vec::new()));
        let (a2, b2) = (Arc::clone(&a), Arc::clone(&b));
        publisher
            .add_subscriber("A", 8, move |m: i32| a2.lock().unwrap().push(m))
            .unwrap();
        publisher
            .add_subscriber("B", 8, move |m: i32| b2.lock().unwrap().push(m))
            .unwrap();

        publisher.publish(1);
        publisher.publish(2);
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(*a.lock().unwrap(), vec![1, 2]);
        assert_eq!(*b.lock().unwrap(), vec![1, 2]);
        assert_eq!(publisher.stats().publish_count, 2);
    }

    #[test]
    fn duplicate_subscribe_rejected() {
        let publisher = Publisher::new("t");
        let first = publisher.add_subscriber("A", 8, |_: i32| {});
        assert!(first.is_ok());
        let second = publisher.add_subscriber("A", 8, |_: i32| {});
        assert!(matches!(second, Err(Error::AlreadySubscribed { .. })));
        assert_eq!(publisher.subscriber_count(), 1);
    }

    #[test]
    fn remove_by_id_matches_remove_by_name() {
        let publisher: Publisher<i32> = Publisher::new("t");
        let id = publisher.add_subscriber("A", 8, |_| {}).unwrap();
        assert!(publisher.remove_subscriber_by_id(id));
        assert_eq!(publisher.subscriber_count(), 0);
        assert!(!publisher.remove_subscriber_by_id(id));
    }

    #[test]
    fn removed_subscriber_misses_later_publishes() {
        let publisher = Publisher::new("t");
        let received = Arc::new(StdMutex::new(Vec::new()));
        let received2 = Arc::clone(&received);
        publisher
            .add_subscriber("A", 8, move |m: i32| received2.lock().unwrap().push(m))
            .unwrap();

        publisher.publish(1);
        std::thread::sleep(Duration::from_millis(30));
        assert!(publisher.remove_subscriber("A"));
        publisher.publish(2);
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(*received.lock().unwrap(), vec![1]);
    }
}

//! Process-wide topic registry. Grounded on `include/data_bus/data_bus.h`.
//!
//! Publishers are lazily created on first `publish`/`subscribe` for a
//! topic and are never removed — the registry is bounded by the
//! universe of topic names the application uses.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::{Error, Result};
use crate::publisher::Publisher;
use crate::stats::TopicStat;

/// Type-erased handle to a `Publisher<T>` for some `T` the registry
/// doesn't need to know about to support `unsubscribe`/`stats`, which
/// operate on any topic regardless of its payload type. `as_any_arc`
/// lets a caller that *does* know `T` recover an owned `Arc<Publisher<T>>`
/// from a cloned `Arc<dyn ErasedPublisher>` without re-locking the
/// registry — that's what lets [`DataBus::with_publisher`] drop the
/// registry mutex before calling into the publisher.
trait ErasedPublisher: Send + Sync {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn remove_subscriber(&self, name: &str) -> bool;
    fn remove_subscriber_by_id(&self, id: u64) -> bool;
    fn stats(&self) -> TopicStat;
}

impl<T: Clone + Send + Sync + 'static> ErasedPublisher for Publisher<T> {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn remove_subscriber(&self, name: &str) -> bool {
        Publisher::remove_subscriber(self, name)
    }

    fn remove_subscriber_by_id(&self, id: u64) -> bool {
        Publisher::remove_subscriber_by_id(self, id)
    }

    fn stats(&self) -> TopicStat {
        Publisher::stats(self)
    }
}

/// Process-wide `topic -> Publisher` registry. Not a hidden singleton:
/// construct with [`DataBus::new`] and thread it through your
/// components explicitly, or reach for [`global`] if you want the
/// original's ambient-singleton convenience.
#[derive(Default)]
pub struct DataBus {
    publishers: Mutex<HashMap<String, Arc<dyn ErasedPublisher>>>,
}

/// Default per-subscriber queue capacity, matching
/// `DataBus::DEFAULT_QUEUE_SIZE` in `include/data_bus/data_bus.h`.
pub const DEFAULT_QUEUE_SIZE: usize = 1;

impl DataBus {
    pub fn new() -> Self {
        Self {
            publishers: Mutex::new(HashMap::new()),
        }
    }

    /// Publishes `payload` on `topic`, lazily creating its `Publisher`
    /// if this is the first call for that topic. Fails if `topic` was
    /// already used with a different payload type `T`.
    pub fn publish<T: Clone + Send + Sync + 'static>(&self, topic: &str, payload: T) -> Result<()> {
        self.with_publisher(topic, |publisher| {
            publisher.publish(payload);
            Ok(())
        })
    }

    /// Subscribes `subscriber_name` to `topic`, lazily creating the
    /// topic's `Publisher` if needed. Fails with `AlreadySubscribed` on
    /// a duplicate name. `T` is a named generic rather than argument-
    /// position `impl Trait` so callers can turbofish it explicitly
    /// (`bus.subscribe::<Order, _>(...)`) when it can't be inferred from
    /// the closure alone.
    pub fn subscribe<T: Clone + Send + Sync + 'static, C: Fn(T) + Send + 'static>(
        &self,
        topic: &str,
        subscriber_name: &str,
        max_queue_size: usize,
        callback: C,
    ) -> Result<u64> {
        self.with_publisher(topic, |publisher| {
            publisher.add_subscriber(subscriber_name, max_queue_size, callback)
        })
    }

    /// Looks up (or lazily creates) `topic`'s `Publisher<T>` under the
    /// registry mutex, clones its `Arc` out, then drops the registry
    /// lock before calling `f` — so a slow fan-out, subscribe, or
    /// worker shutdown on one topic never blocks registry access for
    /// any other topic.
    fn with_publisher<T, R>(
        &self,
        topic: &str,
        f: impl FnOnce(&Publisher<T>) -> Result<R>,
    ) -> Result<R>
    where
        T: Clone + Send + Sync + 'static,
    {
        let erased = {
            let mut map = self.publishers.lock().unwrap();
            Arc::clone(
                map.entry(topic.to_string())
                    .or_insert_with(|| Arc::new(Publisher::<T>::new(topic)) as Arc<dyn ErasedPublisher>),
            )
        };
        let publisher = erased.as_any_arc().downcast::<Publisher<T>>().map_err(|_| {
            Error::Codec(format!(
                "topic {topic:?} is already registered with a different payload type"
            ))
        })?;
        f(&publisher)
    }

    /// Removes a subscriber by exact `(topic, subscriber_name)`. Returns
    /// `false` if the topic or the name within it does not exist.
    pub fn unsubscribe(&self, topic: &str, subscriber_name: &str) -> bool {
        let publisher = {
            let map = self.publishers.lock().unwrap();
            map.get(topic).cloned()
        };
        match publisher {
            Some(publisher) => publisher.remove_subscriber(subscriber_name),
            None => false,
        }
    }

    /// Removes a subscriber by its process-unique id, searching every
    /// topic. Used by [`crate::broker::Broker`], which only learns the
    /// id a remote `SUB` created.
    pub fn unsubscribe_by_id(&self, subscriber_id: u64) -> bool {
        let publishers: Vec<_> = {
            let map = self.publishers.lock().unwrap();
            map.values().cloned().collect()
        };
        publishers.iter().any(|p| p.remove_subscriber_by_id(subscriber_id))
    }

    /// Snapshot of every topic's stats, in unspecified order.
    pub fn stats(&self) -> Vec<TopicStat> {
        let publishers: Vec<_> = {
            let map = self.publishers.lock().unwrap();
            map.values().cloned().collect()
        };
        publishers.iter().map(|p| p.stats()).collect()
    }
}

static GLOBAL: OnceLock<DataBus> = OnceLock::new();

/// The ambient process-wide `DataBus`, initialized on first access.
/// Prefer an explicit `DataBus::new()` threaded through your
/// components; this exists for callers that want the original's
/// singleton convenience (e.g. the `databus-cli` binary).
pub fn global() -> &'static DataBus {
    GLOBAL.get_or_init(DataBus::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[test]
    fn publish_before_any_subscriber_just_counts() {
        let bus = DataBus::new();
        bus.publish("t", 1i32).unwrap();
        let stats = bus.stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].publish_count, 1);
        assert!(stats[0].subscribers.is_empty());
    }

    #[test]
    fn local_pub_sub_round_trip() {
        let bus = DataBus::new();
        let received = Arc::new(StdMutex::new(Vec::new()));
        let received2 = Arc::clone(&received);
        bus.subscribe("t", "A", 8, move |m: i32| received2.lock().unwrap().push(m))
            .unwrap();
        bus.publish("t", 1).unwrap();
        bus.publish("t", 2).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(*received.lock().unwrap(), vec![1, 2]);
        let stats = bus.stats();
        let sub = &stats[0].subscribers[0];
        assert_eq!(sub.incoming_count, 2);
        assert_eq!(sub.success_count, 2);
        assert_eq!(sub.dropped_count, 0);
    }

    #[test]
    fn duplicate_subscribe_reports_error_stats_unchanged() {
        let bus = DataBus::new();
        let id = bus.subscribe("t", "A", 8, |_: i32| {}).unwrap();
        let second = bus.subscribe("t", "A", 8, |_: i32| {});
        assert!(matches!(second, Err(Error::AlreadySubscribed { .. })));
        assert_eq!(bus.stats()[0].subscribers.len(), 1);
        assert_eq!(bus.stats()[0].subscribers[0].subscriber_id, id);
    }

    #[test]
    fn unsubscribe_stops_future_callbacks() {
        let bus = DataBus::new();
        let received = Arc::new(StdMutex::new(Vec::new()));
        let received2 = Arc::clone(&received);
        bus.subscribe("t", "A", 8, move |m: i32| received2.lock().unwrap().push(m))
            .unwrap();
        bus.publish("t", 1).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert!(bus.unsubscribe("t", "A"));
        bus.publish("t", 2).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(*received.lock().unwrap(), vec![1]);
        assert!(!bus.unsubscribe("t", "A"));
    }

    #[test]
    fn unsubscribe_by_id_finds_subscriber_across_topics() {
        let bus = DataBus::new();
        bus.subscribe("t1", "A", 8, |_: i32| {}).unwrap();
        let id = bus.subscribe("t2", "B", 8, |_: i32| {}).unwrap();
        assert!(bus.unsubscribe_by_id(id));
        assert!(!bus.unsubscribe_by_id(id));
    }

    #[test]
    fn subscribe_then_unsubscribe_is_identity_for_stats_membership() {
        let bus = DataBus::new();
        bus.subscribe("t", "A", 8, |_: i32| {}).unwrap();
        assert_eq!(bus.stats()[0].subscribers.len(), 1);
        bus.unsubscribe("t", "A");
        assert_eq!(bus.stats()[0].subscribers.len(), 0);
    }

    #[test]
    fn mismatched_payload_type_is_reported_not_panicked() {
        let bus = DataBus::new();
        bus.publish("t", 1i32).unwrap();
        let err = bus.publish("t", "not an i32".to_string());
        assert!(err.is_err());
    }
}

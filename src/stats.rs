//! Statistics snapshots exposed by [`crate::worker::SubscriberWorker`],
//! [`crate::publisher::Publisher`] and [`crate::bus::DataBus`].

use std::time::Duration;

/// Snapshot of one subscriber's queue and callback-timing counters.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueStat {
    pub topic: String,
    pub subscriber_name: String,
    pub subscriber_id: u64,
    pub queue_size: usize,
    pub max_queue_size: usize,
    pub incoming_count: u64,
    pub success_count: u64,
    pub dropped_count: u64,
    pub last_callback: Duration,
    pub total_callback: Duration,
}

/// Snapshot of one topic's publish counter plus every subscriber on it.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicStat {
    pub topic: String,
    pub publish_count: u64,
    pub subscribers: Vec<QueueStat>,
}

//! Process-unique monotonic id generation.
//!
//! Mirrors `Subscriber::generateId` in
//! `include/data_bus/subscriber.h`: one atomic counter shared by every
//! subscriber created anywhere in the process, starting at 1.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_subscriber_id() -> u64 {
    NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed)
}

//! Crate-wide error type.
//!
//! `CALLBACK_ERROR` and `OVERFLOW_DROP` are deliberately absent from
//! this enum: neither ever escapes to a caller. A callback error is
//! logged by [`crate::worker`] and the worker keeps running; a queue
//! overflow only increments `dropped_count` on
//! [`crate::ring_queue::RingQueue`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("subscriber already exists for topic={topic:?}, subscriber_name={subscriber_name:?}")]
    AlreadySubscribed {
        topic: String,
        subscriber_name: String,
    },

    #[error("failed to decode frame: {0}")]
    Decode(String),

    #[error("payload too large: {len} bytes exceeds max {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("client is not connected")]
    NotConnected,

    #[error("codec error: {0}")]
    Codec(String),
}

pub type Result<T> = std::result::Result<T, Error>;

//! In-process publish/subscribe data bus with optional TCP and
//! WebSocket network bridging.
//!
//! The core (always available): a per-topic [`publisher`] fans a
//! published message out to every [`worker::SubscriberWorker`], each
//! decoupled from publishers by a bounded, lossy [`ring_queue::RingQueue`].
//! [`bus::DataBus`] is the process-wide topic registry tying those
//! together. `tcp`/`ws` feature-gate the network bridges: [`broker`]
//! and [`bus_client`] re-export a `DataBus` over a length-framed TCP
//! connection ([`tcp`]); [`ws`] hosts the same fan-out pattern for
//! browser clients over WebSocket frames.

pub mod codec;
pub mod config;
pub mod error;
pub mod ids;
pub mod protocol;
pub mod publisher;
pub mod ring_queue;
pub mod stats;
pub mod worker;

pub mod bus;

#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(feature = "tcp")]
pub mod broker;

#[cfg(feature = "tcp")]
pub mod bus_client;

#[cfg(feature = "ws")]
pub mod ws;

pub use bus::DataBus;
pub use error::{Error, Result};
pub use publisher::Publisher;
pub use ring_queue::RingQueue;
pub use stats::{QueueStat, TopicStat};
pub use worker::SubscriberWorker;

#[cfg(feature = "tcp")]
pub use broker::Broker;
#[cfg(feature = "tcp")]
pub use bus_client::BusClient;

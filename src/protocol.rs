//! Wire envelope exchanged between [`crate::broker::Broker`] and
//! [`crate::bus_client::BusClient`]. Grounded on the `protocol::Message`
//! family used by `data_bus_proxy.h`/`data_bus_client.h`; the original
//! defines these with protobuf, this crate with `serde`.

use serde::{Deserialize, Serialize};

/// Frame kind, matching `protocol::Message_Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Sub,
    Unsub,
    Pub,
    SubAck,
    UnsubAck,
}

/// Outer envelope. `payload` is itself a JSON-encoded inner payload
/// (`SubPayload`, `UnsubPayload`, `PubPayload`, `SubAckPayload` or
/// `UnsubAckPayload`), optionally zlib-compressed when `compressed` is
/// set — see [`crate::codec::compress`]/[`crate::codec::decompress`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub compressed: bool,
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

/// `protocol::SubPayload`. `max_rate` is advisory: `0` means
/// unbounded, matching the original's default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubPayload {
    pub topic: String,
    pub subscriber_name: String,
    pub compressed: bool,
    pub max_rate: i32,
}

/// `protocol::UnSubPayload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubPayload {
    pub topic: String,
    pub subscriber_name: String,
}

/// `protocol::PubPayload`. `data` is the application payload encoded by
/// the caller's `Codec<T>`, with `data_type` naming it for the peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubPayload {
    pub topic: String,
    pub data_type: String,
    pub data: Vec<u8>,
}

/// `protocol::AckResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckResult {
    Success,
    SubRepeated,
    UnsubNotFound,
}

/// `protocol::SubAckPayload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAckPayload {
    pub topic: String,
    pub subscriber_name: String,
    pub result: AckResult,
}

/// `protocol::UnSubAckPayload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubAckPayload {
    pub topic: String,
    pub subscriber_name: String,
    pub result: AckResult,
}

impl Message {
    /// Encodes `payload` as JSON and wraps it, compressing first when
    /// `compressed` is true.
    pub fn wrap(kind: MessageKind, payload: &impl Serialize, compressed: bool) -> crate::error::Result<Self> {
        let encoded = serde_json::to_vec(payload).map_err(|e| crate::error::Error::Codec(e.to_string()))?;
        let payload = if compressed {
            crate::codec::compress(&encoded)?
        } else {
            encoded
        };
        Ok(Self {
            compressed,
            kind,
            payload,
        })
    }

    /// Decodes the inner payload as JSON, decompressing first if
    /// `compressed` is set.
    pub fn unwrap_payload<T: for<'de> Deserialize<'de>>(&self) -> crate::error::Result<T> {
        let bytes = if self.compressed {
            crate::codec::decompress(&self.payload)?
        } else {
            self.payload.clone()
        };
        serde_json::from_slice(&bytes).map_err(|e| crate::error::Error::Codec(e.to_string()))
    }
}

//! Wire encoding and compression, kept as separate stages.
//!
//! Grounded on `include/data_bus/proto_utils.h` (per-type message
//! encode/decode) and `include/util/zlib_utils.h` (compression as an
//! independent filter, not baked into the message format). The
//! original encodes with protobuf; nothing in this crate's dependency
//! stack provides protobuf, so JSON via `serde`/`serde_json` is the
//! substituted wire encoding (see `DESIGN.md`).
//!
//! `Codec<T>` itself only knows how to move one concrete `T` to and
//! from bytes — it has no `type_name`-keyed `decode` because a single
//! Rust type can't stand in for arbitrary message types the way a
//! protobuf `Message*` can. [`CodecRegistry`] is what restores that
//! capability: it's `ProtoUtils::createMessage(type_name)`'s
//! reflection-based factory, rebuilt as a table of per-topic decode and
//! re-encode closures so [`crate::broker::Broker`] can dispatch a wire
//! frame to the right `Codec<T>` without knowing `T` at compile time.

use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Read;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::bus::DataBus;
use crate::error::{Error, Result};
use crate::protocol::PubPayload;

/// Encodes/decodes a single Rust type to/from wire bytes.
pub trait Codec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<T>;
    fn type_name(&self) -> &str;
}

/// Default codec for any `T: Serialize + DeserializeOwned`.
pub struct JsonCodec<T> {
    type_name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new(std::any::type_name::<T>())
    }
}

impl<T: Serialize + DeserializeOwned + Send + Sync> Codec<T> for JsonCodec<T> {
    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::Codec(e.to_string()))
    }

    fn type_name(&self) -> &str {
        self.type_name
    }
}

/// Identity codec for a caller that already holds wire-ready bytes and
/// only needs a `type_name` label to go with them, e.g. `databus-cli`
/// forwarding whatever a user typed without a schema in hand.
pub struct RawBytesCodec {
    type_name: String,
}

impl RawBytesCodec {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }
}

impl Codec<Vec<u8>> for RawBytesCodec {
    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn type_name(&self) -> &str {
        &self.type_name
    }
}

type DecodeAndPublish = Box<dyn Fn(&DataBus, &str, &[u8]) -> Result<()> + Send + Sync>;
type SubscribeAndForward = Box<
    dyn Fn(&DataBus, &str, &str, usize, Arc<dyn Fn(PubPayload) + Send + Sync>) -> Result<u64> + Send + Sync,
>;

struct Entry {
    type_name: String,
    decode_and_publish: DecodeAndPublish,
    subscribe_and_forward: SubscribeAndForward,
}

/// Maps a bridged topic to the concrete Rust type its messages decode
/// to. A topic registered here decodes a `PUB` frame straight into its
/// own typed `Publisher<T>` on the bus, and a remote `SUB` for it
/// subscribes on that same `Publisher<T>`, re-encoding each delivery
/// back onto the wire — so a local, natively-typed publish and a
/// bridged subscriber on the same topic see each other's messages, and
/// vice versa. A topic with no entry still bridges, just opaquely: see
/// `Broker`'s `BridgedPayload` fallback.
#[derive(Default)]
pub struct CodecRegistry {
    by_topic: HashMap<String, Entry>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `topic` as carrying values of `T`, via `codec`.
    pub fn register<T, C>(&mut self, topic: impl Into<String>, codec: C)
    where
        T: Clone + Send + Sync + 'static,
        C: Codec<T> + 'static,
    {
        let codec = Arc::new(codec);
        let type_name = codec.type_name().to_string();

        let decode_codec = Arc::clone(&codec);
        let decode_and_publish: DecodeAndPublish = Box::new(move |bus, topic, bytes| {
            let value = decode_codec.decode(bytes)?;
            bus.publish::<T>(topic, value)
        });

        let encode_codec = Arc::clone(&codec);
        let subscribe_and_forward: SubscribeAndForward =
            Box::new(move |bus, topic, subscriber_name, max_queue_size, forward| {
                let codec = Arc::clone(&encode_codec);
                let topic_owned = topic.to_string();
                bus.subscribe::<T, _>(topic, subscriber_name, max_queue_size, move |value: T| {
                    let Ok(data) = codec.encode(&value) else {
                        return;
                    };
                    forward(PubPayload {
                        topic: topic_owned.clone(),
                        data_type: codec.type_name().to_string(),
                        data,
                    });
                })
            });

        self.by_topic.insert(
            topic.into(),
            Entry {
                type_name,
                decode_and_publish,
                subscribe_and_forward,
            },
        );
    }

    fn get(&self, topic: &str) -> Option<&Entry> {
        self.by_topic.get(topic)
    }

    pub fn type_name_for(&self, topic: &str) -> Option<&str> {
        self.get(topic).map(|e| e.type_name.as_str())
    }

    /// Decodes `bytes` for `topic`'s registered type and publishes it
    /// onto `bus`. Callers must check [`Self::type_name_for`] first;
    /// this returns a [`Error::Codec`] for an unregistered topic.
    pub fn decode_and_publish(&self, bus: &DataBus, topic: &str, bytes: &[u8]) -> Result<()> {
        match self.get(topic) {
            Some(entry) => (entry.decode_and_publish)(bus, topic, bytes),
            None => Err(Error::Codec(format!("no codec registered for topic {topic:?}"))),
        }
    }

    /// Subscribes on `topic`'s registered `Publisher<T>` and calls
    /// `forward` with a wire-ready [`PubPayload`] for every delivery.
    /// Callers must check [`Self::type_name_for`] first; this returns a
    /// [`Error::Codec`] for an unregistered topic.
    pub fn subscribe_and_forward(
        &self,
        bus: &DataBus,
        topic: &str,
        subscriber_name: &str,
        max_queue_size: usize,
        forward: Arc<dyn Fn(PubPayload) + Send + Sync>,
    ) -> Result<u64> {
        match self.get(topic) {
            Some(entry) => (entry.subscribe_and_forward)(bus, topic, subscriber_name, max_queue_size, forward),
            None => Err(Error::Codec(format!("no codec registered for topic {topic:?}"))),
        }
    }
}

/// zlib-compresses `data` at the best-compression level, matching
/// `ZlibUtils::compress`.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(data, Compression::best());
    let mut out = Vec::new();
    encoder
        .read_to_end(&mut out)
        .map_err(|e| Error::Codec(e.to_string()))?;
    Ok(out)
}

/// Inverse of [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::Codec(e.to_string()))?;
    Ok(out)
}

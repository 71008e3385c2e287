//! Server-side network bridge: translates `SUB`/`UNSUB`/`PUB` frames
//! into [`DataBus`] operations. Grounded on
//! `include/data_bus/data_bus_proxy.h`.
//!
//! A topic registered in the broker's [`CodecRegistry`] decodes a `PUB`
//! straight into its own concrete type and publishes it on that type's
//! own `Publisher<T>`, and a remote `SUB` for it subscribes on that
//! same `Publisher<T>` — so a local, natively-typed publish/subscribe
//! and a bridged peer see each other's messages on that topic. A topic
//! with no registry entry falls back to carrying [`BridgedPayload`]
//! (raw encoded bytes plus the wire `data_type`) through the bus, the
//! same role `PubPayload::data_type` plays in the original around a
//! common `ProtoMessage` base that carries its own type via protobuf
//! reflection — opaque, but still forwards to other remote subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::net::TcpListener;
use tokio::runtime::Handle;

use crate::bus::{DataBus, DEFAULT_QUEUE_SIZE};
use crate::codec::CodecRegistry;
use crate::error::Result;
use crate::protocol::{
    AckResult, Message, MessageKind, PubPayload, SubAckPayload, SubPayload, UnsubAckPayload, UnsubPayload,
};
use crate::tcp::{self, TcpSession};

/// Bus-internal stand-in for a bridged `PUB` frame's body: the encoded
/// bytes plus the `data_type` they were tagged with on the wire. Kept
/// as one payload type so every bridged topic's `Publisher` is a
/// single `Publisher<BridgedPayload>` regardless of how many distinct
/// `data_type`s are published on it.
#[derive(Debug, Clone)]
pub struct BridgedPayload {
    pub data_type: String,
    pub data: Vec<u8>,
}

/// Per-subscriber token bucket backing the advisory `max_rate` field of
/// a `SUB` frame. `max_rate <= 0` disables limiting entirely, matching
/// the original's behavior of never limiting.
struct RateLimiter {
    capacity: f64,
    state: Mutex<(f64, Instant)>,
}

impl RateLimiter {
    fn new(max_rate: i32) -> Option<Self> {
        if max_rate <= 0 {
            return None;
        }
        let capacity = max_rate as f64;
        Some(Self {
            capacity,
            state: Mutex::new((capacity, Instant::now())),
        })
    }

    /// Tries to take one token; `false` means the caller should drop
    /// this delivery rather than forward it.
    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        let (tokens, last) = &mut *state;
        let elapsed = last.elapsed().as_secs_f64();
        *tokens = (*tokens + elapsed * self.capacity).min(self.capacity);
        *last = Instant::now();
        if *tokens >= 1.0 {
            *tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct Bridged {
    topic: String,
    subscriber_id: u64,
}

#[derive(Default)]
struct SessionState {
    bridged: Vec<Bridged>,
}

/// Bridges a [`DataBus`] onto the network: every connected peer can
/// `SUB`/`UNSUB`/`PUB` against the same topics local in-process
/// subscribers use.
pub struct Broker {
    bus: Arc<DataBus>,
    registry: Arc<CodecRegistry>,
    sessions: Mutex<HashMap<u64, SessionState>>,
}

impl Broker {
    /// `registry` is consulted by topic for both directions: a `PUB`
    /// decodes through it if the topic is registered, and a `SUB`
    /// subscribes through it too, so the two sides of a registered
    /// topic always agree on one concrete type. An empty registry
    /// (`CodecRegistry::new()`) still bridges every topic, just
    /// opaquely via [`BridgedPayload`].
    pub fn new(bus: Arc<DataBus>, registry: Arc<CodecRegistry>) -> Arc<Self> {
        Arc::new(Self {
            bus,
            registry,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Accepts connections on `listener` until accept fails.
    pub async fn listen(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        let on_message_broker = Arc::clone(self);
        let on_disconnect_broker = Arc::clone(self);
        tcp::acceptor::listen(
            listener,
            tcp::DEFAULT_MAX_FRAME_LEN,
            move |session, message| {
                let broker = Arc::clone(&on_message_broker);
                tokio::spawn(async move {
                    broker.handle_message(session, message).await;
                });
            },
            move |session_id| on_disconnect_broker.handle_disconnect(session_id),
        )
        .await
    }

    async fn handle_message(self: Arc<Self>, session: Arc<TcpSession>, message: Message) {
        let result = match message.kind {
            MessageKind::Sub => self.handle_sub(&session, &message).await,
            MessageKind::Unsub => self.handle_unsub(&session, &message).await,
            MessageKind::Pub => self.handle_pub(&message),
            MessageKind::SubAck | MessageKind::UnsubAck => Ok(()),
        };
        if let Err(e) = result {
            log::warn!("broker failed to handle frame, session_id={}, error={e}", session.id());
        }
    }

    async fn handle_sub(&self, session: &Arc<TcpSession>, message: &Message) -> Result<()> {
        let payload: SubPayload = message.unwrap_payload()?;
        let rate_limiter = RateLimiter::new(payload.max_rate).map(Arc::new);
        let runtime = Handle::current();
        let reply_session = Arc::clone(session);
        let compressed = payload.compressed;

        let forward: Arc<dyn Fn(PubPayload) + Send + Sync> = Arc::new(move |pub_payload: PubPayload| {
            if let Some(limiter) = &rate_limiter {
                if !limiter.try_acquire() {
                    return;
                }
            }
            let Ok(out) = Message::wrap(MessageKind::Pub, &pub_payload, compressed) else {
                return;
            };
            let session = Arc::clone(&reply_session);
            runtime.spawn(async move {
                if let Err(e) = session.send(&out).await {
                    log::warn!("broker failed to forward publish, session_id={}, error={e}", session.id());
                }
            });
        });

        let subscribe_result = if self.registry.type_name_for(&payload.topic).is_some() {
            self.registry.subscribe_and_forward(
                &self.bus,
                &payload.topic,
                &payload.subscriber_name,
                DEFAULT_QUEUE_SIZE,
                forward,
            )
        } else {
            let topic = payload.topic.clone();
            self.bus.subscribe::<BridgedPayload, _>(
                &payload.topic,
                &payload.subscriber_name,
                DEFAULT_QUEUE_SIZE,
                move |bridged| {
                    forward(PubPayload {
                        topic: topic.clone(),
                        data_type: bridged.data_type,
                        data: bridged.data,
                    });
                },
            )
        };

        let result = match &subscribe_result {
            Ok(id) => {
                let mut sessions = self.sessions.lock().unwrap();
                sessions.entry(session.id()).or_default().bridged.push(Bridged {
                    topic: payload.topic.clone(),
                    subscriber_id: *id,
                });
                AckResult::Success
            }
            Err(_) => AckResult::SubRepeated,
        };

        let ack = SubAckPayload {
            topic: payload.topic,
            subscriber_name: payload.subscriber_name,
            result,
        };
        let out = Message::wrap(MessageKind::SubAck, &ack, false)?;
        session.send(&out).await
    }

    async fn handle_unsub(&self, session: &Arc<TcpSession>, message: &Message) -> Result<()> {
        let payload: UnsubPayload = message.unwrap_payload()?;
        let removed = self.bus.unsubscribe(&payload.topic, &payload.subscriber_name);
        if removed {
            let mut sessions = self.sessions.lock().unwrap();
            if let Some(state) = sessions.get_mut(&session.id()) {
                state.bridged.retain(|b| b.topic != payload.topic);
            }
        }
        let ack = UnsubAckPayload {
            topic: payload.topic,
            subscriber_name: payload.subscriber_name,
            result: if removed {
                AckResult::Success
            } else {
                AckResult::UnsubNotFound
            },
        };
        let out = Message::wrap(MessageKind::UnsubAck, &ack, false)?;
        session.send(&out).await
    }

    fn handle_pub(&self, message: &Message) -> Result<()> {
        let payload: PubPayload = message.unwrap_payload()?;
        if self.registry.type_name_for(&payload.topic).is_some() {
            self.registry.decode_and_publish(&self.bus, &payload.topic, &payload.data)
        } else {
            self.bus.publish::<BridgedPayload>(
                &payload.topic,
                BridgedPayload {
                    data_type: payload.data_type,
                    data: payload.data,
                },
            )
        }
    }

    fn handle_disconnect(&self, session_id: u64) {
        let state = self.sessions.lock().unwrap().remove(&session_id);
        if let Some(state) = state {
            for bridged in state.bridged {
                self.bus.unsubscribe_by_id(bridged.subscriber_id);
            }
        }
    }
}

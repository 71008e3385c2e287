//! Client-side network bridge: a local façade over a remote
//! [`crate::broker::Broker`]. Grounded on
//! `include/data_bus/data_bus_client.h`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::net::ToSocketAddrs;

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::protocol::{Message, MessageKind, PubPayload, SubPayload, UnsubPayload};
use crate::ring_queue::RingQueue;
use crate::tcp::{self, TcpSession};

const DEFAULT_QUEUE_SIZE: usize = 1;

struct LocalSubscription {
    queue: Arc<RingQueue<Vec<u8>>>,
    handle: std::thread::JoinHandle<()>,
    running: Arc<std::sync::atomic::AtomicBool>,
}

/// Publishes and subscribes against a remote [`crate::broker::Broker`]
/// over one TCP connection. Unlike the in-process [`crate::bus::DataBus`],
/// payloads always travel as already-encoded bytes: callers decode in
/// their own callback, mirroring the original's "subscriber worker
/// owns one `RingQueue<Ptr<ProtoMessage>>`" structure minus the shared
/// base class.
pub struct BusClient {
    session: Arc<TcpSession>,
    subscriptions: Arc<Mutex<HashMap<String, LocalSubscription>>>,
}

impl BusClient {
    /// Connects to `addr` and starts routing inbound `PUB` frames to
    /// whichever local subscription matches their topic.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Arc<Self>> {
        let subscriptions: Arc<Mutex<HashMap<String, LocalSubscription>>> = Arc::new(Mutex::new(HashMap::new()));
        let subs_for_router = Arc::clone(&subscriptions);
        let session = tcp::client::connect_default(
            addr,
            move |message| {
                if message.kind != MessageKind::Pub {
                    return;
                }
                let Ok(payload) = message.unwrap_payload::<PubPayload>() else {
                    return;
                };
                let subs = subs_for_router.lock().unwrap();
                if let Some(sub) = subs.get(&payload.topic) {
                    sub.queue.put(payload.data);
                }
            },
            |_session_id| {},
        )
        .await?;

        Ok(Arc::new(Self { session, subscriptions }))
    }

    /// Subscribes to `topic` on the remote broker and routes decoded
    /// `callback(value)` on a dedicated local drain thread, identical in
    /// shape to [`crate::worker::SubscriberWorker`]. Fails before
    /// sending any frame if this client already has a local
    /// subscription for `topic`.
    pub async fn subscribe<T, D>(
        &self,
        topic: &str,
        subscriber_name: &str,
        max_queue_size: usize,
        decode: D,
        callback: impl Fn(T) + Send + 'static,
        compressed: bool,
        max_rate: i32,
    ) -> Result<()>
    where
        T: Send + 'static,
        D: Fn(&[u8]) -> Result<T> + Send + 'static,
    {
        {
            let subs = self.subscriptions.lock().unwrap();
            if subs.contains_key(topic) {
                return Err(Error::AlreadySubscribed {
                    topic: topic.to_string(),
                    subscriber_name: subscriber_name.to_string(),
                });
            }
        }

        let queue = Arc::new(RingQueue::<Vec<u8>>::new(max_queue_size.max(DEFAULT_QUEUE_SIZE)));
        let running = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let drain_queue = Arc::clone(&queue);
        let drain_running = Arc::clone(&running);
        let handle = std::thread::Builder::new()
            .name(format!("databus-client-{subscriber_name}"))
            .spawn(move || {
                while drain_running.load(std::sync::atomic::Ordering::Acquire) {
                    let Some(bytes) = drain_queue.take() else {
                        break;
                    };
                    if !drain_running.load(std::sync::atomic::Ordering::Acquire) {
                        break;
                    }
                    match decode(&bytes) {
                        Ok(value) => callback(value),
                        Err(e) => log::warn!("bus client failed to decode message, error={e}"),
                    }
                }
            })
            .expect("failed to spawn bus client drain thread");

        self.subscriptions.lock().unwrap().insert(
            topic.to_string(),
            LocalSubscription {
                queue,
                handle,
                running,
            },
        );

        let payload = SubPayload {
            topic: topic.to_string(),
            subscriber_name: subscriber_name.to_string(),
            compressed,
            max_rate,
        };
        let message = Message::wrap(MessageKind::Sub, &payload, false)?;
        self.session.send(&message).await
    }

    /// Sends an `UNSUB` frame and tears down the local drain thread.
    /// Does not wait for `UNSUB_ACK`; the original fires and forgets.
    pub async fn unsubscribe(&self, topic: &str, subscriber_name: &str) -> Result<()> {
        let removed = self.subscriptions.lock().unwrap().remove(topic);
        if let Some(sub) = removed {
            sub.running.store(false, std::sync::atomic::Ordering::Release);
            sub.queue.shutdown();
            let _ = sub.handle.join();
        }
        let payload = UnsubPayload {
            topic: topic.to_string(),
            subscriber_name: subscriber_name.to_string(),
        };
        let message = Message::wrap(MessageKind::Unsub, &payload, false)?;
        self.session.send(&message).await
    }

    /// Encodes `value` with `codec` and sends it as a `PUB` frame,
    /// tagged with `codec.type_name()` for the remote side to dispatch
    /// on.
    pub async fn publish<T>(&self, topic: &str, value: &T, codec: &(impl Codec<T> + ?Sized)) -> Result<()> {
        let payload = PubPayload {
            topic: topic.to_string(),
            data_type: codec.type_name().to_string(),
            data: codec.encode(value)?,
        };
        let message = Message::wrap(MessageKind::Pub, &payload, false)?;
        self.session.send(&message).await
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        for (_, sub) in self.subscriptions.lock().unwrap().drain() {
            sub.running.store(false, std::sync::atomic::Ordering::Release);
            sub.queue.shutdown();
            let _ = sub.handle.join();
        }
    }
}

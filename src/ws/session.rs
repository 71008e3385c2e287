//! WebSocket session with heartbeat. Grounded on
//! `http/websocket_session.h`. This crate does not own the HTTP
//! upgrade (out of scope); callers hand in an already-accepted
//! `WebSocketStream<S>` the way the original's constructor takes an
//! already-accepted `tcp::socket`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::error::{Error, Result};

/// `ping_state_` in the original, collapsed from three states (`0`,
/// `1` "ping sent", `2` "ping completed") to two: this crate does not
/// need to distinguish an in-flight ping write from a sent one, both
/// just wait for a pong or the next timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PingState {
    Active,
    Pinged,
    Closed,
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// One accepted WebSocket connection plus its heartbeat state machine.
pub struct WebsocketSession<S> {
    id: u64,
    sink: AsyncMutex<futures_util::stream::SplitSink<WebSocketStream<S>, WsMessage>>,
    state: Mutex<PingState>,
}

impl<S> WebsocketSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Spawns the read/heartbeat loop for `stream` and returns the
    /// session handle. `on_message` runs for every decoded text/binary
    /// frame; `on_close` runs exactly once, whether the peer closed
    /// cleanly, a read failed, or the heartbeat timed out.
    pub fn spawn(
        stream: WebSocketStream<S>,
        timeout: Duration,
        on_message: impl Fn(Arc<Self>, Vec<u8>) + Send + Sync + 'static,
        on_close: impl FnOnce(u64) + Send + 'static,
    ) -> Arc<Self> {
        let (sink, mut source) = stream.split();
        let session = Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            sink: AsyncMutex::new(sink),
            state: Mutex::new(PingState::Active),
        });

        let loop_session = Arc::clone(&session);
        tokio::spawn(async move {
            let mut deadline = tokio::time::Instant::now() + timeout;
            loop {
                tokio::select! {
                    frame = source.next() => {
                        match frame {
                            Some(Ok(WsMessage::Binary(bytes))) => {
                                loop_session.set_active();
                                deadline = tokio::time::Instant::now() + timeout;
                                on_message(Arc::clone(&loop_session), bytes);
                            }
                            Some(Ok(WsMessage::Text(text))) => {
                                loop_session.set_active();
                                deadline = tokio::time::Instant::now() + timeout;
                                on_message(Arc::clone(&loop_session), text.into_bytes());
                            }
                            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {
                                loop_session.set_active();
                                deadline = tokio::time::Instant::now() + timeout;
                            }
                            Some(Ok(WsMessage::Close(_))) | None => break,
                            Some(Ok(WsMessage::Frame(_))) => {}
                            Some(Err(e)) => {
                                log::warn!("websocket read error, session_id={}, error={e}", loop_session.id);
                                break;
                            }
                        }
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        let next_state = {
                            let mut state = loop_session.state.lock().unwrap();
                            *state = match *state {
                                PingState::Active => PingState::Pinged,
                                PingState::Pinged | PingState::Closed => PingState::Closed,
                            };
                            *state
                        };
                        match next_state {
                            PingState::Pinged => {
                                deadline = tokio::time::Instant::now() + timeout;
                                if loop_session.send_ping().await.is_err() {
                                    break;
                                }
                            }
                            PingState::Closed => break,
                            PingState::Active => unreachable!(),
                        }
                    }
                }
            }
            loop_session.mark_closed();
            on_close(loop_session.id);
        });

        session
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn set_active(&self) {
        *self.state.lock().unwrap() = PingState::Active;
    }

    fn mark_closed(&self) {
        *self.state.lock().unwrap() = PingState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        *self.state.lock().unwrap() == PingState::Closed
    }

    async fn send_ping(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(WsMessage::Ping(Vec::new()))
            .await
            .map_err(|e| Error::Codec(e.to_string()))
    }

    /// Sends one binary frame. Frames from concurrent callers are
    /// serialized through the sink lock, preserving send order exactly
    /// as the original's single-in-flight write queue does.
    pub async fn send(&self, data: Vec<u8>) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(WsMessage::Binary(data.into()))
            .await
            .map_err(|e| Error::Codec(e.to_string()))
    }

    /// Initiates a graceful close. The read loop's own close/eof
    /// handling still drives `on_close`.
    pub async fn close(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(WsMessage::Close(None)).await.map_err(|e| Error::Codec(e.to_string()))
    }
}

/// Sends `data` to every session in `sessions`, dropping the registry
/// lock before awaiting any write so a slow peer cannot stall the
/// others or the caller.
pub async fn broadcast<S>(sessions: &Mutex<HashMap<u64, Arc<WebsocketSession<S>>>>, data: &[u8])
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let targets: Vec<_> = sessions.lock().unwrap().values().cloned().collect();
    for session in targets {
        if let Err(e) = session.send(data.to_vec()).await {
            log::warn!("broadcast failed, session_id={}, error={e}", session.id());
        }
    }
}

//! Connection acceptor. Grounded on `include/tcp_tool/acceptor.h`
//! (`tcp_server.h`'s session registry keyed by session id, plus its
//! `broadcast` helper).
//!
//! [`listen`]/[`listen_default`] are the bare accept loop with no
//! registry, used by [`crate::broker::Broker`], which keeps its own
//! per-session subscription bookkeeping and has no need to broadcast.
//! [`TcpServer`] wraps the same accept loop with a session-id registry
//! so callers that want to broadcast to every connected peer can.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;

use crate::error::Result;
use crate::protocol::Message;
use crate::tcp::session::{read_frame, TcpSession, DEFAULT_MAX_FRAME_LEN};

/// Accepts connections on an already-bound `listener` until accept
/// fails, spawning a read loop per connection that calls `on_message`
/// for every decoded frame and `on_disconnect` once the peer closes or
/// a read fails. Binding is left to the caller so callers can learn
/// the bound port (e.g. `:0`) before this future starts running.
pub async fn listen<M, D>(listener: TcpListener, max_frame_len: usize, on_message: M, on_disconnect: D) -> Result<()>
where
    M: Fn(Arc<TcpSession>, Message) + Send + Sync + 'static,
    D: Fn(u64) + Send + Sync + 'static,
{
    let on_message = Arc::new(on_message);
    let on_disconnect = Arc::new(on_disconnect);
    loop {
        let (stream, peer) = listener.accept().await?;
        log::info!("accepted tcp connection, peer={peer}");
        let (session, mut read_half) = TcpSession::with_max_frame_len(stream, max_frame_len);
        let on_message = Arc::clone(&on_message);
        let on_disconnect = Arc::clone(&on_disconnect);
        tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half, max_frame_len).await {
                    Ok(Some(message)) => on_message(Arc::clone(&session), message),
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("tcp read error, session_id={}, error={e}", session.id());
                        break;
                    }
                }
            }
            on_disconnect(session.id());
        });
    }
}

/// `listen` with the default max frame length.
pub async fn listen_default<M, D>(listener: TcpListener, on_message: M, on_disconnect: D) -> Result<()>
where
    M: Fn(Arc<TcpSession>, Message) + Send + Sync + 'static,
    D: Fn(u64) + Send + Sync + 'static,
{
    listen(listener, DEFAULT_MAX_FRAME_LEN, on_message, on_disconnect).await
}

/// Accepts connections while keeping a `session_id -> TcpSession`
/// registry, so a caller can [`TcpServer::broadcast`] to every
/// currently connected peer. Registration happens before `on_message`
/// can fire for that session and deregistration happens once its read
/// loop exits.
pub struct TcpServer {
    sessions: Mutex<HashMap<u64, Arc<TcpSession>>>,
}

impl TcpServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Accepts connections on `listener` until accept fails. Each
    /// session is registered before its read loop starts and deregistered
    /// once that loop exits, so a session is broadcast-reachable for its
    /// whole lifetime — not just from its first received frame.
    /// `on_message` runs for every decoded frame on any session.
    pub async fn listen<M>(self: &Arc<Self>, listener: TcpListener, max_frame_len: usize, on_message: M) -> Result<()>
    where
        M: Fn(Arc<TcpSession>, Message) + Send + Sync + 'static,
    {
        let on_message = Arc::new(on_message);
        loop {
            let (stream, peer) = listener.accept().await?;
            log::info!("accepted tcp connection, peer={peer}");
            let (session, mut read_half) = TcpSession::with_max_frame_len(stream, max_frame_len);
            self.sessions.lock().unwrap().insert(session.id(), Arc::clone(&session));

            let server = Arc::clone(self);
            let on_message = Arc::clone(&on_message);
            tokio::spawn(async move {
                loop {
                    match read_frame(&mut read_half, max_frame_len).await {
                        Ok(Some(message)) => on_message(Arc::clone(&session), message),
                        Ok(None) => break,
                        Err(e) => {
                            log::warn!("tcp read error, session_id={}, error={e}", session.id());
                            break;
                        }
                    }
                }
                server.sessions.lock().unwrap().remove(&session.id());
            });
        }
    }

    /// Sends `message` to every session currently registered. Drops the
    /// registry lock before awaiting any write, so one slow peer cannot
    /// stall delivery to the others or the caller.
    pub async fn broadcast(&self, message: &Message) {
        let targets: Vec<_> = self.sessions.lock().unwrap().values().cloned().collect();
        for session in targets {
            if let Err(e) = session.send(message).await {
                log::warn!("tcp broadcast failed, session_id={}, error={e}", session.id());
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn accepted_session_invokes_on_message_per_frame() {
        let received = Arc::new(AtomicUsize::new(0));
        let received2 = Arc::clone(&received);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(listen(
            listener,
            DEFAULT_MAX_FRAME_LEN,
            move |_session, _message| {
                received2.fetch_add(1, Ordering::Relaxed);
            },
            |_id| {},
        ));
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let (session, _read_half) = TcpSession::new(stream);
        session
            .send(&Message {
                compressed: false,
                kind: MessageKind::Pub,
                payload: vec![1],
            })
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(received.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_registered_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = TcpServer::new();
        let server_for_listen = Arc::clone(&server);
        tokio::spawn(async move {
            server_for_listen
                .listen(listener, DEFAULT_MAX_FRAME_LEN, |_session, _message| {})
                .await
                .unwrap();
        });
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let mut readers = Vec::new();
        for _ in 0..3 {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (_session, read_half) = TcpSession::new(stream);
            readers.push(read_half);
        }
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(server.session_count(), 3);

        server
            .broadcast(&Message {
                compressed: false,
                kind: MessageKind::Pub,
                payload: vec![7],
            })
            .await;

        for mut read_half in readers {
            let message = read_frame(&mut read_half, DEFAULT_MAX_FRAME_LEN).await.unwrap().unwrap();
            assert_eq!(message.payload, vec![7]);
        }
    }

    #[tokio::test]
    async fn disconnected_session_is_deregistered() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = TcpServer::new();
        let server_for_listen = Arc::clone(&server);
        tokio::spawn(async move {
            server_for_listen
                .listen(listener, DEFAULT_MAX_FRAME_LEN, |_session, _message| {})
                .await
                .unwrap();
        });
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        drop(stream);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(server.session_count(), 0);
    }
}

//! Outbound TCP connection. Grounded on `include/tcp_tool/tcp_client.h`.

use std::sync::Arc;

use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::Result;
use crate::protocol::Message;
use crate::tcp::session::{read_frame, TcpSession, DEFAULT_MAX_FRAME_LEN};

/// Connects to `addr` and spawns a read loop calling `on_message` for
/// every decoded frame and `on_disconnect` once the peer closes or a
/// read fails. Returns the session handle used to `send`.
pub async fn connect<M, D>(addr: impl ToSocketAddrs, max_frame_len: usize, on_message: M, on_disconnect: D) -> Result<Arc<TcpSession>>
where
    M: Fn(Message) + Send + Sync + 'static,
    D: Fn(u64) + Send + Sync + 'static,
{
    let stream = TcpStream::connect(addr).await?;
    let (session, mut read_half) = TcpSession::with_max_frame_len(stream, max_frame_len);
    let session_for_loop = Arc::clone(&session);
    tokio::spawn(async move {
        loop {
            match read_frame(&mut read_half, max_frame_len).await {
                Ok(Some(message)) => on_message(message),
                Ok(None) => break,
                Err(e) => {
                    log::warn!("tcp client read error, session_id={}, error={e}", session_for_loop.id());
                    break;
                }
            }
        }
        on_disconnect(session_for_loop.id());
    });
    Ok(session)
}

/// `connect` with the default max frame length.
pub async fn connect_default<M, D>(addr: impl ToSocketAddrs, on_message: M, on_disconnect: D) -> Result<Arc<TcpSession>>
where
    M: Fn(Message) + Send + Sync + 'static,
    D: Fn(u64) + Send + Sync + 'static,
{
    connect(addr, DEFAULT_MAX_FRAME_LEN, on_message, on_disconnect).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageKind;
    use crate::tcp::acceptor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn client_receives_messages_sent_by_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(acceptor::listen(
            listener,
            DEFAULT_MAX_FRAME_LEN,
            |session, message| {
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    session.send(&message).await.unwrap();
                });
            },
            |_id| {},
        ));
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let received = Arc::new(AtomicUsize::new(0));
        let received2 = Arc::clone(&received);
        let session = connect_default(
            addr,
            move |_message| {
                received2.fetch_add(1, Ordering::Relaxed);
            },
            |_id| {},
        )
        .await
        .unwrap();

        session
            .send(&Message {
                compressed: false,
                kind: MessageKind::Pub,
                payload: vec![9],
            })
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(received.load(Ordering::Relaxed), 1);
    }
}

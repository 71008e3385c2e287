//! WebSocket fan-out session. Grounded on `http/websocket_session.h`;
//! the HTTP upgrade itself is an external collaborator this module does
//! not own — callers hand in an already-accepted stream.

pub mod session;

pub use session::{broadcast, WebsocketSession, DEFAULT_TIMEOUT};

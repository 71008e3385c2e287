//! Length-delimited TCP transport used to bridge a [`crate::bus::DataBus`]
//! across a process boundary. Grounded on `include/tcp_tool/`.

pub mod acceptor;
pub mod client;
pub mod session;

pub use acceptor::TcpServer;
pub use session::{read_frame, TcpSession, DEFAULT_MAX_FRAME_LEN};

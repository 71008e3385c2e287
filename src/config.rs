//! Server wrapper configuration. `web_dir`/static file serving and
//! HTTP routing are external collaborators this crate only names the
//! interface of; `ServerSettings` is the serializable half, split from
//! the non-serializable handler closures the way `chronicle`'s
//! `WriterConfig` keeps policy knobs separate from the callbacks its
//! readers/writers are constructed with.

use std::path::PathBuf;
#[cfg(feature = "ws")]
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Idle seconds before a websocket session's heartbeat closes it,
/// matching the `ws` session's own default timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// One `(regex, method, handler-name)` entry of the `http_routes` table.
/// The handler itself is an external collaborator this crate does not
/// own; this struct only records enough to describe the route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRoute {
    pub pattern: String,
    pub method: String,
    pub handler_name: String,
}

/// Serializable half of the server wrapper's configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Root directory for static file serving (external collaborator).
    pub web_dir: Option<PathBuf>,
    /// Default filename when a request path ends with `/`.
    pub index_file: String,
    /// Idle seconds before a websocket session's heartbeat closes it.
    pub timeout_secs: u64,
    pub http_routes: Vec<HttpRoute>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            web_dir: None,
            index_file: "index.html".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            http_routes: Vec::new(),
        }
    }
}

impl ServerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Loads settings from a JSON config file, falling back to defaults
    /// for any field the file omits.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        let bytes = std::fs::read(path).map_err(crate::error::Error::Transport)?;
        serde_json::from_slice(&bytes).map_err(|e| crate::error::Error::Codec(e.to_string()))
    }
}

/// The non-serializable half: the per-session binary frame handler and
/// close hook a `websocket` server wrapper is constructed with. Kept
/// out of `ServerSettings` because closures cannot round-trip through
/// JSON, mirroring how `chronicle`'s queue configs stay plain data
/// while callbacks are passed to constructors separately.
#[cfg(feature = "ws")]
#[derive(Clone)]
pub struct WebsocketHandlers<S> {
    pub on_message: Arc<dyn Fn(Arc<crate::ws::WebsocketSession<S>>, Vec<u8>) + Send + Sync>,
    pub on_close: Arc<dyn Fn(u64) + Send + Sync>,
}

#[cfg(feature = "ws")]
impl<S> WebsocketHandlers<S> {
    pub fn new(
        on_message: impl Fn(Arc<crate::ws::WebsocketSession<S>>, Vec<u8>) + Send + Sync + 'static,
        on_close: impl Fn(u64) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_message: Arc::new(on_message),
            on_close: Arc::new(on_close),
        }
    }
}

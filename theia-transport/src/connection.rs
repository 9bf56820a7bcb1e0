//! Server-side view of one accepted connection.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Result, TransportError};

/// Something enqueued on a connection's outbound channel — either a data
/// frame or a close handshake. The per-connection writer task translates
/// this into the underlying transport's own frame types.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(Vec<u8>),
    Close { code: u16, reason: String },
}

type CloseObserver = Arc<dyn Fn(u16, String) + Send + Sync>;

/// A connection as seen by server-side action handlers: a handle capable of
/// sending frames and closing, plus the request path it was opened on and
/// the close-observers registered against it (§3 Connection).
#[derive(Clone)]
pub struct Connection {
    id: Uuid,
    path: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    close_observers: Arc<Mutex<Vec<CloseObserver>>>,
}

impl Connection {
    pub fn new(id: Uuid, path: String, outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id,
            path,
            outbound,
            close_observers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Enqueues `bytes` as a frame to be sent to the peer. Returns once the
    /// frame is queued, not once it reaches the wire (§4.7.2).
    pub fn send(&self, bytes: Vec<u8>) -> Result<()> {
        self.outbound
            .send(Outbound::Frame(bytes))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Sends a normal (code 1000) or custom close handshake and disables
    /// further sends on this handle's underlying channel.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> Result<()> {
        self.outbound
            .send(Outbound::Close {
                code,
                reason: reason.into(),
            })
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Registers a callback fired exactly once, with the close code and
    /// reason, when this connection is torn down (§4.7.1).
    pub fn register_close_observer(&self, observer: impl Fn(u16, String) + Send + Sync + 'static) {
        self.close_observers.lock().unwrap().push(Arc::new(observer));
    }

    pub(crate) fn fire_close_observers(&self, code: u16, reason: &str) {
        for observer in self.close_observers.lock().unwrap().iter() {
            observer(code, reason.to_string());
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

//! Accepts connections over WebSocket, dispatching each frame through a
//! per-path chain of registered [`Action`]s (§4.7.1).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::connection::{Connection, Outbound};
use crate::error::{Result, TransportError};

const STOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Error raised by an [`Action`] handler. Carries a client-facing message:
/// the server wraps it as `{"error": message}` and sends it back, aborting
/// the rest of that frame's action chain (§4.7.1).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// One link in a path's action chain. `call` receives the previous action's
/// response (`None` for the first action in the chain) and returns its own,
/// which becomes the next action's `prev_resp`.
#[async_trait]
pub trait Action: Send + Sync {
    async fn call(
        &self,
        path: &str,
        frame: &[u8],
        conn: &Connection,
        prev_resp: Option<Vec<u8>>,
    ) -> std::result::Result<Option<Vec<u8>>, HandlerError>;
}

struct Tracked {
    connection: Connection,
    cancel: tokio_util::sync::CancellationToken,
    done: oneshot::Receiver<()>,
}

/// A framed WebSocket server multiplexing endpoints by request path.
pub struct FramedServer {
    actions: DashMap<String, Vec<Arc<dyn Action>>>,
    connections: DashMap<Uuid, Tracked>,
    started: std::sync::atomic::AtomicBool,
}

impl FramedServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            actions: DashMap::new(),
            connections: DashMap::new(),
            started: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Registers `action` as the next link in `path`'s handler chain, in
    /// registration order.
    pub fn register(&self, path: impl Into<String>, action: impl Action + 'static) {
        self.actions
            .entry(path.into())
            .or_default()
            .push(Arc::new(action));
    }

    pub fn is_started(&self) -> bool {
        self.started.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Binds `addr`, flipping `started` to `true` once the listener is
    /// ready (§4.7.1), and returns the listener for [`Self::serve`] — split
    /// out from `start` so tests and callers that need the actual bound
    /// port (e.g. `addr`'s port `0`) can read it back before serving.
    pub async fn bind(self: &Arc<Self>, addr: SocketAddr) -> Result<TcpListener> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Bind(e.to_string()))?;
        self.started.store(true, std::sync::atomic::Ordering::SeqCst);
        tracing::info!(addr = %listener.local_addr().unwrap_or(addr), "transport server listening");
        Ok(listener)
    }

    /// Serves forever on `listener` (until the returned future is dropped
    /// or the process exits).
    pub async fn serve(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        let app = Router::new()
            .route("/{*path}", get(upgrade_handler))
            .with_state(self.clone());
        axum::serve(listener, app)
            .await
            .map_err(|e| TransportError::Bind(e.to_string()))
    }

    /// Binds `addr` and serves forever — convenience for callers that don't
    /// need the bound address ahead of time.
    pub async fn start(self: &Arc<Self>, addr: SocketAddr) -> Result<()> {
        let listener = self.bind(addr).await?;
        self.serve(listener).await
    }

    /// Sends a normal close (1000, "server stop") to every tracked
    /// connection and waits up to 10 s for their connection tasks to finish,
    /// per §4.7.1. Proceeds regardless once the timeout elapses.
    pub async fn stop(self: &Arc<Self>) {
        let ids: Vec<Uuid> = self.connections.iter().map(|e| *e.key()).collect();
        let mut receivers = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, tracked)) = self.connections.remove(&id) {
                let _ = tracked.connection.close(1000, "server stop");
                receivers.push(tracked.done);
            }
        }

        let drain = futures_util::future::join_all(receivers.into_iter().map(|rx| async move {
            let _ = rx.await;
        }));
        if tokio::time::timeout(STOP_DRAIN_TIMEOUT, drain).await.is_err() {
            tracing::warn!("server stop timed out waiting for connections to drain");
        }
        self.started.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    fn actions_for(&self, path: &str) -> Vec<Arc<dyn Action>> {
        self.actions
            .get(path)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    fn track(
        &self,
        conn: Connection,
        cancel: tokio_util::sync::CancellationToken,
        done: oneshot::Receiver<()>,
    ) {
        self.connections.insert(
            conn.id(),
            Tracked {
                connection: conn,
                cancel,
                done,
            },
        );
    }

    fn untrack(&self, id: Uuid) -> Option<Tracked> {
        self.connections.remove(&id).map(|(_, v)| v)
    }
}

async fn upgrade_handler(
    State(server): State<Arc<FramedServer>>,
    Path(path): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let path = format!("/{path}");
    ws.on_upgrade(move |socket| handle_socket(server, path, socket))
}

async fn handle_socket(server: Arc<FramedServer>, path: String, socket: WebSocket) {
    let id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
    let cancel = tokio_util::sync::CancellationToken::new();
    let (done_tx, done_rx) = oneshot::channel();

    let conn = Connection::new(id, path.clone(), outbound_tx);
    server.track(conn.clone(), cancel.clone(), done_rx);

    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                maybe = outbound_rx.recv() => {
                    match maybe {
                        Some(Outbound::Frame(bytes)) => {
                            if sink.send(Message::Binary(bytes.into())).await.is_err() {
                                break;
                            }
                        }
                        Some(Outbound::Close { code, reason }) => {
                            let _ = sink
                                .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                                    code,
                                    reason: reason.into(),
                                })))
                                .await;
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
    });

    let (close_code, close_reason) = loop {
        tokio::select! {
            _ = cancel.cancelled() => break (1000, "server stop".to_string()),
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Binary(bytes))) => {
                        dispatch(&server, &path, bytes.to_vec(), &conn).await;
                    }
                    Some(Ok(Message::Text(text))) => {
                        dispatch(&server, &path, text.as_bytes().to_vec(), &conn).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (f.code, f.reason.to_string()))
                            .unwrap_or((1000, String::new()));
                        break (code, reason);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        tracing::debug!(%err, "connection error, closing");
                        break (1006, err.to_string());
                    }
                    None => break (1006, "stream ended".to_string()),
                }
            }
        }
    };

    cancel.cancel();
    let _ = writer.await;
    if let Some(tracked) = server.untrack(id) {
        tracked.connection.fire_close_observers(close_code, &close_reason);
    }
    let _ = done_tx.send(());
}

async fn dispatch(server: &Arc<FramedServer>, path: &str, frame: Vec<u8>, conn: &Connection) {
    let chain = server.actions_for(path);
    let mut resp: Option<Vec<u8>> = None;
    for action in chain {
        match action.call(path, &frame, conn, resp.take()).await {
            Ok(next) => resp = next,
            Err(HandlerError(message)) => {
                let payload = serde_json::json!({ "error": message });
                let _ = conn.send(serde_json::to_vec(&payload).unwrap_or_default());
                return;
            }
        }
    }
    if let Some(bytes) = resp {
        if !bytes.is_empty() {
            let _ = conn.send(bytes);
        }
    }
}

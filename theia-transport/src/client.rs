//! Client side of the framed transport: connects, sends frames, and
//! delivers received frames to a caller-supplied handler (§4.7.2).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use theia_model::Event;

use crate::connection::Outbound;
use crate::error::{Result, TransportError};

type CloseObserver = Arc<dyn Fn(u16, String) + Send + Sync>;

/// A connected client: `send`/`close` enqueue work on the connection's
/// writer task and return immediately, before the bytes necessarily reach
/// the wire (§4.7.2).
#[derive(Clone)]
pub struct FramedClient {
    outbound: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
    close_observers: Arc<Mutex<Vec<CloseObserver>>>,
}

impl FramedClient {
    /// Opens the connection to `url` (blocks until open), then launches a
    /// background receive loop delivering each incoming frame to
    /// `on_frame`. Returns once the handshake completes.
    pub async fn connect<F>(url: &str, on_frame: F) -> Result<Self>
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (mut sink, mut source) = stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let open = Arc::new(AtomicBool::new(true));
        let close_observers: Arc<Mutex<Vec<CloseObserver>>> = Arc::new(Mutex::new(Vec::new()));

        tokio::spawn(async move {
            while let Some(item) = outbound_rx.recv().await {
                let sent = match item {
                    Outbound::Frame(bytes) => sink.send(Message::Binary(bytes.into())).await,
                    Outbound::Close { code, reason } => {
                        let frame = sink
                            .send(Message::Close(Some(CloseFrame {
                                code: code.into(),
                                reason: reason.into(),
                            })))
                            .await;
                        let _ = sink.close().await;
                        frame
                    }
                };
                if sent.is_err() {
                    break;
                }
            }
        });

        let reader_open = open.clone();
        let reader_observers = close_observers.clone();
        tokio::spawn(async move {
            loop {
                match source.next().await {
                    Some(Ok(Message::Binary(bytes))) => on_frame(bytes.to_vec()),
                    Some(Ok(Message::Text(text))) => on_frame(text.as_bytes().to_vec()),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (f.code.into(), f.reason.to_string()))
                            .unwrap_or((1000u16, String::new()));
                        notify_closed(&reader_open, &reader_observers, code, reason);
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        notify_closed(&reader_open, &reader_observers, 1006, err.to_string());
                        break;
                    }
                    None => {
                        notify_closed(&reader_open, &reader_observers, 1006, "stream ended".into());
                        break;
                    }
                }
            }
        });

        Ok(Self {
            outbound: outbound_tx,
            open,
            close_observers,
        })
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Enqueues `frame` for sending. Fails with [`TransportError::ConnectionClosed`]
    /// once the writer task has exited.
    pub fn send(&self, frame: Vec<u8>) -> Result<()> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// `send(serialize(event))` (§4.7.2).
    pub fn send_event(&self, event: &Event) -> Result<()> {
        self.send(theia_model::EventSerializer::new().serialize(event))
    }

    /// Sends a normal close handshake and marks the client closed, so
    /// further `send`s fail fast.
    pub fn close(&self, reason: impl Into<String>) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        self.outbound
            .send(Outbound::Close {
                code: 1000,
                reason: reason.into(),
            })
            .map_err(|_| TransportError::ConnectionClosed)
    }

    pub fn register_close_observer(&self, observer: impl Fn(u16, String) + Send + Sync + 'static) {
        self.close_observers.lock().unwrap().push(Arc::new(observer));
    }
}

fn notify_closed(open: &AtomicBool, observers: &Mutex<Vec<CloseObserver>>, code: u16, reason: String) {
    open.store(false, Ordering::SeqCst);
    for observer in observers.lock().unwrap().iter() {
        observer(code, reason.clone());
    }
}

use thiserror::Error;

/// Errors produced by the framed transport (both server and client sides).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Not a real error: the peer closed (or dropped) the connection. A
    /// control-flow signal per §7 — callers match on it to drive removal
    /// from registries rather than logging it as a failure.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("invalid criteria: {0}")]
    InvalidCriteria(String),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("bind error: {0}")]
    Bind(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

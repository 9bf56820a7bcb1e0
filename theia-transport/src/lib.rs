//! Framed, path-multiplexed duplex transport shared by every Theia
//! participant.
//!
//! The wire format is opaque byte frames over WebSocket: [`server`] accepts
//! connections and dispatches frames through per-path [`server::Action`]
//! chains (axum's `ws` extractor); [`client`] connects outward and delivers
//! frames to a caller-supplied handler (`tokio-tungstenite`). Neither side
//! knows anything about events, criteria, or storage — that's
//! `theia-collector`'s job.

pub mod client;
pub mod connection;
pub mod error;
pub mod server;

pub use client::FramedClient;
pub use connection::{Connection, Outbound};
pub use error::{Result, TransportError};
pub use server::{Action, FramedServer, HandlerError};

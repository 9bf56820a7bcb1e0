//! The collector service: wires `theia-store` and `theia-transport`
//! together behind the `/event`, `/live`, `/find` endpoints, and exposes
//! the CLI configuration for the `theia-collector` binary.

pub mod collector;
pub mod config;
pub mod error;
pub mod live_matcher;

pub use collector::Collector;
pub use config::Args;
pub use error::{CollectorError, Result};
pub use live_matcher::{Filter, LiveMatcher};

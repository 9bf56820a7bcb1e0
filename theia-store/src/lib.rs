//! Durable event storage for Theia.
//!
//! Two backends implement the same [`EventStore`] trait: [`naive`], a
//! dependency-free time-partitioned file store, and [`relational`] (behind
//! the `postgres` feature), a Postgres-backed alternative for deployments
//! that already run a database.

pub mod error;
pub mod file_index;
pub mod flusher;
pub mod memory_file;
pub mod naive;
#[cfg(feature = "postgres")]
pub mod relational;
pub mod store;

pub use error::{Result, StoreError};
pub use file_index::{DataFile, FileIndex};
pub use flusher::PeriodicFlusher;
pub use memory_file::MemoryFile;
pub use naive::NaiveEventStore;
#[cfg(feature = "postgres")]
pub use relational::RelationalEventStore;
pub use store::{EventStore, SearchOrder, SearchRequest};

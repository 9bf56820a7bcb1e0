//! The storage-backend seam every Theia event store implements.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use theia_model::{Criteria, Event};

use crate::error::Result;

/// Ordering for a historical search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchOrder {
    #[default]
    Asc,
    Desc,
}

/// A bounded, criteria-filtered historical search request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub criteria: Criteria,
    pub order: SearchOrder,
}

impl SearchRequest {
    pub fn new(criteria: Criteria) -> Self {
        Self {
            criteria,
            order: SearchOrder::default(),
        }
    }

    pub fn with_order(mut self, order: SearchOrder) -> Self {
        self.order = order;
        self
    }
}

/// Durable storage for [`Event`]s, searchable by [`Criteria`].
///
/// Implementations decide their own persistence and indexing strategy; all
/// that's guaranteed is that an event accepted by `save` is later visible to
/// `get`/`search`/`delete` by its id.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn save(&self, event: Event) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Event>>;

    async fn delete(&self, id: &str) -> Result<bool>;

    /// Streams every stored event matching `request.criteria`, in
    /// `request.order`. The stream is lazy: implementations should not
    /// materialize the whole result set up front.
    fn search(&self, request: SearchRequest) -> BoxStream<'static, Result<Event>>;

    /// Flushes all open buffers, stops any background flusher owned by this
    /// store, and releases its resources. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

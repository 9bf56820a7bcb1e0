//! Live subscription matching: fans a saved event out to every `/live`
//! connection whose criteria it satisfies (§4.8).

use dashmap::DashMap;
use theia_model::{Criteria, Event, EventSerializer};
use theia_transport::{Connection, TransportError};
use uuid::Uuid;

/// A live subscription: the connection to push matches to, and the
/// criteria an event must satisfy to be sent.
#[derive(Clone)]
pub struct Filter {
    pub connection: Connection,
    pub criteria: Criteria,
}

/// Registry of active live subscriptions, keyed by connection id.
///
/// `pipe` clones the current set of filters out from under the lock before
/// evaluating them, so a filter's error handler (run while iterating) can
/// safely remove entries from the same map (§5).
#[derive(Default)]
pub struct LiveMatcher {
    filters: DashMap<Uuid, Filter>,
}

impl LiveMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `filter`, replacing any prior filter for the same
    /// connection.
    pub fn add_filter(&self, filter: Filter) {
        self.filters.insert(filter.connection.id(), filter);
    }

    pub fn remove_filter(&self, id: Uuid) {
        self.filters.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Sends `event` to every filter whose criteria it matches. Send
    /// failures remove the filter when they indicate the connection has
    /// closed; any other failure is logged and the filter is left in place.
    pub fn pipe(&self, event: &Event) {
        let snapshot: Vec<Filter> = self.filters.iter().map(|e| e.value().clone()).collect();
        let bytes = EventSerializer::new().serialize(event);

        for filter in snapshot {
            if !filter.criteria.matches(event) {
                continue;
            }
            match filter.connection.send(bytes.clone()) {
                Ok(()) => {}
                Err(TransportError::ConnectionClosed) => {
                    self.remove_filter(filter.connection.id());
                }
                Err(err) => {
                    tracing::warn!(conn = %filter.connection.id(), %err, "failed to push live event");
                }
            }
        }
    }
}

//! Wires the event store, the framed transport server, and the live
//! matcher into the `/event`, `/live`, `/find` endpoints (§4.7.3, §4.9).

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use theia_model::{Criteria, Event, EventParser, EventSerializer};
use theia_store::{EventStore, SearchOrder, SearchRequest};
use theia_transport::{Action, Connection, FramedServer, HandlerError, Result as TransportResult};

use crate::live_matcher::{Filter, LiveMatcher};

const CHANNEL_CAPACITY: usize = 1024;

/// Ties a [`FramedServer`] to a store task and a live-matcher feed task,
/// connected by bounded channels, per §4.9's two cooperative task groups.
pub struct Collector {
    server: Arc<FramedServer>,
    matcher: Arc<LiveMatcher>,
    store: Option<Arc<dyn EventStore>>,
    event_tx: mpsc::Sender<Vec<u8>>,
    store_task: JoinHandle<()>,
    feed_task: JoinHandle<()>,
}

impl Collector {
    /// Builds a collector. `store` is `None` for a non-persistent
    /// deployment: `/event` still feeds live subscribers, but `/find`
    /// answers with an error (§4.7.3).
    pub fn new(store: Option<Arc<dyn EventStore>>) -> Self {
        let server = FramedServer::new();
        let matcher = Arc::new(LiveMatcher::new());

        let (event_tx, event_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);
        let (live_tx, live_rx) = mpsc::channel::<Event>(CHANNEL_CAPACITY);

        let store_task = tokio::spawn(run_store_task(store.clone(), event_rx, live_tx));
        let feed_task = tokio::spawn(run_feed_task(matcher.clone(), live_rx));

        server.register(
            "/event",
            EventIngestAction {
                event_tx: event_tx.clone(),
            },
        );
        server.register("/live", LiveSubscribeAction::new(matcher.clone()));
        server.register(
            "/find",
            FindAction {
                store: store.clone(),
            },
        );

        Self {
            server,
            matcher,
            store,
            event_tx,
            store_task,
            feed_task,
        }
    }

    /// Binds `addr` and serves forever. Convenience combining
    /// [`FramedServer::bind`] and [`FramedServer::serve`].
    pub async fn start(&self, addr: SocketAddr) -> TransportResult<()> {
        self.server.start(addr).await
    }

    pub async fn bind(&self, addr: SocketAddr) -> TransportResult<TcpListener> {
        self.server.bind(addr).await
    }

    pub async fn serve(&self, listener: TcpListener) -> TransportResult<()> {
        self.server.serve(listener).await
    }

    pub fn live_filter_count(&self) -> usize {
        self.matcher.len()
    }

    /// Shuts the server down (draining connections up to its own timeout),
    /// stops the store task, then closes the store (§4.9).
    pub async fn stop(self) {
        self.server.stop().await;
        drop(self.event_tx);
        let _ = self.store_task.await;
        let _ = self.feed_task.await;
        if let Some(store) = self.store {
            if let Err(err) = store.close().await {
                tracing::warn!(%err, "failed to close store cleanly");
            }
        }
    }
}

/// Parses each raw ingest frame, persists it (when a store is configured),
/// and forwards the parsed event to the live-matcher feed task.
async fn run_store_task(
    store: Option<Arc<dyn EventStore>>,
    mut event_rx: mpsc::Receiver<Vec<u8>>,
    live_tx: mpsc::Sender<Event>,
) {
    let parser = EventParser::new();
    while let Some(bytes) = event_rx.recv().await {
        let mut cursor = std::io::Cursor::new(bytes);
        let event = match parser.parse(&mut cursor) {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::warn!("ingest frame decoded to no event, dropping");
                continue;
            }
            Err(err) => {
                tracing::warn!(%err, "malformed ingest frame, dropping");
                continue;
            }
        };

        if let Some(store) = &store {
            if let Err(err) = store.save(event.clone()).await {
                tracing::warn!(%err, id = event.id(), "failed to persist event");
                continue;
            }
        }

        if live_tx.send(event).await.is_err() {
            break;
        }
    }
}

async fn run_feed_task(matcher: Arc<LiveMatcher>, mut live_rx: mpsc::Receiver<Event>) {
    while let Some(event) = live_rx.recv().await {
        matcher.pipe(&event);
    }
}

/// `/event`: hands the raw frame to the store task and replies with
/// nothing.
struct EventIngestAction {
    event_tx: mpsc::Sender<Vec<u8>>,
}

#[async_trait]
impl Action for EventIngestAction {
    async fn call(
        &self,
        _path: &str,
        frame: &[u8],
        _conn: &Connection,
        _prev_resp: Option<Vec<u8>>,
    ) -> std::result::Result<Option<Vec<u8>>, HandlerError> {
        if self.event_tx.send(frame.to_vec()).await.is_err() {
            return Err(HandlerError::new("store task unavailable"));
        }
        Ok(None)
    }
}

/// `/live`: first frame is a criteria JSON object registering a [`Filter`];
/// every later frame on the same connection is ignored.
struct LiveSubscribeAction {
    matcher: Arc<LiveMatcher>,
    subscribed: Arc<DashMap<Uuid, ()>>,
}

impl LiveSubscribeAction {
    fn new(matcher: Arc<LiveMatcher>) -> Self {
        Self {
            matcher,
            subscribed: Arc::new(DashMap::new()),
        }
    }
}

#[async_trait]
impl Action for LiveSubscribeAction {
    async fn call(
        &self,
        _path: &str,
        frame: &[u8],
        conn: &Connection,
        _prev_resp: Option<Vec<u8>>,
    ) -> std::result::Result<Option<Vec<u8>>, HandlerError> {
        if self.subscribed.contains_key(&conn.id()) {
            return Ok(None);
        }

        let value: serde_json::Value = serde_json::from_slice(frame)
            .map_err(|e| HandlerError::new(format!("invalid JSON: {e}")))?;
        let criteria = Criteria::from_json(&value).map_err(|e| HandlerError::new(e.to_string()))?;

        self.matcher.add_filter(Filter {
            connection: conn.clone(),
            criteria,
        });
        self.subscribed.insert(conn.id(), ());

        let matcher = self.matcher.clone();
        let subscribed = self.subscribed.clone();
        let id = conn.id();
        conn.register_close_observer(move |_code, _reason| {
            matcher.remove_filter(id);
            subscribed.remove(&id);
        });

        Ok(Some(b"ok".to_vec()))
    }
}

/// `/find`: replies `"ok"` then streams matching historical events as
/// separate frames on the same connection, yielding cooperatively between
/// them.
struct FindAction {
    store: Option<Arc<dyn EventStore>>,
}

#[async_trait]
impl Action for FindAction {
    async fn call(
        &self,
        _path: &str,
        frame: &[u8],
        conn: &Connection,
        _prev_resp: Option<Vec<u8>>,
    ) -> std::result::Result<Option<Vec<u8>>, HandlerError> {
        let Some(store) = &self.store else {
            return Err(HandlerError::new(
                "Action not available in non-persistent mode.",
            ));
        };

        let value: serde_json::Value = serde_json::from_slice(frame)
            .map_err(|e| HandlerError::new(format!("invalid JSON: {e}")))?;
        let criteria = Criteria::from_json(&value).map_err(|e| HandlerError::new(e.to_string()))?;
        if criteria.start().is_none() {
            return Err(HandlerError::new("missing required field: start"));
        }
        let order = match value.get("order").and_then(|v| v.as_str()) {
            None | Some("asc") => SearchOrder::Asc,
            Some("desc") => SearchOrder::Desc,
            Some(other) => return Err(HandlerError::new(format!("invalid order: {other}"))),
        };

        let request = SearchRequest::new(criteria).with_order(order);
        let store = store.clone();
        let conn = conn.clone();
        tokio::spawn(async move {
            let mut stream = store.search(request);
            while let Some(item) = stream.next().await {
                let event = match item {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(%err, "search failed mid-stream");
                        break;
                    }
                };
                let bytes = EventSerializer::new().serialize(&event);
                if conn.send(bytes).is_err() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        });

        Ok(Some(b"ok".to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use theia_store::NaiveEventStore;

    #[tokio::test]
    async fn non_persistent_find_replies_with_error() {
        let collector = Collector::new(None);
        let action = FindAction { store: None };
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Connection::new(Uuid::new_v4(), "/find".to_string(), tx);
        let err = action
            .call("/find", b"{}", &conn, None)
            .await
            .unwrap_err();
        assert!(err.0.contains("non-persistent"));
        collector.stop().await;
    }

    #[tokio::test]
    async fn find_requires_start() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn EventStore> =
            Arc::new(NaiveEventStore::new(dir.path(), Duration::ZERO).unwrap());
        let action = FindAction {
            store: Some(store.clone()),
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Connection::new(Uuid::new_v4(), "/find".to_string(), tx);
        let err = action
            .call("/find", b"{}", &conn, None)
            .await
            .unwrap_err();
        assert!(err.0.contains("start"));
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn event_then_live_round_trips_through_the_task_groups() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn EventStore> =
            Arc::new(NaiveEventStore::new(dir.path(), Duration::ZERO).unwrap());
        let collector = Collector::new(Some(store));

        let (live_outbound_tx, mut live_outbound_rx) = mpsc::unbounded_channel();
        let live_conn = Connection::new(Uuid::new_v4(), "/live".to_string(), live_outbound_tx);
        let live_action = LiveSubscribeAction::new(collector.matcher.clone());
        let reply = live_action
            .call("/live", b"{}", &live_conn, None)
            .await
            .unwrap();
        assert_eq!(reply, Some(b"ok".to_vec()));

        let event = theia_model::Event::new("id1", "env1", 10.0, vec![], "hi").unwrap();
        let bytes = EventSerializer::new().serialize(&event);
        let ingest = EventIngestAction {
            event_tx: collector.event_tx.clone(),
        };
        let (ingest_tx, _ingest_rx) = mpsc::unbounded_channel();
        let ingest_conn = Connection::new(Uuid::new_v4(), "/event".to_string(), ingest_tx);
        ingest
            .call("/event", &bytes, &ingest_conn, None)
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), live_outbound_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match received {
            theia_transport::Outbound::Frame(frame) => {
                let parsed = EventParser::new()
                    .parse(&mut std::io::Cursor::new(frame))
                    .unwrap()
                    .unwrap();
                assert_eq!(parsed, event);
            }
            other => panic!("expected a frame, got {other:?}"),
        }

        collector.stop().await;
    }
}

//! End-to-end coverage of the collector: a real client ingests an event,
//! a live subscriber receives it, and a historical `/find` turns it up
//! again once it has been flushed to disk.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use theia_collector::Collector;
use theia_model::{Event, EventParser, EventSerializer};
use theia_store::{EventStore, NaiveEventStore};
use theia_transport::FramedClient;
use tokio::sync::mpsc;

async fn spawn_collector() -> (Arc<Collector>, TempDir, std::net::SocketAddr) {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn EventStore> =
        Arc::new(NaiveEventStore::new(dir.path(), Duration::ZERO).unwrap());
    let collector = Arc::new(Collector::new(Some(store)));
    let listener = collector
        .bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let serve_collector = collector.clone();
    tokio::spawn(async move { serve_collector.serve(listener).await });
    (collector, dir, addr)
}

#[tokio::test]
async fn event_ingested_is_delivered_to_a_live_subscriber() {
    let (_collector, _dir, addr) = spawn_collector().await;

    let (live_tx, mut live_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let live_client = FramedClient::connect(&format!("ws://{addr}/live"), move |frame| {
        let _ = live_tx.send(frame);
    })
    .await
    .unwrap();
    live_client.send(b"{}".to_vec()).unwrap();
    let ack = tokio::time::timeout(Duration::from_secs(2), live_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ack, b"ok");

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let event_client = FramedClient::connect(&format!("ws://{addr}/event"), move |frame| {
        let _ = event_tx.send(frame);
    })
    .await
    .unwrap();
    let event = Event::new("id1", "agent1", 42.0, vec!["tag1".into()], "hello world").unwrap();
    event_client.send_event(&event).unwrap();

    let pushed = tokio::time::timeout(Duration::from_secs(2), live_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let parsed = EventParser::new()
        .parse(&mut std::io::Cursor::new(pushed))
        .unwrap()
        .unwrap();
    assert_eq!(parsed, event);
    assert!(event_rx.try_recv().is_err(), "/event sends no reply");
}

#[tokio::test]
async fn find_streams_events_saved_before_the_flush() {
    let (_collector, _dir, addr) = spawn_collector().await;

    let (event_tx, _event_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let event_client = FramedClient::connect(&format!("ws://{addr}/event"), move |frame| {
        let _ = event_tx.send(frame);
    })
    .await
    .unwrap();
    let event = Event::new("id1", "agent1", 100.0, vec![], "persisted").unwrap();
    event_client.send_event(&event).unwrap();

    // the store task flushes synchronously (Duration::ZERO); give the
    // channel hop a moment to land before searching.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (find_tx, mut find_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let find_client = FramedClient::connect(&format!("ws://{addr}/find"), move |frame| {
        let _ = find_tx.send(frame);
    })
    .await
    .unwrap();
    find_client
        .send(serde_json::to_vec(&json!({"start": 0})).unwrap())
        .unwrap();

    let ack = tokio::time::timeout(Duration::from_secs(2), find_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ack, b"ok");

    let frame = tokio::time::timeout(Duration::from_secs(2), find_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let found = EventParser::new()
        .parse(&mut std::io::Cursor::new(frame))
        .unwrap()
        .unwrap();
    assert_eq!(found, event);
}

#[tokio::test]
async fn find_without_start_is_rejected() {
    let (_collector, _dir, addr) = spawn_collector().await;

    let (find_tx, mut find_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let find_client = FramedClient::connect(&format!("ws://{addr}/find"), move |frame| {
        let _ = find_tx.send(frame);
    })
    .await
    .unwrap();
    find_client
        .send(serde_json::to_vec(&json!({})).unwrap())
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(2), find_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&reply).unwrap();
    assert!(value["error"].as_str().unwrap().contains("start"));
}

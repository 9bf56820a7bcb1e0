//! End-to-end check that a real client can open a connection, send a
//! frame, and receive the action chain's reply over a real socket.

use std::time::Duration;

use async_trait::async_trait;
use theia_transport::{Action, Connection, FramedClient, FramedServer, HandlerError};
use tokio::sync::mpsc;

struct Echo;

#[async_trait]
impl Action for Echo {
    async fn call(
        &self,
        _path: &str,
        frame: &[u8],
        _conn: &Connection,
        _prev_resp: Option<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>, HandlerError> {
        if frame == b"boom" {
            return Err(HandlerError::new("refusing to echo boom"));
        }
        Ok(Some(frame.to_vec()))
    }
}

#[tokio::test]
async fn client_roundtrips_a_frame_through_the_echo_action() {
    let server = FramedServer::new();
    server.register("/echo", Echo);

    let listener = server.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_for_serve = server.clone();
    tokio::spawn(async move { server_for_serve.serve(listener).await });

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let client = FramedClient::connect(&format!("ws://{addr}/echo"), move |frame| {
        let _ = tx.send(frame);
    })
    .await
    .unwrap();

    client.send(b"hello".to_vec()).unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, b"hello");
}

#[tokio::test]
async fn handler_error_is_surfaced_as_json() {
    let server = FramedServer::new();
    server.register("/echo", Echo);

    let listener = server.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_for_serve = server.clone();
    tokio::spawn(async move { server_for_serve.serve(listener).await });

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let client = FramedClient::connect(&format!("ws://{addr}/echo"), move |frame| {
        let _ = tx.send(frame);
    })
    .await
    .unwrap();

    client.send(b"boom".to_vec()).unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&reply).unwrap();
    assert_eq!(value["error"], "refusing to echo boom");
}

#[tokio::test]
async fn stop_drains_connections_well_before_the_timeout() {
    let server = FramedServer::new();
    server.register("/echo", Echo);

    let listener = server.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_for_serve = server.clone();
    tokio::spawn(async move { server_for_serve.serve(listener).await });

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let client = FramedClient::connect(&format!("ws://{addr}/echo"), move |frame| {
        let _ = tx.send(frame);
    })
    .await
    .unwrap();
    client.send(b"hello".to_vec()).unwrap();
    rx.recv().await.unwrap();

    let stopped = tokio::time::timeout(Duration::from_secs(2), server.stop()).await;
    assert!(
        stopped.is_ok(),
        "stop() should drain the single connection well inside its 10s budget"
    );
    assert!(!server.is_started());
}

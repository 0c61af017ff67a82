//! Channel integration tests
//!
//! Runs the WebSocket transport against an in-process tokio-tungstenite
//! server bound to an ephemeral port.

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_test::assert_ok;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use livecoach_core::{
    ChannelConfig, ChannelEvent, ChannelManager, ChannelState, DetectionMode, Exercise,
    LiveCoachError, SendOutcome,
};

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("ws://{}/ws/live", addr))
}

async fn accept(listener: &TcpListener) -> (WebSocketStream<TcpStream>, String) {
    let (stream, _) = listener.accept().await.unwrap();
    let (uri_tx, uri_rx) = std::sync::mpsc::channel();
    let ws = accept_hdr_async(
        stream,
        move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let _ = uri_tx.send(request.uri().to_string());
            Ok(response)
        },
    )
    .await
    .unwrap();
    (ws, uri_rx.recv().unwrap())
}

fn manager_for(endpoint: &str) -> ChannelManager {
    ChannelManager::new(ChannelConfig {
        endpoint: endpoint.to_string(),
        connect_timeout: Duration::from_secs(2),
        close_timeout: Duration::from_millis(500),
    })
}

#[tokio::test]
async fn test_open_and_send_frame() {
    let (listener, endpoint) = bind().await;
    let manager = manager_for(&endpoint);
    let mode = DetectionMode::manual(Exercise::Squat);

    let (opened, (mut server, uri)) = tokio::join!(manager.open(&mode), accept(&listener));
    let (handle, _events) = opened.unwrap();

    assert_eq!(uri, "/ws/live?exercise=squat");
    assert_eq!(handle.state(), ChannelState::Open);
    assert_eq!(manager.open_channels(), 1);

    let outcome = assert_ok!(handle.send(&[0xFF, 0xD8, 0x01]).await);
    assert_eq!(outcome, SendOutcome::Sent);

    let received = timeout(Duration::from_secs(2), server.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(received, Message::Text(r#"{"frame":[255,216,1]}"#.to_string()));

    let stats = handle.stats();
    assert_eq!(stats.frames_sent, 1);
    assert_eq!(stats.bytes_sent, 3);

    handle.close().await;
    assert_eq!(manager.open_channels(), 0);
}

#[tokio::test]
async fn test_inbound_messages_arrive_in_order_then_close() {
    let (listener, endpoint) = bind().await;
    let manager = manager_for(&endpoint);

    let (opened, (mut server, uri)) =
        tokio::join!(manager.open(&DetectionMode::Auto), accept(&listener));
    let (handle, mut events) = opened.unwrap();
    assert_eq!(uri, "/ws/live?exercise=auto");

    server
        .send(Message::Text(r#"{"reps":1}"#.to_string()))
        .await
        .unwrap();
    server
        .send(Message::Text(r#"{"reps":2}"#.to_string()))
        .await
        .unwrap();
    server.close(None).await.unwrap();

    let mut payloads = Vec::new();
    let terminal = loop {
        let event = timeout(Duration::from_secs(2), events.next())
            .await
            .unwrap()
            .unwrap();
        match event {
            ChannelEvent::Message(bytes) => payloads.push(bytes),
            other => break other,
        }
    };

    assert_eq!(payloads.len(), 2);
    assert_eq!(&payloads[0][..], br#"{"reps":1}"#);
    assert_eq!(&payloads[1][..], br#"{"reps":2}"#);
    assert!(matches!(terminal, ChannelEvent::Closed { .. }));
    assert_eq!(handle.state(), ChannelState::Closed);
    assert_eq!(handle.stats().messages_received, 2);

    // Peer already closed; sends are dropped, not errors
    assert_eq!(handle.send(&[1]).await.unwrap(), SendOutcome::Dropped);

    handle.close().await;
    assert_eq!(manager.open_channels(), 0);
}

#[tokio::test]
async fn test_close_is_idempotent_and_drops_later_sends() {
    let (listener, endpoint) = bind().await;
    let manager = manager_for(&endpoint);

    let (opened, (_server, _)) =
        tokio::join!(manager.open(&DetectionMode::Auto), accept(&listener));
    let (handle, _events) = opened.unwrap();

    handle.close().await;
    handle.close().await;
    manager.close(&handle).await;

    assert_eq!(handle.state(), ChannelState::Closed);
    assert_eq!(manager.open_channels(), 0);
    assert_eq!(handle.send(&[1, 2]).await.unwrap(), SendOutcome::Dropped);
    assert_eq!(handle.stats().frames_dropped, 1);
}

#[tokio::test]
async fn test_single_open_channel() {
    let (listener, endpoint) = bind().await;
    let manager = manager_for(&endpoint);

    let (opened, (_server, _)) =
        tokio::join!(manager.open(&DetectionMode::Auto), accept(&listener));
    let (handle, _events) = opened.unwrap();

    let second = manager.open(&DetectionMode::Auto).await;
    assert!(matches!(second, Err(LiveCoachError::InvalidState { .. })));
    assert_eq!(manager.open_channels(), 1);

    drop(handle);
    assert_eq!(manager.open_channels(), 0);
}

#[tokio::test]
async fn test_unreachable_endpoint_fails() {
    let (listener, endpoint) = bind().await;
    drop(listener);

    let manager = manager_for(&endpoint);
    let result = manager.open(&DetectionMode::Auto).await;

    let error = result.unwrap_err();
    assert!(matches!(error, LiveCoachError::Channel { .. }));
    assert!(error.is_fatal());
    assert_eq!(manager.open_channels(), 0);
}

#[tokio::test]
async fn test_connect_timeout() {
    // Accepts TCP but never answers the handshake
    let (listener, endpoint) = bind().await;
    let silent = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let manager = ChannelManager::new(ChannelConfig {
        endpoint,
        connect_timeout: Duration::from_millis(200),
        close_timeout: Duration::from_millis(200),
    });

    let error = manager.open(&DetectionMode::Auto).await.unwrap_err();
    assert!(error.to_string().contains("timed out"));
    assert_eq!(manager.open_channels(), 0);

    silent.abort();
}

#[tokio::test]
async fn test_secure_endpoint_attempts_tls_handshake() {
    // Plain TCP peer that hangs up before any TLS record is exchanged
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("wss://{}/ws/live", listener.local_addr().unwrap());
    let peer = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let manager = manager_for(&endpoint);
    assert!(manager.config().validate().is_ok());

    let error = manager.open(&DetectionMode::Auto).await.unwrap_err();
    assert!(matches!(error, LiveCoachError::Channel { .. }));
    assert!(
        !error.to_string().contains("TLS support not compiled"),
        "wss:// rejected before the handshake: {}",
        error
    );
    assert_eq!(manager.open_channels(), 0);

    let _ = peer.await;
}

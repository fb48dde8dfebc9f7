//! Realtime subscription against a local Phoenix-style websocket server.

use futures::{SinkExt, StreamExt};
use lecturehub::realtime::{ChangeKind, LectureChange, RealtimeSubscription};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const TOPIC: &str = "realtime:lectures:course_id=eq.c-1";

type ServerSocket = WebSocketStream<TcpStream>;

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/realtime/v1/websocket", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

/// Connects a subscription for course `c-1` and returns it with the server side.
async fn subscribe(
    capacity: usize,
) -> (RealtimeSubscription, mpsc::Receiver<LectureChange>, ServerSocket) {
    let (listener, url) = listen().await;
    let (tx, rx) = mpsc::channel(capacity);
    let (subscription, server) = tokio::join!(
        RealtimeSubscription::connect(&url, Some("anon-key"), "c-1", tx),
        accept(&listener)
    );
    (subscription.unwrap(), rx, server)
}

/// Next JSON frame from the client, or `None` once it closes.
async fn next_frame(server: &mut ServerSocket) -> Option<Value> {
    let read = async {
        while let Some(message) = server.next().await {
            match message.ok()? {
                Message::Text(text) => return serde_json::from_str(&text).ok(),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
        None
    };
    tokio::time::timeout(Duration::from_secs(300), read)
        .await
        .ok()
        .flatten()
}

async fn push(server: &mut ServerSocket, frame: Value) {
    server.send(Message::text(frame.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_join_then_forward_changes() {
    let (subscription, mut changes, mut server) = subscribe(8).await;
    assert_eq!(subscription.course_id(), "c-1");

    let join = next_frame(&mut server).await.unwrap();
    assert_eq!(join["event"], "phx_join");
    assert_eq!(join["topic"], TOPIC);
    assert_eq!(
        join["payload"]["config"]["postgres_changes"][0]["filter"],
        "course_id=eq.c-1"
    );
    let join_ref = join["ref"].clone();

    push(
        &mut server,
        json!({
            "topic": TOPIC,
            "event": "phx_reply",
            "payload": {"status": "ok"},
            "ref": join_ref
        }),
    )
    .await;
    push(
        &mut server,
        json!({
            "topic": "realtime:lectures:course_id=eq.c-9",
            "event": "postgres_changes",
            "payload": {"data": {"type": "INSERT"}},
            "ref": null
        }),
    )
    .await;
    push(
        &mut server,
        json!({
            "topic": TOPIC,
            "event": "postgres_changes",
            "payload": {"data": {"type": "DELETE", "old_record": {"id": 3}}},
            "ref": null
        }),
    )
    .await;

    let change = tokio::time::timeout(Duration::from_secs(5), changes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        change,
        LectureChange {
            course_id: "c-1".to_string(),
            kind: ChangeKind::Delete,
        }
    );

    subscription.unsubscribe().await;
    let leave = next_frame(&mut server).await.unwrap();
    assert_eq!(leave["event"], "phx_leave");
    assert_eq!(leave["topic"], TOPIC);
    assert!(next_frame(&mut server).await.is_none());
}

#[tokio::test]
async fn test_drop_leaves_the_channel() {
    let (subscription, _changes, mut server) = subscribe(8).await;
    assert_eq!(next_frame(&mut server).await.unwrap()["event"], "phx_join");

    drop(subscription);

    let leave = next_frame(&mut server).await.unwrap();
    assert_eq!(leave["event"], "phx_leave");
    assert!(next_frame(&mut server).await.is_none());
}

#[tokio::test]
async fn test_rejected_join_ends_the_feed() {
    let (_subscription, mut changes, mut server) = subscribe(8).await;
    let join = next_frame(&mut server).await.unwrap();

    push(
        &mut server,
        json!({
            "topic": TOPIC,
            "event": "phx_reply",
            "payload": {"status": "error", "response": {"reason": "unauthorized"}},
            "ref": join["ref"]
        }),
    )
    .await;

    let closed = tokio::time::timeout(Duration::from_secs(5), changes.recv()).await;
    assert!(matches!(closed, Ok(None)));
}

#[tokio::test]
async fn test_heartbeat_every_thirty_seconds() {
    let (subscription, _changes, mut server) = subscribe(8).await;
    assert_eq!(next_frame(&mut server).await.unwrap()["event"], "phx_join");

    let started = tokio::time::Instant::now();
    let first = next_frame(&mut server).await.unwrap();
    assert_eq!(first["topic"], "phoenix");
    assert_eq!(first["event"], "heartbeat");
    let second = next_frame(&mut server).await.unwrap();
    assert_eq!(second["event"], "heartbeat");
    assert_ne!(first["ref"], second["ref"]);
    assert!(started.elapsed() >= Duration::from_secs(30));

    subscription.unsubscribe().await;
}

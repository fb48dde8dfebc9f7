//! Realtime change notifications for a course's lectures.
//!
//! Speaks the Phoenix channel protocol used by the hosted realtime database: join a
//! topic with a `postgres_changes` filter, heartbeat every 30 seconds, and forward each
//! row change as a [`LectureChange`]. Only the change type is read from the payload;
//! consumers re-fetch whatever they display.

use crate::error::{LectureHubError, Result};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const PROTOCOL_VERSION: &str = "1.0.0";
const LECTURES_TABLE: &str = "lectures";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    Other,
}

impl ChangeKind {
    fn from_event(event: &str) -> Self {
        match event.to_ascii_uppercase().as_str() {
            "INSERT" => ChangeKind::Insert,
            "UPDATE" => ChangeKind::Update,
            "DELETE" => ChangeKind::Delete,
            _ => ChangeKind::Other,
        }
    }
}

/// A row in the lectures collection changed for this course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LectureChange {
    pub course_id: String,
    pub kind: ChangeKind,
}

/// Wire frame of the Phoenix channel protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PhoenixFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    join_ref: Option<String>,
}

/// What an incoming frame means for the subscription.
#[derive(Debug, PartialEq, Eq)]
enum FrameEvent {
    Change(ChangeKind),
    JoinAccepted,
    JoinRejected(String),
    Closed,
    Ignored,
}

pub fn lecture_topic(course_id: &str) -> String {
    format!("realtime:{}:course_id=eq.{}", LECTURES_TABLE, course_id)
}

fn join_frame(course_id: &str, reference: &str) -> Result<String> {
    let frame = PhoenixFrame {
        topic: lecture_topic(course_id),
        event: "phx_join".to_string(),
        payload: json!({
            "config": {
                "postgres_changes": [{
                    "event": "*",
                    "schema": "public",
                    "table": LECTURES_TABLE,
                    "filter": format!("course_id=eq.{}", course_id),
                }]
            }
        }),
        reference: Some(reference.to_string()),
        join_ref: Some(reference.to_string()),
    };
    Ok(serde_json::to_string(&frame)?)
}

fn heartbeat_frame(reference: &str) -> Result<String> {
    let frame = PhoenixFrame {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
        join_ref: None,
    };
    Ok(serde_json::to_string(&frame)?)
}

fn leave_frame(topic: &str, reference: &str) -> Result<String> {
    let frame = PhoenixFrame {
        topic: topic.to_string(),
        event: "phx_leave".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
        join_ref: None,
    };
    Ok(serde_json::to_string(&frame)?)
}

fn parse_frame(text: &str, topic: &str, join_ref: &str) -> FrameEvent {
    let frame: PhoenixFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "Ignoring malformed realtime frame");
            return FrameEvent::Ignored;
        }
    };
    if frame.topic != topic {
        return FrameEvent::Ignored;
    }

    match frame.event.as_str() {
        "postgres_changes" => {
            let kind = frame
                .payload
                .pointer("/data/type")
                .and_then(Value::as_str)
                .map(ChangeKind::from_event)
                .unwrap_or(ChangeKind::Other);
            FrameEvent::Change(kind)
        }
        "INSERT" | "UPDATE" | "DELETE" => FrameEvent::Change(ChangeKind::from_event(&frame.event)),
        "phx_reply" if frame.reference.as_deref() == Some(join_ref) => {
            match frame.payload.get("status").and_then(Value::as_str) {
                Some("ok") => FrameEvent::JoinAccepted,
                _ => FrameEvent::JoinRejected(
                    frame
                        .payload
                        .pointer("/response/reason")
                        .and_then(Value::as_str)
                        .unwrap_or("join refused")
                        .to_string(),
                ),
            }
        }
        "phx_close" | "phx_error" => FrameEvent::Closed,
        _ => FrameEvent::Ignored,
    }
}

/// Builds the websocket URL with the API key and protocol version.
pub fn socket_url(base: &str, api_key: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(base)?;
    if url.scheme() != "ws" && url.scheme() != "wss" {
        return Err(LectureHubError::Realtime {
            message: format!("Realtime URL must use ws:// or wss://, got {}", base),
        });
    }
    {
        let mut query = url.query_pairs_mut();
        if let Some(key) = api_key {
            query.append_pair("apikey", key);
        }
        query.append_pair("vsn", PROTOCOL_VERSION);
    }
    Ok(url)
}

/// A live subscription to one course's lecture changes.
///
/// Dropping it or calling [`unsubscribe`](Self::unsubscribe) leaves the channel and
/// closes the socket; only `unsubscribe` waits for that to finish.
pub struct RealtimeSubscription {
    course_id: String,
    leave: Option<oneshot::Sender<()>>,
    tasks: JoinSet<()>,
}

impl RealtimeSubscription {
    /// Connects, joins the course topic and starts forwarding changes into `changes`.
    pub async fn connect(
        base_url: &str,
        api_key: Option<&str>,
        course_id: &str,
        changes: mpsc::Sender<LectureChange>,
    ) -> Result<Self> {
        let url = socket_url(base_url, api_key)?;
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| LectureHubError::Realtime {
                message: format!("Failed to connect to realtime endpoint: {}", e),
            })?;
        let (mut write, read) = socket.split();

        let join_ref = "1".to_string();
        write
            .send(Message::text(join_frame(course_id, &join_ref)?))
            .await
            .map_err(|e| LectureHubError::Realtime {
                message: format!("Failed to join lecture channel: {}", e),
            })?;

        info!(course_id = %course_id, "Subscribed to lecture changes");

        let (leave_tx, leave_rx) = oneshot::channel();
        let mut tasks = JoinSet::new();
        tasks.spawn(run_channel(
            course_id.to_string(),
            join_ref,
            write,
            read,
            changes,
            leave_rx,
        ));

        Ok(Self {
            course_id: course_id.to_string(),
            leave: Some(leave_tx),
            tasks,
        })
    }

    pub fn course_id(&self) -> &str {
        &self.course_id
    }

    /// Leaves the channel, closes the socket and waits for the task to end.
    pub async fn unsubscribe(mut self) {
        if let Some(leave) = self.leave.take() {
            let _ = leave.send(());
        }
        while self.tasks.join_next().await.is_some() {}
        info!(course_id = %self.course_id, "Unsubscribed from lecture changes");
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        if let Some(leave) = self.leave.take() {
            let _ = leave.send(());
            // Let the task send phx_leave on its own instead of aborting it.
            self.tasks.detach_all();
        }
    }
}

async fn run_channel<W, R>(
    course_id: String,
    join_ref: String,
    mut write: W,
    mut read: R,
    changes: mpsc::Sender<LectureChange>,
    mut leave: oneshot::Receiver<()>,
) where
    W: futures::Sink<Message> + Unpin,
    W::Error: std::fmt::Display,
    R: futures::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    let topic = lecture_topic(&course_id);
    let mut next_ref: u64 = 2;
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = &mut leave => {
                if let Ok(frame) = leave_frame(&topic, &next_ref.to_string()) {
                    let _ = write.send(Message::text(frame)).await;
                }
                let _ = write.close().await;
                break;
            }
            _ = heartbeat.tick() => {
                let frame = match heartbeat_frame(&next_ref.to_string()) {
                    Ok(frame) => frame,
                    Err(_) => break,
                };
                next_ref += 1;
                if let Err(e) = write.send(Message::text(frame)).await {
                    warn!(course_id = %course_id, error = %e, "Realtime heartbeat failed");
                    break;
                }
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => match parse_frame(&text, &topic, &join_ref) {
                    FrameEvent::Change(kind) => {
                        debug!(course_id = %course_id, kind = ?kind, "Lecture change received");
                        let change = LectureChange { course_id: course_id.clone(), kind };
                        if changes.send(change).await.is_err() {
                            // Nobody is listening anymore.
                            break;
                        }
                    }
                    FrameEvent::JoinAccepted => {
                        debug!(course_id = %course_id, "Realtime join accepted")
                    }
                    FrameEvent::JoinRejected(reason) => {
                        warn!(course_id = %course_id, reason = %reason, "Realtime join rejected");
                        break;
                    }
                    FrameEvent::Closed => {
                        warn!(course_id = %course_id, "Realtime channel closed by server");
                        break;
                    }
                    FrameEvent::Ignored => {}
                },
                Some(Ok(Message::Close(_))) | None => {
                    warn!(course_id = %course_id, "Realtime socket closed");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(course_id = %course_id, error = %e, "Realtime socket error");
                    break;
                }
            },
        }
    }
}

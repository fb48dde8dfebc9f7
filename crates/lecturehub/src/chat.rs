//! Lecture chat: periodic re-fetch of the message list plus a send action.
//!
//! The session owns its poll task; dropping the session (or calling
//! [`ChatSession::shutdown`]) stops the timer. Every fetch takes a request token when it
//! starts, and a response only replaces the published list if no newer fetch has already
//! been applied.

use crate::api::LectureApi;
use crate::config::ChatConfig;
use crate::error::{LectureHubError, Result};
use crate::types::{ChatMessage, NewChatMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Published chat state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatView {
    /// Messages sorted by id
    pub messages: Vec<ChatMessage>,
    /// Text waiting to be sent
    pub draft: String,
    revision: u64,
}

impl ChatView {
    /// Token of the fetch whose result is currently shown (0 before the first fetch).
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Applied {
    Updated,
    Unchanged,
    Stale,
}

struct ChatInner {
    api: Arc<dyn LectureApi>,
    lecture_id: String,
    view: watch::Sender<ChatView>,
    next_token: AtomicU64,
}

impl ChatInner {
    fn issue_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn refresh(&self) -> Result<()> {
        let token = self.issue_token();
        match self.api.fetch_chat_messages(&self.lecture_id).await {
            Ok(messages) => {
                if self.apply(token, messages) == Applied::Stale {
                    debug!(
                        lecture_id = %self.lecture_id,
                        token = token,
                        "Discarding out-of-order chat response"
                    );
                }
                Ok(())
            }
            Err(e) => {
                warn!(lecture_id = %self.lecture_id, error = %e, "Failed to fetch chat messages");
                Err(e)
            }
        }
    }

    fn apply(&self, token: u64, mut messages: Vec<ChatMessage>) -> Applied {
        messages.sort_by_key(|m| m.id);
        let mut outcome = Applied::Stale;
        self.view.send_if_modified(|view| {
            if token <= view.revision {
                return false;
            }
            view.revision = token;
            if view.messages == messages {
                outcome = Applied::Unchanged;
                return false;
            }
            view.messages = messages;
            outcome = Applied::Updated;
            true
        });
        outcome
    }
}

/// A running chat poller for one lecture.
pub struct ChatSession {
    inner: Arc<ChatInner>,
    tasks: JoinSet<()>,
}

impl ChatSession {
    /// Starts polling immediately and then every `config.poll_interval()`.
    pub fn start(
        api: Arc<dyn LectureApi>,
        lecture_id: impl Into<String>,
        config: &ChatConfig,
    ) -> Self {
        let lecture_id = lecture_id.into();
        let (view, _) = watch::channel(ChatView::default());
        let inner = Arc::new(ChatInner {
            api,
            lecture_id,
            view,
            next_token: AtomicU64::new(0),
        });

        info!(
            lecture_id = %inner.lecture_id,
            interval_secs = config.poll_interval_secs,
            "Starting chat poller"
        );

        let mut tasks = JoinSet::new();
        tasks.spawn(poll_loop(inner.clone(), config.poll_interval()));

        Self { inner, tasks }
    }

    pub fn lecture_id(&self) -> &str {
        &self.inner.lecture_id
    }

    /// Receiver that observes every published change.
    pub fn subscribe(&self) -> watch::Receiver<ChatView> {
        self.inner.view.subscribe()
    }

    /// Snapshot of the current state.
    pub fn view(&self) -> ChatView {
        self.inner.view.borrow().clone()
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        let text = text.into();
        self.inner.view.send_if_modified(|view| {
            if view.draft == text {
                return false;
            }
            view.draft = text;
            true
        });
    }

    /// Re-fetches now, outside the timer.
    pub async fn refresh(&self) -> Result<()> {
        self.inner.refresh().await
    }

    /// Posts the current draft.
    ///
    /// Returns `Ok(false)` when the draft is blank and nothing was sent. On success the
    /// draft is cleared (unless it was edited while the post was in flight) and the list
    /// is re-fetched right away. Failures are logged and leave the draft untouched so the
    /// user can retry.
    pub async fn send(&self, sender_id: &str) -> Result<bool> {
        if sender_id.trim().is_empty() {
            return Err(LectureHubError::validation("Sign in to send messages"));
        }

        let text = self.inner.view.borrow().draft.clone();
        if text.trim().is_empty() {
            return Ok(false);
        }

        let message = NewChatMessage {
            lecture_id: self.inner.lecture_id.clone(),
            sender_id: sender_id.to_string(),
            message: text.clone(),
        };

        if let Err(e) = self.inner.api.send_chat_message(&message).await {
            warn!(lecture_id = %self.inner.lecture_id, error = %e, "Failed to send chat message");
            return Err(e);
        }

        self.inner.view.send_if_modified(|view| {
            if view.draft != text {
                return false;
            }
            view.draft.clear();
            true
        });
        // The post-send fetch is best effort; the next tick catches up if it fails.
        let _ = self.inner.refresh().await;
        Ok(true)
    }

    /// Convenience for `set_draft` followed by `send`.
    pub async fn send_message(&self, sender_id: &str, text: &str) -> Result<bool> {
        self.set_draft(text);
        self.send(sender_id).await
    }

    /// Stops the poll timer and waits for the task to finish.
    pub async fn shutdown(mut self) {
        info!(lecture_id = %self.inner.lecture_id, "Stopping chat poller");
        self.tasks.shutdown().await;
    }
}

async fn poll_loop(inner: Arc<ChatInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        // Errors are logged inside refresh; the next tick simply tries again.
        let _ = inner.refresh().await;
    }
}

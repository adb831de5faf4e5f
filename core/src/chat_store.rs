/// Chat history: server-confirmed messages merged with a locally queued
/// outgoing buffer
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A message confirmed by the relay, carrying its server-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedMessage {
    pub id: String,
    pub author: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// A locally queued message awaiting confirmation. Provisional: it has no
/// server-assigned id until the relay echoes it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub text: String,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMessage {
    Confirmed(ConfirmedMessage),
    Outgoing(OutgoingMessage),
}

impl ChatMessage {
    pub fn text(&self) -> &str {
        match self {
            ChatMessage::Confirmed(m) => &m.text,
            ChatMessage::Outgoing(m) => &m.text,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ChatMessage::Confirmed(m) => m.sent_at,
            ChatMessage::Outgoing(m) => m.queued_at,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, ChatMessage::Confirmed(_))
    }
}

struct ChatState {
    confirmed: Vec<ConfirmedMessage>,
    outgoing: Vec<OutgoingMessage>,
}

/// Merges the relay's confirmed history (source of truth, full recent
/// window) with the outgoing buffer, deduplicating acknowledged entries.
#[derive(Clone)]
pub struct ChatStore {
    inner: Arc<RwLock<ChatState>>,
    max_length: usize,
}

impl ChatStore {
    pub fn new(max_length: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ChatState {
                confirmed: Vec::new(),
                outgoing: Vec::new(),
            })),
            max_length,
        }
    }

    /// Queue a message for the next sync cycle. Rejected locally (never
    /// sent) if empty or longer than the configured maximum.
    pub async fn enqueue_outgoing(&self, text: &str) -> Result<()> {
        self.enqueue_at(text, Utc::now()).await
    }

    pub async fn enqueue_at(&self, text: &str, queued_at: DateTime<Utc>) -> Result<()> {
        if text.is_empty() {
            return Err(EngineError::Validation("message is empty".to_string()));
        }
        if text.chars().count() > self.max_length {
            return Err(EngineError::Validation(format!(
                "message exceeds {} characters",
                self.max_length
            )));
        }
        self.inner.write().await.outgoing.push(OutgoingMessage {
            text: text.to_string(),
            queued_at,
        });
        Ok(())
    }

    /// Replace the confirmed window with the server's history, then drop
    /// acknowledged outgoing entries. Returns true if store content changed.
    ///
    /// Acknowledgement is id-less and best-effort: an outgoing entry whose
    /// text matches a confirmed message timestamped at or after its queue
    /// time counts as confirmed. Two identical texts queued close together
    /// can both collapse against a single confirmation; known trade-off of
    /// text matching without client-visible ids.
    pub async fn merge_server_history(&self, history: Vec<ConfirmedMessage>) -> bool {
        let mut state = self.inner.write().await;
        let mut changed = state.confirmed != history;
        state.confirmed = history;

        let ChatState { confirmed, outgoing } = &mut *state;
        let before = outgoing.len();
        outgoing.retain(|out| {
            !confirmed
                .iter()
                .any(|c| c.text == out.text && c.sent_at >= out.queued_at)
        });
        changed |= outgoing.len() != before;
        changed
    }

    /// Snapshot for the sync upload payload.
    pub async fn outgoing_queue(&self) -> Vec<OutgoingMessage> {
        self.inner.read().await.outgoing.clone()
    }

    /// Chronological view of confirmed and outgoing messages. On equal
    /// timestamps confirmed entries sort first; the sort is stable otherwise.
    pub async fn visible_messages(&self) -> Vec<ChatMessage> {
        let state = self.inner.read().await;
        let mut all: Vec<ChatMessage> = state
            .confirmed
            .iter()
            .cloned()
            .map(ChatMessage::Confirmed)
            .chain(state.outgoing.iter().cloned().map(ChatMessage::Outgoing))
            .collect();
        all.sort_by_key(|m| (m.timestamp(), !m.is_confirmed()));
        all
    }
}

//! Shared message board: durable history, attachment hygiene, and the event
//! hub realtime clients subscribe to.

pub mod history;

use crate::common::errors::AppError;
use crate::store::content::ContentStore;
use crate::store::meta::unix_ms;
use crate::store::FileKind;
use history::HistoryLog;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

pub const MAX_SENDER_CHARS: usize = 30;
pub const MAX_TEXT_CHARS: usize = 5000;
const MAX_ATTACHMENT_NAME_CHARS: usize = 120;
const EVENT_CAPACITY: usize = 256;

/// Validated reference from a message to a stored file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub identity: String,
    pub name: String,
    pub size: u64,
    pub kind: FileKind,
}

/// One board entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub ts_ms: u64,
    pub sender: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Events fanned out to every connected realtime client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BoardEvent {
    Msg { item: Message },
    Delete { id: String },
    Clear,
}

/// Client-submitted message before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageDraft {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentDraft>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentDraft {
    pub identity: String,
}

/// The board itself. Entries live in memory, capped at the configured limit,
/// mirrored to the JSONL log on every mutation.
pub struct Board {
    log: HistoryLog,
    entries: RwLock<Vec<Message>>,
    events: broadcast::Sender<BoardEvent>,
    limit: usize,
}

impl Board {
    /// Load the board from its history file.
    pub async fn open(path: PathBuf, limit: usize) -> anyhow::Result<Self> {
        let log = HistoryLog::new(path);
        let entries = log.load(limit).await?;
        tracing::info!(messages = entries.len(), "board history loaded");

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            log,
            entries: RwLock::new(entries),
            events,
            limit,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.events.subscribe()
    }

    /// Current messages, oldest first.
    pub async fn snapshot(&self) -> Vec<Message> {
        self.entries.read().await.clone()
    }

    /// Validate and publish a message: attachments are re-resolved against
    /// the content store (unknown or oversized ones are dropped, matching
    /// what a stale client may reference), the entry is persisted, and the
    /// event is broadcast.
    pub async fn post(
        &self,
        draft: MessageDraft,
        store: &ContentStore,
        max_attachment_bytes: u64,
    ) -> Result<Message, AppError> {
        let sender = truncate_chars(&draft.sender, MAX_SENDER_CHARS);
        let text = truncate_chars(&draft.text, MAX_TEXT_CHARS);

        let mut attachments = Vec::new();
        for wanted in &draft.attachments {
            let Some(meta) = store.meta(&wanted.identity) else {
                tracing::warn!(identity = %wanted.identity, "dropping unknown attachment");
                continue;
            };
            if meta.size > max_attachment_bytes {
                tracing::warn!(
                    identity = %wanted.identity,
                    size = meta.size,
                    "dropping oversized attachment"
                );
                continue;
            }
            attachments.push(Attachment {
                identity: meta.identity.clone(),
                name: truncate_chars(&meta.name, MAX_ATTACHMENT_NAME_CHARS),
                size: meta.size,
                kind: meta.kind(),
            });
        }

        if text.is_empty() && attachments.is_empty() {
            return Err(AppError::BadRequest("empty message".to_string()));
        }

        let message = Message {
            id: Uuid::new_v4().simple().to_string(),
            ts_ms: unix_ms(),
            sender,
            text,
            attachments,
        };

        {
            let mut entries = self.entries.write().await;
            entries.push(message.clone());
            if entries.len() > self.limit {
                let excess = entries.len() - self.limit;
                entries.drain(..excess);
                self.log.rewrite(&entries).await.map_err(AppError::Storage)?;
            } else {
                self.log.append(&message).await.map_err(AppError::Storage)?;
            }
        }

        let _ = self.events.send(BoardEvent::Msg {
            item: message.clone(),
        });
        Ok(message)
    }

    /// Remove one message and its attachment files. Unknown ids are a no-op.
    pub async fn delete(&self, id: &str, store: &ContentStore) -> Result<bool, AppError> {
        let removed = {
            let mut entries = self.entries.write().await;
            match entries.iter().position(|m| m.id == id) {
                Some(idx) => {
                    let message = entries.remove(idx);
                    self.log.rewrite(&entries).await.map_err(AppError::Storage)?;
                    Some(message)
                }
                None => None,
            }
        };

        let Some(message) = removed else {
            return Ok(false);
        };

        for attachment in &message.attachments {
            if let Err(e) = store.delete(&attachment.identity).await {
                tracing::warn!(
                    identity = %attachment.identity,
                    error = %e,
                    "failed to remove attachment file"
                );
            }
        }

        let _ = self.events.send(BoardEvent::Delete { id: id.to_string() });
        tracing::info!(id, "message deleted");
        Ok(true)
    }

    /// Drop every message and every stored file.
    pub async fn clear(&self, store: &ContentStore) -> Result<(), AppError> {
        {
            let mut entries = self.entries.write().await;
            entries.clear();
            self.log.rewrite(&entries).await.map_err(AppError::Storage)?;
        }

        store.purge().await?;

        let _ = self.events.send(BoardEvent::Clear);
        tracing::info!("board cleared");
        Ok(())
    }

    pub async fn message_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Truncate to at most `max` characters, respecting char boundaries.
fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

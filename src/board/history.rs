//! Durable JSONL log for board messages.
//!
//! One JSON object per line, appended on post. Deletes and trims rewrite the
//! whole file through the atomic-replace path, so a crash never leaves a
//! half-written log.

use crate::board::Message;
use crate::common::fsio::atomic_write;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the newest `keep` messages. A missing file is an empty board;
    /// unparsable lines are skipped with a warning rather than taking the
    /// whole history down.
    pub async fn load(&self, keep: usize) -> Result<Vec<Message>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to read history {}", self.path.display())))
            }
        };

        let mut items: Vec<Message> = Vec::new();
        let mut skipped = 0usize;
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(message) => items.push(message),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(
                skipped,
                path = %self.path.display(),
                "dropped unparsable history lines"
            );
        }

        if items.len() > keep {
            items.drain(..items.len() - keep);
        }
        Ok(items)
    }

    /// Append one message to the log.
    pub async fn append(&self, message: &Message) -> Result<()> {
        let mut line = serde_json::to_string(message).context("Failed to serialize message")?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await
            .context(format!("Failed to open history {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("Failed to append history line")?;
        Ok(())
    }

    /// Replace the log with exactly `messages`.
    pub async fn rewrite(&self, messages: &[Message]) -> Result<()> {
        let mut body = String::new();
        for message in messages {
            body.push_str(&serde_json::to_string(message).context("Failed to serialize message")?);
            body.push('\n');
        }
        atomic_write(&self.path, &body)
    }
}

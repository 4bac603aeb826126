//! Durable, append-only conversation log.
//!
//! Every message is stored as one JSON object per line in `memory.jsonl` inside the
//! config directory. Appends are flushed to disk before they return so a crash can
//! at most lose the line that was being written.
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::errors::LogError;
use crate::models::message::Message;

pub const MESSAGE_LOG_FILE: &str = "memory.jsonl";

#[derive(Debug, Clone)]
pub struct MessageLog {
    path: PathBuf,
}

impl MessageLog {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// The log kept inside a config directory.
    pub fn in_dir(config_dir: &Path) -> Self {
        Self::new(config_dir.join(MESSAGE_LOG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every message in file order, creating an empty log if there is none.
    ///
    /// A trailing line cut short by a crash is dropped and the file truncated to the
    /// last complete record. A malformed line anywhere else is reported as
    /// [`LogError::Corrupted`].
    pub async fn replay(&self) -> Result<Vec<Message>, LogError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = self.path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(&self.path, b"").await?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut messages = Vec::new();
        let mut consumed = 0usize;
        let mut line_number = 0usize;

        while consumed < bytes.len() {
            line_number += 1;
            let rest = &bytes[consumed..];
            let Some(end) = rest.iter().position(|b| *b == b'\n') else {
                self.recover_tail(rest, consumed, &mut messages).await?;
                break;
            };

            let line = &rest[..end];
            if !is_blank(line) {
                let message = serde_json::from_slice(line).map_err(|e| LogError::Corrupted {
                    line: line_number,
                    reason: e.to_string(),
                })?;
                messages.push(message);
            }
            consumed += end + 1;
        }

        debug!(path = %self.path.display(), messages = messages.len(), "Replayed message log");
        Ok(messages)
    }

    async fn recover_tail(
        &self,
        tail: &[u8],
        offset: usize,
        messages: &mut Vec<Message>,
    ) -> Result<(), LogError> {
        if is_blank(tail) {
            return Ok(());
        }

        match serde_json::from_slice::<Message>(tail) {
            Ok(message) => {
                // Complete record without its terminator; restore it so the next append starts a new line.
                messages.push(message);
                let mut file = OpenOptions::new().append(true).open(&self.path).await?;
                file.write_all(b"\n").await?;
                file.sync_data().await?;
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Discarding partially written record at the end of the message log"
                );
                let file = OpenOptions::new().write(true).open(&self.path).await?;
                file.set_len(offset as u64).await?;
                file.sync_data().await?;
            }
        }
        Ok(())
    }

    pub async fn append(&self, message: &Message) -> Result<(), LogError> {
        self.append_all(std::slice::from_ref(message)).await
    }

    /// Append messages in order with a single write, durable once this returns.
    pub async fn append_all(&self, messages: &[Message]) -> Result<(), LogError> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut buffer = Vec::new();
        for message in messages {
            serde_json::to_writer(&mut buffer, message)?;
            buffer.push(b'\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buffer).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Remove every stored message.
    pub async fn clear(&self) -> Result<(), LogError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await?;
        file.sync_all().await?;
        Ok(())
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

//! Conversation history persistence
//!
//! Completed turns are appended to a JSON-lines file and replayed into
//! memory when the next session starts.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::memory::{ConversationMemory, Message, MessageRole};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Append-only JSONL store of user prompts and final answers
#[derive(Debug, Clone)]
pub struct History {
    path: PathBuf,
}

impl History {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record one completed turn
    pub fn append_turn(&self, prompt: &str, answer: &str) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;

        let mut lines = serde_json::to_string(&Message::user(prompt))?;
        lines.push('\n');
        lines.push_str(&serde_json::to_string(&Message::assistant(answer))?);
        lines.push('\n');
        file.write_all(lines.as_bytes())?;
        Ok(())
    }

    /// All readable messages, oldest first
    ///
    /// A missing file is an empty history. Lines that fail to parse are
    /// skipped.
    pub fn load(&self) -> Result<Vec<Message>, HistoryError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(n, line)| match serde_json::from_str::<Message>(line) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(line = n + 1, error = %e, "skipping unreadable history line");
                    None
                }
            })
            .collect())
    }

    /// Load user and assistant messages into `memory`, returning how many
    pub fn replay_into(&self, memory: &mut ConversationMemory) -> Result<usize, HistoryError> {
        let mut restored = 0;
        for message in self.load()? {
            if message.role == MessageRole::System {
                continue;
            }
            match memory.restore(message) {
                Ok(()) => restored += 1,
                Err(e) => debug!(error = %e, "history message not restored"),
            }
        }
        Ok(restored)
    }
}

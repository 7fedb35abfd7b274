//! Transcript data model shared by every bot session.

#[cfg(test)]
#[path = "message_test.rs"]
mod message_test;

use std::path::PathBuf;

use rand::Rng;
use serde::Serialize;
use wire::{BotType, FileData};

use crate::error::ClientError;

/// Who a transcript entry belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
    /// Local failure surfaced in the transcript (send error, disconnect, timeout).
    Error,
}

/// One utterance in a transcript.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub bot_type: BotType,
    /// Still receiving content. Only a bot message can stream.
    pub streaming: bool,
    /// Milliseconds since the Unix epoch; set once at creation.
    pub timestamp: i64,
    /// Request id this bot message answers, when the server supplied one.
    pub answer_id: Option<String>,
}

impl Message {
    pub(crate) fn new(seq: u64, role: Role, text: impl Into<String>, bot_type: BotType) -> Self {
        Self {
            id: message_id(seq),
            role,
            text: text.into(),
            bot_type,
            streaming: false,
            timestamp: wire::now_ms(),
            answer_id: None,
        }
    }

    #[must_use]
    pub fn is_streaming_bot(&self) -> bool {
        self.role == Role::Bot && self.streaming
    }
}

/// Session-local sequence plus a random tie-break. The sequence alone keeps
/// ids unique within a session; the suffix keeps them distinct across sessions.
fn message_id(seq: u64) -> String {
    let salt: u32 = rand::rng().random();
    format!("m{seq:06}-{salt:08x}")
}

/// A file attached to the next outgoing message.
///
/// Host file pickers hand over an in-memory buffer; the CLI hands over a path.
/// Either way the bytes are read when the message is sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Attachment {
    Bytes { name: String, data: Vec<u8> },
    Path(PathBuf),
}

impl Attachment {
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Bytes { name, .. } => name.clone(),
            Self::Path(path) => path
                .file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned()),
        }
    }

    /// Read the full byte content and package it with its filename.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::FileRead`] if the bytes cannot be read.
    pub async fn read(&self) -> Result<FileData, ClientError> {
        match self {
            Self::Bytes { name, data } => Ok(FileData { name: name.clone(), data: data.clone() }),
            Self::Path(path) => {
                let data = tokio::fs::read(path)
                    .await
                    .map_err(|source| ClientError::FileRead { name: self.name(), source })?;
                Ok(FileData { name: self.name(), data })
            }
        }
    }
}

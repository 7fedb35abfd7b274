//! Typed event payloads.
//!
//! Each payload knows the [`Event`] it travels under, so envelopes can be
//! built and unpacked without stringly-typed event names at call sites.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::Event;

/// A payload type bound to one wire event.
pub trait Payload: Serialize + DeserializeOwned {
    const EVENT: Event;

    /// Move raw file bytes out before JSON encoding.
    fn take_blob(&mut self) -> Option<Vec<u8>> {
        None
    }

    /// Restore raw file bytes after JSON decoding.
    fn put_blob(&mut self, blob: Vec<u8>) {
        let _ = blob;
    }
}

/// Which backend bot (and UI context) a message belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotType {
    #[default]
    General,
    Pdf,
    Excel,
    Notebook,
    Qa,
}

impl BotType {
    pub const ALL: [Self; 5] = [Self::General, Self::Pdf, Self::Excel, Self::Notebook, Self::Qa];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Pdf => "pdf",
            Self::Excel => "excel",
            Self::Notebook => "notebook",
            Self::Qa => "qa",
        }
    }
}

impl std::fmt::Display for BotType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown bot type: {0}")]
pub struct ParseBotTypeError(pub String);

impl FromStr for BotType {
    type Err = ParseBotTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|bot| bot.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseBotTypeError(s.to_owned()))
    }
}

/// Speaker of a server-delivered message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

/// A named byte buffer attached to an outgoing message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    pub name: String,
    /// Carried in the envelope blob on the binary wire.
    #[serde(default)]
    pub data: Vec<u8>,
}

/// `send_message`: ask a bot something.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    pub bot_type: BotType,
    pub message: String,
    pub file: Option<FileData>,
}

impl Payload for SendMessage {
    const EVENT: Event = Event::SendMessage;

    fn take_blob(&mut self) -> Option<Vec<u8>> {
        self.file.as_mut().map(|file| std::mem::take(&mut file.data))
    }

    fn put_blob(&mut self, blob: Vec<u8>) {
        if let Some(file) = self.file.as_mut() {
            file.data = blob;
        }
    }
}

/// `excel_analytics`: run analytics over one sheet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcelAnalytics {
    pub sheet_name: String,
    pub analysis_type: String,
}

impl ExcelAnalytics {
    pub const DEFAULT_ANALYSIS: &'static str = "comprehensive";
}

impl Payload for ExcelAnalytics {
    const EVENT: Event = Event::ExcelAnalytics;
}

/// `excel_cleaning`: apply cleaning operations to one sheet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcelCleaning {
    pub operations: Vec<String>,
    pub sheet_name: String,
}

impl Payload for ExcelCleaning {
    const EVENT: Event = Event::ExcelCleaning;
}

/// `message_received`: one-shot delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReceived {
    pub role: Role,
    pub content: String,
    pub bot_type: BotType,
}

impl Payload for MessageReceived {
    const EVENT: Event = Event::MessageReceived;
}

/// `stream_response`: one partial delivery. `content` is the full answer so
/// far, not a delta.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamResponse {
    pub role: Role,
    pub content: String,
    pub bot_type: BotType,
    #[serde(default)]
    pub is_complete: bool,
}

impl Payload for StreamResponse {
    const EVENT: Event = Event::StreamResponse;
}

/// `error`: the server failed to answer a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub message: String,
}

impl Payload for ErrorNotice {
    const EVENT: Event = Event::Error;
}

#[cfg(test)]
#[path = "payload_test.rs"]
mod tests;

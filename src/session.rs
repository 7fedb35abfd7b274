//! Conversation reducer: one per mounted bot view.
//!
//! DESIGN
//! ======
//! A `Session` is a synchronous state machine over two event streams: local
//! submits and remote deliveries relayed by the transport. It never performs
//! I/O. `submit` returns the [`Request`] the caller must hand to the
//! transport, and every remote event returns a [`Change`] describing which
//! transcript row to re-render.
//!
//! INVARIANTS
//! ==========
//! - The transcript is append-only. The only in-place mutation is the text
//!   and streaming flag of a bot message whose `streaming` is still true.
//! - A finalized message is never touched again; a later chunk that cannot
//!   be matched to a streaming message starts a new message.
//! - Chunks carrying an answer id update the streaming message with that id.
//!   Chunks without one fall back to the trailing streaming bot message.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use tracing::debug;
use uuid::Uuid;
use wire::{BotType, ExcelAnalytics, MessageReceived, StreamResponse};

use crate::message::{Attachment, Message, Role};
use crate::transport::Inbound;

/// Outbound work produced by an accepted local action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Message { bot_type: BotType, text: String, file: Option<Attachment> },
    Analytics { sheet_name: String, analysis_type: String },
    Cleaning { operations: Vec<String>, sheet_name: String },
}

/// What a transition did to the transcript.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    Appended(usize),
    Updated(usize),
    Ignored,
}

impl Change {
    /// Transcript index touched by the transition, if any.
    #[must_use]
    pub fn index(self) -> Option<usize> {
        match self {
            Self::Appended(i) | Self::Updated(i) => Some(i),
            Self::Ignored => None,
        }
    }
}

/// Whether submits are rejected while a response is pending.
///
/// The PDF view lets the user keep asking while an answer streams.
fn gates_submit(bot_type: BotType) -> bool {
    !matches!(bot_type, BotType::Pdf)
}

#[derive(Debug)]
pub struct Session {
    id: String,
    bot_type: BotType,
    transcript: Vec<Message>,
    pending_file: Option<Attachment>,
    awaiting_response: bool,
    /// Id of the most recent request handed to the transport.
    in_flight: Option<String>,
    next_seq: u64,
}

impl Session {
    #[must_use]
    pub fn new(bot_type: BotType) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), bot_type)
    }

    #[must_use]
    pub fn with_id(id: impl Into<String>, bot_type: BotType) -> Self {
        Self {
            id: id.into(),
            bot_type,
            transcript: Vec::new(),
            pending_file: None,
            awaiting_response: false,
            in_flight: None,
            next_seq: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn bot_type(&self) -> BotType {
        self.bot_type
    }

    #[must_use]
    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    #[must_use]
    pub fn pending_file(&self) -> Option<&Attachment> {
        self.pending_file.as_ref()
    }

    #[must_use]
    pub fn is_awaiting_response(&self) -> bool {
        self.awaiting_response
    }

    /// True while any bot message is still streaming.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.transcript.iter().any(Message::is_streaming_bot)
    }

    #[must_use]
    pub fn accepts_input(&self) -> bool {
        !self.awaiting_response || !gates_submit(self.bot_type)
    }

    // =========================================================================
    // LOCAL ACTIONS
    // =========================================================================

    /// Replace any pending attachment. No transcript change.
    pub fn attach_file(&mut self, file: Attachment) {
        debug!(session_id = %self.id, file = %file.name(), "session: file attached");
        self.pending_file = Some(file);
    }

    /// Drop the pending attachment without sending it.
    pub fn detach_file(&mut self) -> Option<Attachment> {
        self.pending_file.take()
    }

    /// Accept user input.
    ///
    /// Whitespace-only input, or input while a response is pending on a
    /// gated bot, is a silent no-op: no transcript change and no request.
    pub fn submit(&mut self, text: &str) -> Option<Request> {
        if text.trim().is_empty() || !self.accepts_input() {
            return None;
        }

        self.push(Role::User, text);
        self.awaiting_response = true;
        Some(Request::Message { bot_type: self.bot_type, text: text.to_owned(), file: self.pending_file.take() })
    }

    /// Ask the Excel bot for analytics over `sheet_name`.
    pub fn request_analytics(&mut self, sheet_name: &str, analysis_type: Option<&str>) -> Option<Request> {
        if !self.accepts_excel_action(sheet_name) {
            return None;
        }

        self.push(Role::User, format!("Run analytics on sheet: {sheet_name}"));
        self.awaiting_response = true;
        Some(Request::Analytics {
            sheet_name: sheet_name.to_owned(),
            analysis_type: analysis_type
                .unwrap_or(ExcelAnalytics::DEFAULT_ANALYSIS)
                .to_owned(),
        })
    }

    /// Ask the Excel bot to clean `sheet_name`.
    pub fn request_cleaning(&mut self, operations: Vec<String>, sheet_name: &str) -> Option<Request> {
        if operations.is_empty() || !self.accepts_excel_action(sheet_name) {
            return None;
        }

        self.push(Role::User, format!("Clean data on sheet: {sheet_name}"));
        self.awaiting_response = true;
        Some(Request::Cleaning { operations, sheet_name: sheet_name.to_owned() })
    }

    fn accepts_excel_action(&self, sheet_name: &str) -> bool {
        self.bot_type == BotType::Excel && !sheet_name.trim().is_empty() && self.accepts_input()
    }

    /// Record the correlation id the transport assigned to the last request.
    pub fn mark_sent(&mut self, request_id: impl Into<String>) {
        self.in_flight = Some(request_id.into());
    }

    // =========================================================================
    // REMOTE EVENTS
    // =========================================================================

    /// Apply one event relayed by the transport.
    pub fn apply(&mut self, inbound: &Inbound) -> Change {
        match inbound {
            Inbound::Stream { answer_id, chunk } => self.receive_chunk(chunk, answer_id.as_deref()),
            Inbound::Message { answer_id, message } => self.receive_message(message, answer_id.as_deref()),
            Inbound::Error { answer_id, message } => {
                if self.is_stale(answer_id.as_deref()) {
                    return Change::Ignored;
                }
                self.fail(message.clone())
            }
            Inbound::Disconnected => {
                if !self.awaiting_response && !self.is_streaming() {
                    return Change::Ignored;
                }
                self.fail("connection lost")
            }
        }
    }

    /// Merge one stream chunk. `content` is the whole answer so far.
    pub fn receive_chunk(&mut self, chunk: &StreamResponse, answer_id: Option<&str>) -> Change {
        if chunk.role != wire::Role::Bot || chunk.bot_type != self.bot_type {
            debug!(session_id = %self.id, role = ?chunk.role, bot_type = %chunk.bot_type, "session: chunk ignored");
            return Change::Ignored;
        }

        let streaming = !chunk.is_complete;
        let change = if let Some(index) = self.streaming_target(answer_id) {
            let msg = &mut self.transcript[index];
            msg.text.clone_from(&chunk.content);
            msg.streaming = streaming;
            if msg.answer_id.is_none() {
                msg.answer_id = answer_id.map(ToOwned::to_owned);
            }
            Change::Updated(index)
        } else {
            let index = self.push(Role::Bot, chunk.content.clone());
            let msg = &mut self.transcript[index];
            msg.streaming = streaming;
            msg.answer_id = answer_id.map(ToOwned::to_owned);
            Change::Appended(index)
        };

        if chunk.is_complete {
            self.settle(answer_id);
        }
        change
    }

    /// Apply a one-shot delivery. User echoes are already in the transcript.
    pub fn receive_message(&mut self, message: &MessageReceived, answer_id: Option<&str>) -> Change {
        if message.role != wire::Role::Bot || message.bot_type != self.bot_type {
            return Change::Ignored;
        }

        let index = self.push(Role::Bot, message.content.clone());
        self.transcript[index].answer_id = answer_id.map(ToOwned::to_owned);
        self.settle(answer_id);
        Change::Appended(index)
    }

    /// Record a request that never reached the server.
    ///
    /// The failed request has no bot message yet, so earlier answers that are
    /// still streaming keep streaming. The gate stays closed only while an
    /// earlier request is still in flight.
    pub fn fail_send(&mut self, reason: impl Into<String>) -> Change {
        let index = self.push(Role::Error, reason);
        self.awaiting_response = self.in_flight.is_some();
        Change::Appended(index)
    }

    /// Surface a failure of the whole exchange: finalize streaming messages,
    /// append an error entry, and release the input gate.
    pub fn fail(&mut self, reason: impl Into<String>) -> Change {
        for msg in &mut self.transcript {
            msg.streaming = false;
        }
        let index = self.push(Role::Error, reason);
        self.awaiting_response = false;
        self.in_flight = None;
        Change::Appended(index)
    }

    fn streaming_target(&self, answer_id: Option<&str>) -> Option<usize> {
        if let Some(answer_id) = answer_id {
            let keyed = self
                .transcript
                .iter()
                .rposition(|m| m.is_streaming_bot() && m.answer_id.as_deref() == Some(answer_id));
            if keyed.is_some() {
                return keyed;
            }
        }

        let index = self.transcript.len().checked_sub(1)?;
        let tail = &self.transcript[index];
        if !tail.is_streaming_bot() {
            return None;
        }
        match (answer_id, tail.answer_id.as_deref()) {
            (Some(incoming), Some(current)) if incoming != current => None,
            _ => Some(index),
        }
    }

    /// A terminal event for an older request does not release the gate.
    fn is_stale(&self, answer_id: Option<&str>) -> bool {
        matches!((answer_id, self.in_flight.as_deref()), (Some(a), Some(r)) if a != r)
    }

    fn settle(&mut self, answer_id: Option<&str>) {
        if self.is_stale(answer_id) {
            return;
        }
        self.awaiting_response = false;
        self.in_flight = None;
    }

    fn push(&mut self, role: Role, text: impl Into<String>) -> usize {
        self.next_seq += 1;
        self.transcript
            .push(Message::new(self.next_seq, role, text, self.bot_type));
        self.transcript.len() - 1
    }
}

//! Binds one [`Session`] to the shared [`Transport`].
//!
//! A `Conversation` is what a bot view holds while it is mounted: local
//! actions go through the reducer first and only then reach the transport,
//! and inbound events are applied to the reducer in arrival order. Dropping
//! the conversation unsubscribes it and discards the transcript.

#[cfg(test)]
#[path = "conversation_test.rs"]
mod conversation_test;

use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};
use wire::BotType;

use crate::error::{ClientError, ErrorCode};
use crate::message::Attachment;
use crate::session::{Change, Request, Session};
use crate::transport::{Subscription, Transport};

pub struct Conversation {
    session: Session,
    transport: Transport,
    subscription: Subscription,
    response_timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl Conversation {
    /// Mount a new session for `bot_type` on `transport`.
    #[must_use]
    pub fn open(transport: &Transport, bot_type: BotType) -> Self {
        Self::with_session(transport, Session::new(bot_type))
    }

    #[must_use]
    pub fn with_session(transport: &Transport, session: Session) -> Self {
        let subscription = transport.subscribe_all(session.id());
        info!(session_id = %session.id(), bot_type = %session.bot_type(), "conversation: opened");
        Self {
            response_timeout: transport.config().response_timeout,
            session,
            transport: transport.clone(),
            subscription,
            deadline: None,
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn attach_file(&mut self, file: Attachment) {
        self.session.attach_file(file);
    }

    /// Submit user input. Rejected input is `Ok(Change::Ignored)`.
    ///
    /// # Errors
    ///
    /// Returns the transport error after recording it in the transcript.
    pub async fn submit(&mut self, text: &str) -> Result<Change, ClientError> {
        let request = self.session.submit(text);
        self.dispatch(request).await
    }

    /// Ask the Excel bot for analytics over `sheet_name`.
    ///
    /// # Errors
    ///
    /// Returns the transport error after recording it in the transcript.
    pub async fn analytics(&mut self, sheet_name: &str, analysis_type: Option<&str>) -> Result<Change, ClientError> {
        let request = self.session.request_analytics(sheet_name, analysis_type);
        self.dispatch(request).await
    }

    /// Ask the Excel bot to clean `sheet_name`.
    ///
    /// # Errors
    ///
    /// Returns the transport error after recording it in the transcript.
    pub async fn cleaning(&mut self, operations: Vec<String>, sheet_name: &str) -> Result<Change, ClientError> {
        let request = self.session.request_cleaning(operations, sheet_name);
        self.dispatch(request).await
    }

    async fn dispatch(&mut self, request: Option<Request>) -> Result<Change, ClientError> {
        let Some(request) = request else {
            return Ok(Change::Ignored);
        };
        let appended = Change::Appended(self.session.transcript().len() - 1);

        match self.transport.send_request(self.session.id(), &request).await {
            Ok(request_id) => {
                self.session.mark_sent(request_id);
                self.arm_deadline();
                Ok(appended)
            }
            Err(e) => {
                warn!(session_id = %self.session.id(), code = e.error_code(), error = %e, "conversation: send failed");
                self.session.fail_send(e.to_string());
                if !self.session.is_awaiting_response() {
                    self.deadline = None;
                }
                Err(e)
            }
        }
    }

    fn arm_deadline(&mut self) {
        self.deadline = self.response_timeout.map(|t| Instant::now() + t);
    }

    /// Keep the deadline in step with the session after a remote event.
    fn track(&mut self, change: Change) -> Change {
        if !self.session.is_awaiting_response() {
            self.deadline = None;
        } else if change != Change::Ignored {
            // Progress on the answer restarts the clock.
            self.arm_deadline();
        }
        change
    }

    fn time_out(&mut self) -> Change {
        warn!(session_id = %self.session.id(), "conversation: response timed out");
        self.deadline = None;
        self.session
            .fail(ClientError::Timeout("waiting for a response").to_string())
    }

    /// Wait for the next inbound event and apply it.
    ///
    /// Returns `None` once the subscription is gone. Cancel-safe, so it can
    /// sit in a `select!` next to an input source.
    pub async fn next_change(&mut self) -> Option<Change> {
        let inbound = match self.deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, self.subscription.recv()).await {
                Ok(inbound) => inbound?,
                Err(_) => return Some(self.time_out()),
            },
            None => self.subscription.recv().await?,
        };

        let change = self.session.apply(&inbound);
        Some(self.track(change))
    }

    /// Apply every event already queued without waiting, then fail the
    /// session if its response deadline has passed.
    pub fn drain(&mut self) -> Vec<Change> {
        let mut changes = Vec::new();
        while let Some(inbound) = self.subscription.try_recv() {
            let change = self.session.apply(&inbound);
            changes.push(self.track(change));
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            changes.push(self.time_out());
        }
        changes
    }

    /// Tear down: unsubscribe and hand back the final session state.
    #[must_use]
    pub fn close(self) -> Session {
        info!(session_id = %self.session.id(), "conversation: closed");
        self.session
    }
}

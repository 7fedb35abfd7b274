//! REST helpers for the non-streaming chat endpoints.
//!
//! Each bot has a request/response endpoint returning `{ "response": ... }`.
//! The PDF and Excel bots take multipart bodies so a file can ride along;
//! the others take a small JSON object whose field name depends on the bot.

#[cfg(test)]
#[path = "rest_test.rs"]
mod rest_test;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use wire::BotType;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::message::Attachment;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    response: String,
}

fn chat_path(bot_type: BotType) -> String {
    format!("/api/chat/{}", bot_type.as_str())
}

/// JSON field carrying the user text for JSON-bodied bots.
fn text_field(bot_type: BotType) -> &'static str {
    match bot_type {
        BotType::Qa => "question",
        BotType::Notebook => "cell",
        BotType::General | BotType::Pdf | BotType::Excel => "message",
    }
}

fn uses_multipart(bot_type: BotType) -> bool {
    matches!(bot_type, BotType::Pdf | BotType::Excel)
}

/// Pull a readable message out of an error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(ToOwned::to_owned))
        .unwrap_or_else(|| body.trim().to_owned())
}

#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl RestClient {
    /// # Errors
    ///
    /// Returns [`ClientError::Http`] if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    /// Ask a bot and wait for the whole answer.
    ///
    /// `file` is only sent to the PDF and Excel bots.
    ///
    /// # Errors
    ///
    /// - [`ClientError::EmptyInput`] for blank text.
    /// - [`ClientError::FileRead`] when the attachment cannot be read.
    /// - [`ClientError::Server`] for non-2xx responses.
    pub async fn ask(&self, bot_type: BotType, text: &str, file: Option<&Attachment>) -> Result<String, ClientError> {
        if text.trim().is_empty() {
            return Err(ClientError::EmptyInput);
        }

        let url = self.config.endpoint(&chat_path(bot_type));
        let request = if uses_multipart(bot_type) {
            let mut form = Form::new().text("message", text.to_owned());
            if let Some(file) = file {
                let data = file.read().await?;
                form = form.part("file", Part::bytes(data.data).file_name(data.name));
            }
            self.http.post(&url).multipart(form)
        } else {
            if file.is_some() {
                warn!(%bot_type, "rest: attachment ignored for JSON endpoint");
            }
            let mut body = serde_json::Map::new();
            body.insert(text_field(bot_type).to_owned(), Value::String(text.to_owned()));
            self.http.post(&url).json(&body)
        };

        info!(%bot_type, %url, "rest: chat request");
        let body: ChatResponse = serde_json::from_value(self.send(request).await?)?;
        Ok(body.response)
    }

    /// Upload a workbook for the Excel bot. The server's JSON is returned whole.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::FileRead`] or [`ClientError::Server`].
    pub async fn upload_excel(&self, file: &Attachment) -> Result<Value, ClientError> {
        let data = file.read().await?;
        info!(file = %data.name, size = data.data.len(), "rest: excel upload");
        let form = Form::new().part("file", Part::bytes(data.data).file_name(data.name));
        let request = self
            .http
            .post(self.config.endpoint("/api/excel/upload"))
            .multipart(form);
        self.send(request).await
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ClientError::Server { status: status.as_u16(), message: error_message(&body) });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

//! In-process fake backend shared by the transport, conversation and REST tests.
//!
//! The socket side answers `send_message` by streaming `"echo: <message>"`
//! word by word, each chunk carrying the whole answer so far, and answers the
//! Excel events with one `message_received`. A few magic messages script
//! other server behavior.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message as SocketMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{any, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;
use wire::{
    BotType, Envelope, ErrorNotice, Event, ExcelAnalytics, ExcelCleaning, MessageReceived, SendMessage, StreamResponse,
};

use crate::config::ClientConfig;

/// Accepted but never answered.
pub const SILENT: &str = "[silent]";
/// Answered without `session_id` or `parent_id`, like an older server.
pub const UNTAGGED: &str = "[untagged]";
/// The server closes the socket instead of answering.
pub const HANG_UP: &str = "[hang up]";
/// The server answers with an error event (or HTTP 500 over REST).
pub const FAIL: &str = "[fail]";
/// Echo the message, with the reply sent as JSON text frames.
pub const JSON_TEXT: &str = "[json]";

pub const FAILURE_TEXT: &str = "model unavailable";

pub struct Backend {
    pub addr: SocketAddr,
    seen: mpsc::UnboundedReceiver<Envelope>,
}

impl Backend {
    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            base_url: format!("http://{}", self.addr),
            connect_timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        }
    }

    /// Next envelope the socket side received from a client.
    pub async fn next_seen(&mut self) -> Envelope {
        timeout(Duration::from_secs(2), self.seen.recv())
            .await
            .expect("backend receive timed out")
            .expect("backend channel closed")
    }
}

#[derive(Clone)]
struct Shared {
    seen: mpsc::UnboundedSender<Envelope>,
}

pub async fn spawn_backend() -> Backend {
    let (seen_tx, seen) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/ws", any(ws_upgrade))
        .route("/api/chat/pdf", post(chat_multipart))
        .route("/api/chat/excel", post(chat_multipart))
        .route("/api/chat/{bot}", post(chat_json))
        .route("/api/excel/upload", post(excel_upload))
        .with_state(Shared { seen: seen_tx });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });
    Backend { addr, seen }
}

// =============================================================================
// SOCKET
// =============================================================================

enum Script {
    Reply(Vec<Envelope>),
    ReplyText(Vec<Envelope>),
    HangUp,
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(shared): State<Shared>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, shared))
}

async fn serve_socket(mut socket: WebSocket, shared: Shared) {
    while let Some(Ok(message)) = socket.recv().await {
        let SocketMessage::Binary(bytes) = message else {
            continue;
        };
        let Ok(request) = wire::decode_envelope(&bytes) else {
            continue;
        };
        let _ = shared.seen.send(request.clone());

        match script(&request) {
            Script::HangUp => {
                let _ = socket.send(SocketMessage::Close(None)).await;
                return;
            }
            Script::Reply(replies) => {
                for reply in replies {
                    let bytes = wire::encode_envelope(&reply);
                    if socket.send(SocketMessage::Binary(bytes.into())).await.is_err() {
                        return;
                    }
                }
            }
            Script::ReplyText(replies) => {
                for reply in replies {
                    let text = serde_json::to_string(&reply).expect("json reply");
                    if socket.send(SocketMessage::Text(text.into())).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

fn script(request: &Envelope) -> Script {
    match request.event {
        Event::SendMessage => {
            let Ok(send) = request.payload::<SendMessage>() else {
                return Script::Reply(Vec::new());
            };
            match send.message.as_str() {
                SILENT => Script::Reply(Vec::new()),
                HANG_UP => Script::HangUp,
                JSON_TEXT => Script::ReplyText(stream_answer(request, send.bot_type, &format!("echo: {JSON_TEXT}"))),
                FAIL => Script::Reply(vec![
                    request
                        .reply_with(ErrorNotice { message: FAILURE_TEXT.into() })
                        .expect("error reply"),
                ]),
                UNTAGGED => Script::Reply(
                    stream_answer(request, send.bot_type, &format!("echo: {UNTAGGED}"))
                        .into_iter()
                        .map(|mut reply| {
                            reply.session_id = None;
                            reply.parent_id = None;
                            reply
                        })
                        .collect(),
                ),
                text => {
                    let answer = match &send.file {
                        Some(file) => format!("received {} ({} bytes)", file.name, file.data.len()),
                        None => format!("echo: {text}"),
                    };
                    Script::Reply(stream_answer(request, send.bot_type, &answer))
                }
            }
        }
        Event::ExcelAnalytics => {
            let Ok(req) = request.payload::<ExcelAnalytics>() else {
                return Script::Reply(Vec::new());
            };
            one_shot(request, format!("analytics for {} ({})", req.sheet_name, req.analysis_type))
        }
        Event::ExcelCleaning => {
            let Ok(req) = request.payload::<ExcelCleaning>() else {
                return Script::Reply(Vec::new());
            };
            one_shot(request, format!("cleaned {}: {}", req.sheet_name, req.operations.join(", ")))
        }
        Event::MessageReceived | Event::StreamResponse | Event::Error => Script::Reply(Vec::new()),
    }
}

fn stream_answer(request: &Envelope, bot_type: BotType, answer: &str) -> Vec<Envelope> {
    let words: Vec<&str> = answer.split_whitespace().collect();
    (1..=words.len())
        .map(|n| {
            let chunk = StreamResponse {
                role: wire::Role::Bot,
                content: words[..n].join(" "),
                bot_type,
                is_complete: n == words.len(),
            };
            request.reply_with(chunk).expect("stream reply")
        })
        .collect()
}

fn one_shot(request: &Envelope, content: String) -> Script {
    let message = MessageReceived { role: wire::Role::Bot, content, bot_type: BotType::Excel };
    Script::Reply(vec![request.reply_with(message).expect("message reply")])
}

// =============================================================================
// REST
// =============================================================================

async fn chat_json(Path(bot): Path<String>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let field = match bot.as_str() {
        "qa" => "question",
        "notebook" => "cell",
        _ => "message",
    };
    match body.get(field).and_then(Value::as_str) {
        None => (StatusCode::BAD_REQUEST, Json(json!({ "error": format!("missing {field}") }))),
        Some(FAIL) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": FAILURE_TEXT }))),
        Some(text) => (StatusCode::OK, Json(json!({ "response": format!("{bot}: {text}") }))),
    }
}

struct Upload {
    message: Option<String>,
    file: Option<(String, usize)>,
}

async fn read_multipart(mut multipart: Multipart) -> Upload {
    let mut upload = Upload { message: None, file: None };
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().map(ToOwned::to_owned);
        let file_name = field.file_name().map(ToOwned::to_owned);
        let bytes = field.bytes().await.unwrap_or_default();
        match name.as_deref() {
            Some("message") => upload.message = Some(String::from_utf8_lossy(&bytes).into_owned()),
            Some("file") => upload.file = Some((file_name.unwrap_or_default(), bytes.len())),
            _ => {}
        }
    }
    upload
}

async fn chat_multipart(multipart: Multipart) -> (StatusCode, Json<Value>) {
    let upload = read_multipart(multipart).await;
    let Some(message) = upload.message else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "missing message" })));
    };
    let response = match upload.file {
        Some((name, size)) => format!("{message} + {name} ({size} bytes)"),
        None => message,
    };
    (StatusCode::OK, Json(json!({ "response": response })))
}

async fn excel_upload(multipart: Multipart) -> (StatusCode, Json<Value>) {
    match read_multipart(multipart).await.file {
        Some((name, size)) => (StatusCode::OK, Json(json!({ "file": name, "size": size, "sheets": ["Sheet1"] }))),
        None => (StatusCode::BAD_REQUEST, Json(json!({ "error": "no file" }))),
    }
}

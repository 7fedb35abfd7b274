//! WebSocket transport shared by every bot session.
//!
//! The `Transport` owns one connection to the backend and multiplexes all
//! sessions over it. Outbound envelopes flow through an unbounded channel to
//! a writer task; a reader task decodes inbound envelopes and routes them to
//! per-session subscriptions.
//!
//! ROUTING
//! =======
//! Subscriptions are keyed by `(session_id, kind)`. Server events tagged with
//! a `session_id` reach only that session. Untagged events (older servers)
//! go to the most recently registered subscriber for the kind.
//!
//! ERROR HANDLING
//! ==============
//! Malformed inbound envelopes are logged and dropped. When the socket ends
//! unexpectedly every subscriber receives [`Inbound::Disconnected`];
//! reconnecting is left to the caller.

#[cfg(test)]
#[path = "transport_test.rs"]
mod transport_test;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use wire::{
    BotType, CodecError, Envelope, ErrorNotice, Event, ExcelAnalytics, ExcelCleaning, MessageReceived, SendMessage,
    StreamResponse,
};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::message::Attachment;
use crate::session::Request;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// EVENTS
// =============================================================================

/// The two server delivery styles a view can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// One-shot `message_received` deliveries.
    Message,
    /// Incremental `stream_response` deliveries (and server errors that end a stream).
    Stream,
}

/// An event relayed to a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Stream { answer_id: Option<String>, chunk: StreamResponse },
    Message { answer_id: Option<String>, message: MessageReceived },
    Error { answer_id: Option<String>, message: String },
    /// The connection ended without the caller asking for it.
    Disconnected,
}

impl Inbound {
    fn kind(&self) -> Option<EventKind> {
        match self {
            Self::Stream { .. } | Self::Error { .. } => Some(EventKind::Stream),
            Self::Message { .. } => Some(EventKind::Message),
            Self::Disconnected => None,
        }
    }

    /// Decode a server envelope. Client-bound events only; request events yield `None`.
    fn from_envelope(envelope: &Envelope) -> Result<Option<Self>, CodecError> {
        let answer_id = envelope.parent_id.clone();
        let inbound = match envelope.event {
            Event::StreamResponse => Self::Stream { answer_id, chunk: envelope.payload()? },
            Event::MessageReceived => Self::Message { answer_id, message: envelope.payload()? },
            Event::Error => Self::Error { answer_id, message: envelope.payload::<ErrorNotice>()?.message },
            Event::SendMessage | Event::ExcelAnalytics | Event::ExcelCleaning => return Ok(None),
        };
        Ok(Some(inbound))
    }
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

struct Route {
    token: u64,
    tx: mpsc::UnboundedSender<Inbound>,
}

#[derive(Default)]
struct Registry {
    routes: HashMap<(String, EventKind), Route>,
    next_token: u64,
}

#[derive(Clone, Default)]
struct SharedRegistry(Arc<Mutex<Registry>>);

impl SharedRegistry {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, session_id: &str, kinds: &[EventKind], tx: &mpsc::UnboundedSender<Inbound>) -> u64 {
        let mut registry = self.lock();
        registry.next_token += 1;
        let token = registry.next_token;
        for kind in kinds {
            let replaced = registry
                .routes
                .insert((session_id.to_owned(), *kind), Route { token, tx: tx.clone() });
            if replaced.is_some() {
                debug!(%session_id, ?kind, "transport: subscription replaced");
            }
        }
        token
    }

    fn remove(&self, session_id: &str, kind: EventKind, token: Option<u64>) {
        let mut registry = self.lock();
        let key = (session_id.to_owned(), kind);
        let matches = registry
            .routes
            .get(&key)
            .is_some_and(|route| token.is_none_or(|t| t == route.token));
        if matches {
            registry.routes.remove(&key);
        }
    }

    /// Deliver to the owning session, or to the newest subscriber when untagged.
    fn route(&self, session_id: Option<&str>, inbound: Inbound) -> bool {
        let Some(kind) = inbound.kind() else {
            return false;
        };
        let mut registry = self.lock();
        let key = match session_id {
            Some(id) => (id.to_owned(), kind),
            None => {
                let newest = registry
                    .routes
                    .iter()
                    .filter(|((_, k), _)| *k == kind)
                    .max_by_key(|(_, route)| route.token)
                    .map(|(key, _)| key.clone());
                let Some(key) = newest else {
                    return false;
                };
                key
            }
        };

        let Some(route) = registry.routes.get(&key) else {
            return false;
        };
        if route.tx.send(inbound).is_ok() {
            return true;
        }
        registry.routes.remove(&key);
        false
    }

    fn broadcast(&self, inbound: &Inbound) {
        let registry = self.lock();
        let mut seen = HashSet::new();
        for route in registry.routes.values() {
            if seen.insert(route.token) {
                let _ = route.tx.send(inbound.clone());
            }
        }
    }

    fn len(&self) -> usize {
        self.lock().routes.len()
    }
}

/// A session's view of inbound events. Dropping it unsubscribes.
pub struct Subscription {
    session_id: String,
    kinds: Vec<EventKind>,
    token: u64,
    rx: mpsc::UnboundedReceiver<Inbound>,
    registry: SharedRegistry,
}

impl Subscription {
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next event in arrival order. `None` once the subscription was replaced
    /// or removed and its queue is drained.
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`Self::recv`].
    pub fn try_recv(&mut self) -> Option<Inbound> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for kind in &self.kinds {
            self.registry.remove(&self.session_id, *kind, Some(self.token));
        }
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

struct Connection {
    outbound: mpsc::UnboundedSender<WsMessage>,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }

    fn shutdown(self) {
        self.alive.store(false, Ordering::SeqCst);
        self.reader.abort();
        // Dropping `outbound` lets the writer flush a close frame and exit.
        drop(self.outbound);
        drop(self.writer);
    }
}

struct Inner {
    config: ClientConfig,
    registry: SharedRegistry,
    connection: tokio::sync::Mutex<Option<Connection>>,
}

/// Cheaply cloneable handle to the single backend connection.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry: SharedRegistry::default(),
                connection: tokio::sync::Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Open the connection. No-op while already connected.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] or [`ClientError::Timeout`] when the
    /// socket cannot be opened, and [`ClientError::InvalidBaseUrl`] for a bad
    /// base URL.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut connection = self.inner.connection.lock().await;
        if connection.as_ref().is_some_and(Connection::is_alive) {
            return Ok(());
        }
        if let Some(stale) = connection.take() {
            stale.shutdown();
        }

        let url = self.inner.config.ws_url()?;
        let (stream, _) = tokio::time::timeout(self.inner.config.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| ClientError::Timeout("connecting"))??;

        let (sink, stream) = stream.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        let writer = tokio::spawn(write_loop(sink, outbound_rx));
        let reader = tokio::spawn(read_loop(stream, self.inner.registry.clone(), alive.clone()));

        info!(%url, "transport: connected");
        *connection = Some(Connection { outbound, alive, reader, writer });
        Ok(())
    }

    /// Close the connection. No-op while already disconnected.
    pub async fn disconnect(&self) {
        let Some(connection) = self.inner.connection.lock().await.take() else {
            return;
        };
        connection.shutdown();
        info!("transport: disconnected");
    }

    pub async fn is_connected(&self) -> bool {
        self.inner
            .connection
            .lock()
            .await
            .as_ref()
            .is_some_and(Connection::is_alive)
    }

    /// Register `session_id` for one event kind. Replaces any earlier
    /// registration of the same session and kind.
    #[must_use]
    pub fn subscribe(&self, session_id: &str, kind: EventKind) -> Subscription {
        self.subscribe_kinds(session_id, vec![kind])
    }

    /// Register `session_id` for both event kinds through one receiver.
    #[must_use]
    pub fn subscribe_all(&self, session_id: &str) -> Subscription {
        self.subscribe_kinds(session_id, vec![EventKind::Stream, EventKind::Message])
    }

    fn subscribe_kinds(&self, session_id: &str, kinds: Vec<EventKind>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = self.inner.registry.register(session_id, &kinds, &tx);
        debug!(%session_id, ?kinds, "transport: subscribed");
        Subscription { session_id: session_id.to_owned(), kinds, token, rx, registry: self.inner.registry.clone() }
    }

    /// Remove the registration for `session_id` and `kind`, whoever made it.
    pub fn unsubscribe(&self, session_id: &str, kind: EventKind) {
        self.inner.registry.remove(session_id, kind, None);
    }

    /// Route an event as if the reader task had decoded it.
    #[cfg(test)]
    pub(crate) fn deliver(&self, session_id: Option<&str>, inbound: Inbound) -> bool {
        self.inner.registry.route(session_id, inbound)
    }

    /// Number of live `(session, kind)` registrations.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Ask a bot something. Returns the request id servers echo as `parent_id`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::EmptyInput`] when `text` is blank; nothing is sent.
    /// - [`ClientError::FileRead`] when the attachment cannot be read; nothing is sent.
    /// - [`ClientError::Disconnected`] when there is no live connection.
    pub async fn send(
        &self,
        session_id: &str,
        bot_type: BotType,
        text: &str,
        file: Option<&Attachment>,
    ) -> Result<String, ClientError> {
        if text.trim().is_empty() {
            return Err(ClientError::EmptyInput);
        }
        self.ensure_connected().await?;

        let file = match file {
            Some(attachment) => Some(attachment.read().await?),
            None => None,
        };
        let file_size = file.as_ref().map_or(0, |f| f.data.len());
        let envelope = Envelope::from_payload(SendMessage { bot_type, message: text.to_owned(), file })?;
        info!(%session_id, %bot_type, text_len = text.len(), file_size, "transport: send_message");
        self.emit(session_id, envelope).await
    }

    /// Ask the Excel bot for analytics over one sheet.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Disconnected`] when there is no live connection.
    pub async fn send_excel_analytics(
        &self,
        session_id: &str,
        sheet_name: &str,
        analysis_type: &str,
    ) -> Result<String, ClientError> {
        let envelope = Envelope::from_payload(ExcelAnalytics {
            sheet_name: sheet_name.to_owned(),
            analysis_type: analysis_type.to_owned(),
        })?;
        info!(%session_id, %sheet_name, %analysis_type, "transport: excel_analytics");
        self.emit(session_id, envelope).await
    }

    /// Ask the Excel bot to apply cleaning operations to one sheet.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Disconnected`] when there is no live connection.
    pub async fn send_excel_cleaning(
        &self,
        session_id: &str,
        operations: &[String],
        sheet_name: &str,
    ) -> Result<String, ClientError> {
        let envelope = Envelope::from_payload(ExcelCleaning {
            operations: operations.to_vec(),
            sheet_name: sheet_name.to_owned(),
        })?;
        info!(%session_id, %sheet_name, operations = operations.len(), "transport: excel_cleaning");
        self.emit(session_id, envelope).await
    }

    /// Send whatever a session produced.
    ///
    /// # Errors
    ///
    /// Same as the specific send methods.
    pub async fn send_request(&self, session_id: &str, request: &Request) -> Result<String, ClientError> {
        match request {
            Request::Message { bot_type, text, file } => self.send(session_id, *bot_type, text, file.as_ref()).await,
            Request::Analytics { sheet_name, analysis_type } => {
                self.send_excel_analytics(session_id, sheet_name, analysis_type)
                    .await
            }
            Request::Cleaning { operations, sheet_name } => {
                self.send_excel_cleaning(session_id, operations, sheet_name)
                    .await
            }
        }
    }

    async fn ensure_connected(&self) -> Result<(), ClientError> {
        if self.is_connected().await { Ok(()) } else { Err(ClientError::Disconnected) }
    }

    async fn emit(&self, session_id: &str, envelope: Envelope) -> Result<String, ClientError> {
        let envelope = envelope.with_session_id(session_id);
        let request_id = envelope.id.clone();
        let bytes = wire::encode_envelope(&envelope);

        let connection = self.inner.connection.lock().await;
        let Some(connection) = connection.as_ref().filter(|c| c.is_alive()) else {
            return Err(ClientError::Disconnected);
        };
        connection
            .outbound
            .send(WsMessage::Binary(bytes.into()))
            .map_err(|_| ClientError::Disconnected)?;
        Ok(request_id)
    }
}

// =============================================================================
// SOCKET TASKS
// =============================================================================

async fn write_loop(mut sink: SplitSink<WsStream, WsMessage>, mut outbound: mpsc::UnboundedReceiver<WsMessage>) {
    while let Some(message) = outbound.recv().await {
        if let Err(e) = sink.send(message).await {
            warn!(error = %e, "transport: write failed");
            return;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(mut stream: SplitStream<WsStream>, registry: SharedRegistry, alive: Arc<AtomicBool>) {
    while let Some(message) = stream.next().await {
        let decoded = match message {
            Ok(WsMessage::Binary(bytes)) => wire::decode_envelope(&bytes),
            Ok(WsMessage::Text(text)) => wire::decode_json_envelope(text.as_str()),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "transport: read failed");
                break;
            }
        };
        dispatch(&registry, decoded);
    }

    if alive.swap(false, Ordering::SeqCst) {
        warn!("transport: connection lost");
        registry.broadcast(&Inbound::Disconnected);
    }
}

fn dispatch(registry: &SharedRegistry, decoded: Result<Envelope, CodecError>) {
    let envelope = match decoded {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "transport: invalid inbound envelope");
            return;
        }
    };
    let inbound = match Inbound::from_envelope(&envelope) {
        Ok(Some(inbound)) => inbound,
        Ok(None) => {
            debug!(event = %envelope.event, "transport: ignoring client-bound event");
            return;
        }
        Err(e) => {
            warn!(error = %e, event = %envelope.event, "transport: invalid payload");
            return;
        }
    };

    if !registry.route(envelope.session_id.as_deref(), inbound) {
        debug!(event = %envelope.event, session_id = ?envelope.session_id, "transport: no subscriber");
    }
}

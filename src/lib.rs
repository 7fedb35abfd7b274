//! Client core for a multi-bot chat backend.
//!
//! Five assistant bots (general, PDF, Excel, notebook, Q&A) share one
//! WebSocket connection. Each mounted bot view owns a [`Session`], a
//! synchronous reducer over its transcript, and talks to the backend through
//! the shared [`Transport`]. [`Conversation`] glues the two together.
//!
//! The non-streaming REST endpoints live in [`rest`]; persisted preferences
//! (theme, profile) live in [`store`].

pub mod config;
pub mod conversation;
pub mod error;
pub mod message;
pub mod rest;
pub mod session;
pub mod store;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::ClientConfig;
pub use conversation::Conversation;
pub use error::{ClientError, ErrorCode};
pub use message::{Attachment, Message, Role};
pub use rest::RestClient;
pub use session::{Change, Request, Session};
pub use store::{LocalStore, ParseThemeError, Theme, UserProfile};
pub use transport::{EventKind, Inbound, Subscription, Transport};
pub use wire::BotType;

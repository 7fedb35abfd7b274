//! Client error type.
//!
//! Every variant maps to a grepable code through [`ErrorCode`], which the
//! conversation layer uses when it turns a failure into a transcript entry.

use std::path::PathBuf;

/// Grepable error code and retryable flag.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("message is empty")]
    EmptyInput,
    #[error("failed to read attachment {name}: {source}")]
    FileRead {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("not connected")]
    Disconnected,
    #[error("websocket connect failed: {0}")]
    Connect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("timed out {0}")]
    Timeout(&'static str),
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("envelope codec failed: {0}")]
    Codec(#[from] wire::CodecError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned HTTP {status}: {message}")]
    Server { status: u16, message: String },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("local store {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connect(Box::new(error))
    }
}

impl ErrorCode for ClientError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyInput => "E_EMPTY_INPUT",
            Self::FileRead { .. } => "E_FILE_READ",
            Self::Disconnected => "E_DISCONNECTED",
            Self::Connect(_) => "E_CONNECT",
            Self::Timeout(_) => "E_TIMEOUT",
            Self::InvalidBaseUrl(_) => "E_INVALID_BASE_URL",
            Self::Codec(_) => "E_CODEC",
            Self::Http(_) => "E_HTTP",
            Self::Server { .. } => "E_SERVER",
            Self::Json(_) => "E_JSON",
            Self::Store { .. } => "E_STORE",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Disconnected | Self::Connect(_) | Self::Timeout(_) | Self::Http(_) => true,
            Self::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ClientError::EmptyInput.error_code(), "E_EMPTY_INPUT");
        assert_eq!(ClientError::Disconnected.error_code(), "E_DISCONNECTED");
        let read = ClientError::FileRead {
            name: "a.pdf".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(read.error_code(), "E_FILE_READ");
        assert!(read.to_string().starts_with("failed to read attachment a.pdf"));
    }

    #[test]
    fn transport_failures_are_retryable() {
        assert!(ClientError::Disconnected.retryable());
        assert!(ClientError::Timeout("waiting for response").retryable());
        assert!(!ClientError::EmptyInput.retryable());
        assert!(ClientError::Server { status: 502, message: String::new() }.retryable());
        assert!(!ClientError::Server { status: 400, message: String::new() }.retryable());
    }
}

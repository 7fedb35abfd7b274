//! Persisted local preferences.
//!
//! A flat JSON object of opaque key/value entries, read once at startup and
//! rewritten whenever an entry changes. There is no schema versioning; an
//! entry that no longer deserializes reads as absent.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ClientError;

pub const THEME_KEY: &str = "theme-mode";
pub const PROFILE_KEY: &str = "user-data";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }

    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown theme: {0}")]
pub struct ParseThemeError(pub String);

impl FromStr for Theme {
    type Err = ParseThemeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            _ => Err(ParseThemeError(s.to_owned())),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub chats: u64,
    #[serde(default)]
    pub files: u64,
    #[serde(default)]
    pub storage: String,
}

/// Account details shown in the UI chrome. Display only.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug)]
pub struct LocalStore {
    path: PathBuf,
    entries: Map<String, Value>,
}

impl LocalStore {
    /// Load the store at `path`. A missing file is an empty store; a corrupt
    /// one is logged and treated as empty.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Store`] when the file exists but cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => parse_entries(&path, &raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(source) => return Err(ClientError::Store { path, source }),
        };
        debug!(path = %path.display(), entries = entries.len(), "store: loaded");
        Ok(Self { path, entries })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.entries.get(key)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Store `value` under `key`, writing the file only when it changed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Json`] or [`ClientError::Store`].
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), ClientError> {
        let value = serde_json::to_value(value)?;
        if self.entries.get(key) == Some(&value) {
            return Ok(());
        }
        self.entries.insert(key.to_owned(), value);
        self.flush()
    }

    /// # Errors
    ///
    /// Returns [`ClientError::Store`] when the file cannot be written.
    pub fn remove(&mut self, key: &str) -> Result<(), ClientError> {
        if self.entries.remove(key).is_none() {
            return Ok(());
        }
        self.flush()
    }

    #[must_use]
    pub fn theme(&self) -> Theme {
        self.get(THEME_KEY).unwrap_or_default()
    }

    /// # Errors
    ///
    /// Returns [`ClientError::Store`] when the file cannot be written.
    pub fn set_theme(&mut self, theme: Theme) -> Result<(), ClientError> {
        self.set(THEME_KEY, &theme)
    }

    #[must_use]
    pub fn profile(&self) -> Option<UserProfile> {
        self.get(PROFILE_KEY)
    }

    /// # Errors
    ///
    /// Returns [`ClientError::Store`] when the file cannot be written.
    pub fn set_profile(&mut self, profile: &UserProfile) -> Result<(), ClientError> {
        self.set(PROFILE_KEY, profile)
    }

    fn flush(&self) -> Result<(), ClientError> {
        let raw = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, raw).map_err(|source| ClientError::Store { path: self.path.clone(), source })?;
        debug!(path = %self.path.display(), "store: written");
        Ok(())
    }
}

fn parse_entries(path: &Path, raw: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            warn!(path = %path.display(), "store: not a JSON object, starting empty");
            Map::new()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "store: unreadable, starting empty");
            Map::new()
        }
    }
}

//! Configuration change events broadcast to subscribers.
//!
//! Events carry key names and operations, never values: secret material
//! must not transit the bus, and non-secret values are one `get()` away.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Where a configuration change originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    /// An in-process runtime override (`set`/`clear`).
    Runtime,
    /// A direct persisted write (`set_db`).
    Database,
    /// A change observed on the store's change feed.
    Feed,
}

impl std::fmt::Display for ChangeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Runtime => write!(f, "runtime"),
            Self::Database => write!(f, "database"),
            Self::Feed => write!(f, "feed"),
        }
    }
}

/// Operation type for configuration changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOperation {
    /// A value was created or set.
    Set,
    /// A value was updated.
    Update,
    /// A runtime override was cleared.
    Clear,
    /// The database cache was reloaded wholesale.
    Reload,
}

impl std::fmt::Display for ConfigOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Set => write!(f, "set"),
            Self::Update => write!(f, "update"),
            Self::Clear => write!(f, "clear"),
            Self::Reload => write!(f, "reload"),
        }
    }
}

/// Event representing one configuration change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigChangeEvent {
    /// Source of the change.
    pub source: ChangeSource,
    /// The affected key; `None` for whole-cache operations.
    pub key: Option<String>,
    /// Operation type.
    pub operation: ConfigOperation,
    /// Timestamp of the change.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ConfigChangeEvent {
    /// Event for a specific key.
    pub fn with_key(
        source: ChangeSource,
        key: impl Into<String>,
        operation: ConfigOperation,
    ) -> Self {
        Self {
            source,
            key: Some(key.into()),
            operation,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Whole-cache event (reload, clear-all).
    pub fn broad(source: ChangeSource, operation: ConfigOperation) -> Self {
        Self {
            source,
            key: None,
            operation,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

//! The persisted configuration document.

use serde::{Deserialize, Serialize};
use strata_core::{ConfigKind, ConfigValue};
use time::OffsetDateTime;
use uuid::Uuid;

/// A persisted configuration entry, one per key.
///
/// The store enforces at most one document per `key`; writes go through
/// upsert-by-key. For `kind == Secret` the `value` is a secret-store
/// reference string, never the secret material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    /// Backend-assigned identifier.
    pub id: Uuid,
    /// Unique configuration key.
    pub key: String,
    /// The stored value, decoded against `kind` at the read boundary.
    pub value: ConfigValue,
    /// Declared type of the entry.
    pub kind: ConfigKind,
    /// Free-text documentation.
    pub description: Option<String>,
    /// Last write timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ConfigDocument {
    /// Build a new document with a fresh id and the current timestamp.
    pub fn new(
        key: impl Into<String>,
        value: ConfigValue,
        kind: ConfigKind,
        description: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            value,
            kind,
            description,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    /// Whether this entry holds a secret reference.
    pub fn is_secret(&self) -> bool {
        self.kind == ConfigKind::Secret
    }

    /// The secret-store reference, if this is a secret entry.
    pub fn secret_reference(&self) -> Option<&str> {
        if self.is_secret() {
            self.value.as_str()
        } else {
            None
        }
    }
}

//! Change-feed event types.

use serde::{Deserialize, Serialize};

use crate::document::ConfigDocument;

/// Kind of change observed on the configuration collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    /// A document was created.
    Insert,
    /// A document was partially updated.
    Update,
    /// A document was replaced wholesale.
    Replace,
    /// A document was deleted.
    Delete,
}

impl std::fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Replace => write!(f, "replace"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A single change-feed event.
///
/// Insert/update/replace events carry the document's full post-image.
/// Delete events carry no document: the feed does not reliably know the
/// deleted key, and consumers recover with a full reload instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened.
    pub operation: ChangeOperation,
    /// Full state of the affected document after the change.
    pub document: Option<ConfigDocument>,
}

impl ChangeEvent {
    /// Event for a freshly created document.
    pub fn insert(document: ConfigDocument) -> Self {
        Self {
            operation: ChangeOperation::Insert,
            document: Some(document),
        }
    }

    /// Event for an updated document.
    pub fn update(document: ConfigDocument) -> Self {
        Self {
            operation: ChangeOperation::Update,
            document: Some(document),
        }
    }

    /// Event for a replaced document.
    pub fn replace(document: ConfigDocument) -> Self {
        Self {
            operation: ChangeOperation::Replace,
            document: Some(document),
        }
    }

    /// Event for a deletion.
    pub fn delete() -> Self {
        Self {
            operation: ChangeOperation::Delete,
            document: None,
        }
    }
}

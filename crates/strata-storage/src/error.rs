//! Storage error types for configuration store backends.

/// Errors that can occur during configuration store operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend cannot provide the requested capability
    /// (a change feed on a backend without one, typically).
    #[error("Unsupported capability: {message}")]
    Unsupported {
        /// Description of the missing capability.
        message: String,
    },

    /// Failed to reach the storage backend.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// A stored document could not be decoded.
    #[error("Decode error for key '{key}': {message}")]
    Decode {
        /// The key whose document failed to decode.
        key: String,
        /// Description of the decode failure.
        message: String,
    },

    /// An internal backend error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StorageError {
    /// Creates a new `Unsupported` error.
    #[must_use]
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a new `Decode` error.
    #[must_use]
    pub fn decode(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this error reports a missing capability rather
    /// than a transient failure. Missing capabilities are terminal for a
    /// watching session; transient failures are retried.
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

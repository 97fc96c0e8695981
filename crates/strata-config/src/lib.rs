//! Layered runtime configuration engine for Strata
//!
//! This crate provides the process-wide configuration registry that:
//! - Merges value sources with defined priority (runtime override >
//!   resolved secret > database cache > environment variable > default)
//! - Mirrors the persisted configuration collection in memory and keeps
//!   the mirror current through the store's change feed
//! - Resolves secret-store references to plaintext through an external
//!   secret manager, with an in-memory resolved-secrets cache
//! - Broadcasts configuration changes to subscribers
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       Configuration                            │
//! │  ┌────────────┐ ┌────────────┐ ┌──────────┐ ┌──────────────┐  │
//! │  │ registry   │ │ overrides  │ │ db cache │ │ secret cache │  │
//! │  └────────────┘ └────────────┘ └────▲─────┘ └──────▲───────┘  │
//! │                                     │              │          │
//! │                              ┌──────┴──────┐ ┌─────┴───────┐  │
//! │                              │ feed        │ │ secret      │  │
//! │                              │ listener    │ │ resolver    │  │
//! │                              └──────▲──────┘ └─────▲───────┘  │
//! └─────────────────────────────────────┼──────────────┼──────────┘
//!                                       │              │
//!                              ConfigStore         SecretManager
//! ```
//!
//! Reads (`get`) are synchronous and answer purely from in-memory
//! state. Writes through `set_db` round-trip through the change feed
//! before they become visible to readers; callers needing
//! read-after-write semantics use the runtime-override path.

mod definition;
mod events;
mod registry;
mod secrets;
mod watcher;

pub use definition::{ConfigDefinition, Validator};
pub use events::{ChangeSource, ConfigChangeEvent, ConfigOperation};
pub use registry::{Configuration, ConfigurationBuilder};
pub use secrets::{MapSecretManager, SecretError, SecretManager, qualified_resource};

// Re-export the value model; every caller needs it.
pub use strata_core::{ConfigKind, ConfigValue};

/// Error types for configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration is already initialized; call shutdown() first")]
    AlreadyInitialized,

    #[error("Configuration requires a store")]
    MissingStore,

    #[error("Secret error: {0}")]
    Secret(String),

    #[error("Storage error: {0}")]
    Storage(#[from] strata_storage::StorageError),
}

impl ConfigError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn secret(msg: impl Into<String>) -> Self {
        Self::Secret(msg.into())
    }
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

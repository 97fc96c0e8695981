//! The configuration store trait.

use async_trait::async_trait;
use strata_core::{ConfigKind, ConfigValue};
use tokio::sync::mpsc;

use crate::document::ConfigDocument;
use crate::error::StorageError;
use crate::events::ChangeEvent;

/// Contract for configuration store backends.
///
/// Implementations must be thread-safe (`Send + Sync`). The engine
/// consumes this trait behind `Arc<dyn ConfigStore>`.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Loads every persisted configuration document.
    async fn find_all(&self) -> Result<Vec<ConfigDocument>, StorageError>;

    /// Looks up a single document by key.
    ///
    /// Returns `None` if no document exists for the key; errors are
    /// reserved for infrastructure failures.
    async fn find_one(&self, key: &str) -> Result<Option<ConfigDocument>, StorageError>;

    /// Update-if-exists-else-create for the given key.
    ///
    /// The backend enforces at most one document per key. `kind` is the
    /// declared type to record on create; an existing document keeps its
    /// identity and gets the new value, kind, and description.
    async fn upsert(
        &self,
        key: &str,
        value: ConfigValue,
        kind: ConfigKind,
        description: Option<&str>,
    ) -> Result<ConfigDocument, StorageError>;

    /// Whether this backend can produce a live change feed.
    ///
    /// Callers probe this before [`watch`](Self::watch) instead of
    /// inferring capability from a failed subscription.
    fn supports_change_feed(&self) -> bool;

    /// Start a change-feed producer pushing events into `tx`.
    ///
    /// The producer runs until stopped via the returned handle or until
    /// it hits an unrecoverable error, in which case it drops `tx` and
    /// exits; consumers observe the closed channel and decide whether to
    /// re-subscribe.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unsupported`] when the backend has no
    /// change feed.
    async fn watch(&self, tx: mpsc::Sender<ChangeEvent>) -> Result<FeedHandle, StorageError>;

    /// Name of this backend for logging and debugging.
    fn backend_name(&self) -> &'static str;
}

/// Handle for a running change-feed producer.
pub struct FeedHandle {
    handle: tokio::task::JoinHandle<()>,
    shutdown: tokio::sync::oneshot::Sender<()>,
}

impl FeedHandle {
    /// Create a new feed handle.
    pub fn new(
        handle: tokio::task::JoinHandle<()>,
        shutdown: tokio::sync::oneshot::Sender<()>,
    ) -> Self {
        Self { handle, shutdown }
    }

    /// Stop the producer and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

impl std::fmt::Debug for FeedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedHandle")
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

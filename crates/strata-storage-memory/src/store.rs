//! The in-memory store implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use strata_core::{ConfigKind, ConfigValue};
use strata_storage::{ChangeEvent, ConfigDocument, ConfigStore, FeedHandle, StorageError};
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

/// Buffer size for the internal broadcast feed. Watchers slower than
/// this many events fall behind and miss the skipped events.
const FEED_BUFFER_SIZE: usize = 1024;

/// In-memory configuration store.
///
/// Key uniqueness is the map key itself; writes are upserts. Every
/// successful mutation is published on the internal feed after the map
/// is updated, so events only describe changes that actually landed.
#[derive(Debug)]
pub struct MemoryConfigStore {
    docs: DashMap<String, ConfigDocument>,
    feed: broadcast::Sender<ChangeEvent>,
    change_feed_enabled: bool,
}

impl MemoryConfigStore {
    /// Creates a store with a live change feed.
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_BUFFER_SIZE);
        Self {
            docs: DashMap::new(),
            feed,
            change_feed_enabled: true,
        }
    }

    /// Creates a store whose change feed is structurally unavailable.
    ///
    /// Models a single-node deployment that cannot serve a feed;
    /// consumers degrade to their last loaded snapshot.
    pub fn without_change_feed() -> Self {
        let (feed, _) = broadcast::channel(FEED_BUFFER_SIZE);
        Self {
            docs: DashMap::new(),
            feed,
            change_feed_enabled: false,
        }
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Whether the store holds no documents.
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Deletes a document by key.
    ///
    /// The configuration engine never deletes; this exists so tests and
    /// operator tooling can exercise external-deletion recovery. Returns
    /// whether a document was removed.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.docs.remove(key).is_some();
        if removed {
            self.publish(ChangeEvent::delete());
        }
        removed
    }

    fn publish(&self, event: ChangeEvent) {
        if !self.change_feed_enabled {
            return;
        }
        // No receivers is fine; events before the first watcher are simply unobserved.
        let _ = self.feed.send(event);
    }
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn find_all(&self) -> Result<Vec<ConfigDocument>, StorageError> {
        let mut docs: Vec<ConfigDocument> =
            self.docs.iter().map(|entry| entry.value().clone()).collect();
        docs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(docs)
    }

    async fn find_one(&self, key: &str) -> Result<Option<ConfigDocument>, StorageError> {
        Ok(self.docs.get(key).map(|entry| entry.value().clone()))
    }

    async fn upsert(
        &self,
        key: &str,
        value: ConfigValue,
        kind: ConfigKind,
        description: Option<&str>,
    ) -> Result<ConfigDocument, StorageError> {
        use dashmap::mapref::entry::Entry;

        let (doc, created) = match self.docs.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                // Overwrite in place so the document keeps its identity.
                let existing = occupied.get_mut();
                existing.value = value;
                existing.kind = kind;
                existing.description = description.map(String::from);
                existing.updated_at = OffsetDateTime::now_utc();
                (existing.clone(), false)
            }
            Entry::Vacant(vacant) => {
                let doc = ConfigDocument {
                    id: Uuid::new_v4(),
                    key: key.to_string(),
                    value,
                    kind,
                    description: description.map(String::from),
                    updated_at: OffsetDateTime::now_utc(),
                };
                vacant.insert(doc.clone());
                (doc, true)
            }
        };

        let event = if created {
            ChangeEvent::insert(doc.clone())
        } else {
            ChangeEvent::update(doc.clone())
        };
        debug!(key, operation = %event.operation, "memory store upsert");
        self.publish(event);

        Ok(doc)
    }

    fn supports_change_feed(&self) -> bool {
        self.change_feed_enabled
    }

    async fn watch(&self, tx: mpsc::Sender<ChangeEvent>) -> Result<FeedHandle, StorageError> {
        if !self.change_feed_enabled {
            return Err(StorageError::unsupported(
                "memory store change feed is disabled",
            ));
        }

        // Subscribe before spawning so no event between watch() and the
        // task starting is lost.
        let mut rx = self.feed.subscribe();
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        debug!("memory store feed producer shutting down");
                        return;
                    }
                    event = rx.recv() => match event {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                debug!("change feed consumer dropped");
                                return;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "change feed consumer lagged; events skipped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        });

        Ok(FeedHandle::new(handle, shutdown_tx))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

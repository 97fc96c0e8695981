//! Change propagation from the store's feed into the caches.
//!
//! The watcher is a single consumer task fed by the store's change-feed
//! producer. Per-event failures are logged and absorbed; a dead feed is
//! re-subscribed after a fixed delay; a store that structurally cannot
//! provide a feed leaves the registry serving its last loaded snapshot.

use std::time::Duration;

use strata_storage::{ChangeEvent, ChangeOperation};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::events::{ChangeSource, ConfigChangeEvent, ConfigOperation};
use crate::registry::Configuration;

/// Delay before re-subscribing after the feed drops.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Buffer size for the feed consumer channel.
const FEED_CHANNEL_CAPACITY: usize = 100;

/// Handle for the running feed consumer.
pub(crate) struct ActiveWatch {
    task: tokio::task::JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

impl ActiveWatch {
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!("configuration watcher ended abnormally: {e}");
        }
    }
}

impl Configuration {
    /// Starts watching the store's change feed.
    ///
    /// Probes the store's capability first: a store without a change
    /// feed leaves the registry degraded, serving the last loaded
    /// snapshot, and this is reported as `Ok(false)` rather than an
    /// error. Idempotent while a watcher is active.
    pub async fn start_watching(&self) -> Result<bool> {
        if !self.inner.store.supports_change_feed() {
            info!(
                backend = self.inner.store.backend_name(),
                "change feed unavailable; cache will not receive live updates"
            );
            return Ok(false);
        }
        if self.inner.watch.lock().expect("watch lock poisoned").is_some() {
            return Ok(true);
        }

        // First subscription happens here so structural unavailability
        // is reported to the caller; resubscription after a feed drop
        // is handled inside the loop.
        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let feed = match self.inner.store.watch(tx).await {
            Ok(feed) => feed,
            Err(e) if e.is_unsupported() => {
                info!("change feed unavailable; serving last loaded snapshot: {e}");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            backend = self.inner.store.backend_name(),
            "watching configuration changes"
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(watch_loop(self.clone(), Some((feed, rx)), shutdown_rx));
        let mut guard = self.inner.watch.lock().expect("watch lock poisoned");
        *guard = Some(ActiveWatch {
            task,
            shutdown: shutdown_tx,
        });
        drop(guard);

        Ok(true)
    }

    /// Stops the active watcher, if any. Idempotent; close failures are
    /// logged, not returned.
    pub async fn stop_watching(&self) {
        let active = self.inner.watch.lock().expect("watch lock poisoned").take();
        if let Some(active) = active {
            active.stop().await;
            debug!("configuration watcher stopped");
        }
    }

    /// Applies one feed event to the caches.
    pub(crate) async fn apply_change(&self, event: ChangeEvent) -> Result<()> {
        match event.operation {
            ChangeOperation::Insert | ChangeOperation::Update | ChangeOperation::Replace => {
                let Some(doc) = event.document else {
                    // No post-image supplied; a reload reconciles it.
                    self.load_from_db().await?;
                    self.emit(ConfigChangeEvent::broad(
                        ChangeSource::Feed,
                        ConfigOperation::Reload,
                    ));
                    return Ok(());
                };

                let is_secret = doc.is_secret();
                let key = doc.key.clone();
                self.inner.db_cache.insert(doc.key, doc.value);
                debug!(key = %key, operation = %event.operation, "database cache updated from feed");

                if is_secret {
                    // Resolution must not block cache propagation.
                    let registry = self.clone();
                    let secret_key = key.clone();
                    tokio::spawn(async move {
                        if let Err(e) = registry.refresh_secret(&secret_key).await {
                            warn!(key = %secret_key, "failed to refresh secret after change: {e}");
                        }
                    });
                }

                let operation = if event.operation == ChangeOperation::Insert {
                    ConfigOperation::Set
                } else {
                    ConfigOperation::Update
                };
                self.emit(ConfigChangeEvent::with_key(ChangeSource::Feed, key, operation));
            }
            ChangeOperation::Delete => {
                // Deletion events carry no key; rebuild the whole cache.
                self.load_from_db().await?;
                self.emit(ConfigChangeEvent::broad(
                    ChangeSource::Feed,
                    ConfigOperation::Reload,
                ));
            }
        }
        Ok(())
    }

    fn clear_watch_slot(&self) {
        self.inner.watch.lock().expect("watch lock poisoned").take();
    }
}

async fn watch_loop(
    registry: Configuration,
    mut active: Option<(strata_storage::FeedHandle, mpsc::Receiver<ChangeEvent>)>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let (feed, mut rx) = match active.take() {
            // First subscription, established by start_watching.
            Some(pair) => pair,
            None => {
                let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
                match registry.inner.store.watch(tx).await {
                    Ok(feed) => {
                        info!(
                            backend = registry.inner.store.backend_name(),
                            "watching configuration changes"
                        );
                        (feed, rx)
                    }
                    Err(e) if e.is_unsupported() => {
                        // Structural, not transient; stay on the snapshot.
                        info!("change feed unavailable; serving last loaded snapshot: {e}");
                        registry.clear_watch_slot();
                        return;
                    }
                    Err(e) => {
                        error!("failed to resubscribe to change feed: {e}");
                        if !sleep_or_shutdown(&mut shutdown).await {
                            return;
                        }
                        continue;
                    }
                }
            }
        };

        let stopping = loop {
            tokio::select! {
                _ = &mut shutdown => break true,
                event = rx.recv() => match event {
                    Some(event) => {
                        if let Err(e) = registry.apply_change(event).await {
                            warn!("failed to apply configuration change: {e}");
                        }
                    }
                    None => {
                        warn!(
                            "change feed interrupted; resubscribing in {}s",
                            RECONNECT_DELAY.as_secs()
                        );
                        break false;
                    }
                }
            }
        };

        feed.stop().await;
        if stopping {
            return;
        }
        if !sleep_or_shutdown(&mut shutdown).await {
            return;
        }
    }
}

/// Waits out the reconnect delay; returns `false` when shutdown wins.
async fn sleep_or_shutdown(shutdown: &mut oneshot::Receiver<()>) -> bool {
    tokio::select! {
        _ = &mut *shutdown => false,
        _ = tokio::time::sleep(RECONNECT_DELAY) => true,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use strata_core::{ConfigKind, ConfigValue};
    use strata_storage::ConfigStore;
    use strata_storage_memory::MemoryConfigStore;

    use crate::definition::ConfigDefinition;
    use crate::registry::Configuration;
    use crate::secrets::MapSecretManager;

    /// Give the feed a tick to round-trip.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    fn registry_over(store: Arc<MemoryConfigStore>) -> Configuration {
        Configuration::builder()
            .with_store(store)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_db_converges_through_feed() {
        let store = Arc::new(MemoryConfigStore::new());
        let config = registry_over(store.clone());

        let watching = config.initialize().await.unwrap();
        assert!(watching);

        config.set_db("KEY", "v1").await.unwrap();
        settle().await;
        assert_eq!(config.get("KEY"), Some(ConfigValue::from("v1")));

        config.shutdown().await;
    }

    #[tokio::test]
    async fn test_external_write_converges() {
        let store = Arc::new(MemoryConfigStore::new());
        let config = registry_over(store.clone());
        config.initialize().await.unwrap();

        store
            .upsert("EXTERNAL", ConfigValue::from(42i64), ConfigKind::Number, None)
            .await
            .unwrap();
        settle().await;
        assert_eq!(config.get_number("EXTERNAL"), Some(42.0));

        config.shutdown().await;
    }

    #[tokio::test]
    async fn test_external_delete_triggers_reload() {
        let store = Arc::new(MemoryConfigStore::new());
        store
            .upsert("A", ConfigValue::from("a"), ConfigKind::String, None)
            .await
            .unwrap();
        store
            .upsert("B", ConfigValue::from("b"), ConfigKind::String, None)
            .await
            .unwrap();

        let config = registry_over(store.clone());
        config.initialize().await.unwrap();
        assert_eq!(config.get_string("A"), Some("a".to_string()));

        store.delete("A");
        settle().await;
        assert_eq!(config.get("A"), None);
        assert_eq!(config.get_string("B"), Some("b".to_string()));

        config.shutdown().await;
    }

    #[tokio::test]
    async fn test_degraded_store_serves_snapshot() {
        let store = Arc::new(MemoryConfigStore::without_change_feed());
        store
            .upsert("KEY", ConfigValue::from("loaded"), ConfigKind::String, None)
            .await
            .unwrap();

        let config = registry_over(store.clone());
        let watching = config.initialize().await.unwrap();
        assert!(!watching);

        // Snapshot is served even though nothing is watching.
        assert_eq!(config.get_string("KEY"), Some("loaded".to_string()));

        // Later external writes never arrive.
        store
            .upsert("KEY", ConfigValue::from("changed"), ConfigKind::String, None)
            .await
            .unwrap();
        settle().await;
        assert_eq!(config.get_string("KEY"), Some("loaded".to_string()));

        config.shutdown().await;
    }

    #[tokio::test]
    async fn test_secret_change_refreshes_plaintext() {
        let store = Arc::new(MemoryConfigStore::new());
        let secrets = Arc::new(MapSecretManager::new());
        secrets.insert(
            "projects/acme/secrets/api-token/versions/latest",
            b"token-1".to_vec(),
        );

        let config = Configuration::builder()
            .with_store(store.clone())
            .with_secret_manager(secrets.clone())
            .build()
            .unwrap();
        config.register("API_TOKEN", ConfigDefinition::new(ConfigKind::Secret));
        config.initialize().await.unwrap();

        config
            .set_db("API_TOKEN", "projects/acme/secrets/api-token/versions/latest")
            .await
            .unwrap();
        settle().await;
        assert_eq!(config.get_string("API_TOKEN"), Some("token-1".to_string()));

        // Rotate the material and replay the change.
        secrets.insert(
            "projects/acme/secrets/api-token/versions/latest",
            b"token-2".to_vec(),
        );
        config
            .set_db("API_TOKEN", "projects/acme/secrets/api-token/versions/latest")
            .await
            .unwrap();
        settle().await;
        assert_eq!(config.get_string("API_TOKEN"), Some("token-2".to_string()));

        config.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_watching_idempotent_and_restartable() {
        let store = Arc::new(MemoryConfigStore::new());
        let config = registry_over(store.clone());
        config.initialize().await.unwrap();

        config.stop_watching().await;
        config.stop_watching().await;

        // Watching can resume within the same session.
        assert!(config.start_watching().await.unwrap());
        config.set_db("AFTER_RESTART", "v").await.unwrap();
        settle().await;
        assert_eq!(
            config.get_string("AFTER_RESTART"),
            Some("v".to_string())
        );

        config.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_watching_twice_is_guarded() {
        let store = Arc::new(MemoryConfigStore::new());
        let config = registry_over(store.clone());
        config.initialize().await.unwrap();

        assert!(config.start_watching().await.unwrap());
        assert!(config.start_watching().await.unwrap());

        config.shutdown().await;
    }
}

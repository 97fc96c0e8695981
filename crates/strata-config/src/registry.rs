//! The runtime configuration registry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use futures_util::future::join_all;
use strata_core::{ConfigKind, ConfigValue};
use strata_storage::{ConfigDocument, ConfigStore};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::definition::ConfigDefinition;
use crate::events::{ChangeSource, ConfigChangeEvent, ConfigOperation};
use crate::secrets::{SecretManager, qualified_resource};
use crate::watcher::ActiveWatch;
use crate::{ConfigError, Result};

/// Placeholder substituted for secret values in debug dumps.
const REDACTED: &str = "<secret>";

/// Buffer size for the change-event bus.
const EVENT_BUS_CAPACITY: usize = 100;

/// Configuration registry builder
pub struct ConfigurationBuilder {
    store: Option<Arc<dyn ConfigStore>>,
    secrets: Option<Arc<dyn SecretManager>>,
    secret_project: Option<String>,
}

impl ConfigurationBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            store: None,
            secrets: None,
            secret_project: None,
        }
    }

    /// Set the value store backing the registry
    pub fn with_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the secret manager used to resolve secret references
    pub fn with_secret_manager(mut self, secrets: Arc<dyn SecretManager>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Set the project identifier short secret names resolve against
    pub fn with_secret_project(mut self, project: impl Into<String>) -> Self {
        self.secret_project = Some(project.into());
        self
    }

    /// Build the registry
    pub fn build(self) -> Result<Configuration> {
        let store = self.store.ok_or(ConfigError::MissingStore)?;
        let (event_bus, _) = broadcast::channel(EVENT_BUS_CAPACITY);

        Ok(Configuration {
            inner: Arc::new(Inner {
                store,
                secrets: self.secrets,
                secret_project: self.secret_project,
                registry: DashMap::new(),
                overrides: DashMap::new(),
                db_cache: DashMap::new(),
                secret_cache: DashMap::new(),
                watch: std::sync::Mutex::new(None),
                initialized: AtomicBool::new(false),
                event_bus,
            }),
        })
    }
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The runtime configuration registry.
///
/// One instance per process component tree; handles are cheap clones
/// over shared state, so the registry can be injected wherever values
/// are read. `get` resolves synchronously from memory through the
/// priority chain: runtime override > resolved secret > database cache
/// > environment variable > static default > caller fallback.
#[derive(Clone)]
pub struct Configuration {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) store: Arc<dyn ConfigStore>,
    pub(crate) secrets: Option<Arc<dyn SecretManager>>,
    secret_project: Option<String>,
    registry: DashMap<String, ConfigDefinition>,
    overrides: DashMap<String, ConfigValue>,
    pub(crate) db_cache: DashMap<String, ConfigValue>,
    secret_cache: DashMap<String, String>,
    pub(crate) watch: std::sync::Mutex<Option<ActiveWatch>>,
    initialized: AtomicBool,
    event_bus: broadcast::Sender<ConfigChangeEvent>,
}

impl Configuration {
    /// Create a new builder
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::new()
    }

    // ==================== Registration ====================

    /// Registers (or overwrites) the definition for a key.
    ///
    /// The definition itself is not validated; it only changes how
    /// future `get` calls for this key resolve environment and default
    /// fallbacks.
    pub fn register(&self, key: impl Into<String>, definition: ConfigDefinition) {
        self.inner.registry.insert(key.into(), definition);
    }

    // ==================== Reads ====================

    /// Resolves a value through the priority chain.
    ///
    /// Never blocks on I/O and never fails; a key that resolves nowhere
    /// yields `None`. Keys without a registered definition consult the
    /// process environment under the key's own name, as a string.
    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        if let Some(value) = self.inner.overrides.get(key) {
            return Some(value.clone());
        }
        if let Some(plaintext) = self.inner.secret_cache.get(key) {
            return Some(ConfigValue::String(plaintext.clone()));
        }
        if let Some(value) = self.inner.db_cache.get(key) {
            return Some(value.clone());
        }

        match self.inner.registry.get(key) {
            Some(def) => {
                if let Some(env_var) = def.env_var()
                    && let Ok(raw) = std::env::var(env_var)
                {
                    match ConfigValue::coerce_from_str(def.kind(), &raw) {
                        Some(value) if def.accepts(&value) => return Some(value),
                        Some(_) => {
                            warn!(key, env_var, "environment value failed validation; using default");
                        }
                        None => {
                            warn!(key, env_var, "environment value failed conversion; using default");
                        }
                    }
                }
                def.default().cloned()
            }
            None => std::env::var(key).ok().map(ConfigValue::String),
        }
    }

    /// Resolves a value, falling back to `fallback` when nothing else
    /// supplies one.
    pub fn get_or(&self, key: &str, fallback: impl Into<ConfigValue>) -> ConfigValue {
        self.get(key).unwrap_or_else(|| fallback.into())
    }

    /// String accessor; `None` when the key resolves to nothing or to a
    /// non-string value.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(String::from))
    }

    /// Numeric accessor.
    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_number())
    }

    /// Boolean accessor.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    // ==================== Writes ====================

    /// Sets an in-process runtime override, the highest-priority source.
    ///
    /// Validates against the registered validator first; a rejected
    /// value leaves any previous override untouched. The override is
    /// visible to `get` immediately and is never persisted.
    pub fn set(&self, key: &str, value: impl Into<ConfigValue>) -> Result<()> {
        let value = value.into();
        self.validate(key, &value)?;
        self.inner.overrides.insert(key.to_string(), value);
        self.emit(ConfigChangeEvent::with_key(
            ChangeSource::Runtime,
            key,
            ConfigOperation::Set,
        ));
        Ok(())
    }

    /// Sets a runtime override and additionally persists the value in
    /// the background.
    ///
    /// The persistence write is fire-and-forget: it is only attempted
    /// once the registry is initialized, and a failure is logged, never
    /// surfaced to the caller. The cache round-trips through the change
    /// feed rather than being written directly.
    pub fn set_and_persist(&self, key: &str, value: impl Into<ConfigValue>) -> Result<()> {
        let value = value.into();
        self.validate(key, &value)?;
        self.inner.overrides.insert(key.to_string(), value.clone());
        self.emit(ConfigChangeEvent::with_key(
            ChangeSource::Runtime,
            key,
            ConfigOperation::Set,
        ));

        if self.is_initialized() {
            let registry = self.clone();
            let key = key.to_string();
            tokio::spawn(async move {
                if let Err(e) = registry.persist(&key, value).await {
                    warn!(key = %key, "background configuration write failed: {e}");
                }
            });
        } else {
            debug!(key, "registry not initialized; override set without persistence");
        }
        Ok(())
    }

    /// Persists a value to the store by upsert, without touching the
    /// database cache.
    ///
    /// The cache update arrives through the change feed, so a `get`
    /// immediately after `set_db` may still observe the previous value;
    /// callers needing read-after-write semantics combine this with
    /// [`set`](Self::set).
    pub async fn set_db(&self, key: &str, value: impl Into<ConfigValue>) -> Result<ConfigDocument> {
        let value = value.into();
        self.validate(key, &value)?;
        let doc = self.persist(key, value).await?;
        self.emit(ConfigChangeEvent::with_key(
            ChangeSource::Database,
            key,
            ConfigOperation::Set,
        ));
        Ok(doc)
    }

    /// Removes one runtime override; a no-op for unset keys.
    pub fn clear(&self, key: &str) {
        if self.inner.overrides.remove(key).is_some() {
            self.emit(ConfigChangeEvent::with_key(
                ChangeSource::Runtime,
                key,
                ConfigOperation::Clear,
            ));
        }
    }

    /// Removes all runtime overrides.
    pub fn clear_all(&self) {
        self.inner.overrides.clear();
        self.emit(ConfigChangeEvent::broad(
            ChangeSource::Runtime,
            ConfigOperation::Clear,
        ));
    }

    fn validate(&self, key: &str, value: &ConfigValue) -> Result<()> {
        if let Some(def) = self.inner.registry.get(key)
            && !def.accepts(value)
        {
            return Err(ConfigError::validation(format!(
                "value for '{key}' rejected by validator"
            )));
        }
        Ok(())
    }

    async fn persist(&self, key: &str, value: ConfigValue) -> Result<ConfigDocument> {
        let (kind, description) = match self.inner.registry.get(key) {
            Some(def) => (def.kind(), def.description().map(String::from)),
            None => (value.implied_kind(), None),
        };
        let doc = self
            .inner
            .store
            .upsert(key, value, kind, description.as_deref())
            .await?;
        Ok(doc)
    }

    // ==================== Introspection ====================

    /// Registered key names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .registry
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// The registered definition for a key, if any.
    pub fn definition(&self, key: &str) -> Option<ConfigDefinition> {
        self.inner.registry.get(key).map(|entry| entry.value().clone())
    }

    /// Effective values for every known key (registered, overridden, or
    /// cached), resolved through the priority chain.
    ///
    /// Secret values are replaced with a placeholder; this dump is safe
    /// to log.
    pub fn all(&self) -> BTreeMap<String, ConfigValue> {
        let mut keys: Vec<String> = self
            .inner
            .registry
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.extend(self.inner.overrides.iter().map(|e| e.key().clone()));
        keys.extend(self.inner.db_cache.iter().map(|e| e.key().clone()));
        keys.sort();
        keys.dedup();

        keys.into_iter()
            .filter_map(|key| {
                let value = if self.is_secret_key(&key) {
                    Some(ConfigValue::String(REDACTED.to_string()))
                } else {
                    self.get(&key)
                };
                value.map(|v| (key, v))
            })
            .collect()
    }

    /// Snapshot of the database cache as stored.
    ///
    /// Secret entries hold store references, never resolved plaintext.
    pub fn db_cache_snapshot(&self) -> BTreeMap<String, ConfigValue> {
        self.inner
            .db_cache
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Names of keys with resolved secrets, sorted. Never exposes the
    /// secret values themselves.
    pub fn secret_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .secret_cache
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Whether [`initialize`](Self::initialize) has completed without a
    /// subsequent shutdown.
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    fn is_secret_key(&self, key: &str) -> bool {
        self.inner.secret_cache.contains_key(key)
            || self
                .inner
                .registry
                .get(key)
                .is_some_and(|def| def.kind() == ConfigKind::Secret)
    }

    // ==================== Secrets ====================

    /// Resolves a secret reference to its plaintext.
    ///
    /// Accepts either a fully qualified resource path or a short name,
    /// which is qualified against the configured project identifier.
    /// The payload is decoded as UTF-8 text.
    pub async fn fetch_secret(&self, reference: &str) -> Result<String> {
        let manager = self
            .inner
            .secrets
            .as_ref()
            .ok_or_else(|| ConfigError::secret("no secret manager configured"))?;

        let resource = if reference.contains('/') {
            reference.to_string()
        } else {
            match &self.inner.secret_project {
                Some(project) => qualified_resource(project, reference),
                None => {
                    return Err(ConfigError::secret(format!(
                        "short secret name '{reference}' requires a configured project"
                    )));
                }
            }
        };

        let payload = manager
            .access_secret(&resource)
            .await
            .map_err(|e| ConfigError::secret(e.to_string()))?;

        String::from_utf8(payload)
            .map_err(|e| ConfigError::secret(format!("secret payload is not UTF-8: {e}")))
    }

    /// Bulk-resolves every persisted secret entry into the secrets
    /// cache.
    ///
    /// Resolution is best-effort and parallel: one failing secret is
    /// logged and skipped without aborting the rest. Returns the number
    /// of secrets resolved.
    pub async fn load_secrets(&self) -> Result<usize> {
        let docs = self.inner.store.find_all().await?;
        let secret_docs: Vec<ConfigDocument> =
            docs.into_iter().filter(|doc| doc.is_secret()).collect();
        if secret_docs.is_empty() {
            return Ok(0);
        }
        if self.inner.secrets.is_none() {
            warn!(
                count = secret_docs.len(),
                "secret entries present but no secret manager configured"
            );
            return Ok(0);
        }

        let total = secret_docs.len();
        let resolutions = secret_docs.into_iter().map(|doc| async move {
            let Some(reference) = doc.secret_reference() else {
                warn!(key = %doc.key, "secret entry has a non-string reference; skipped");
                return None;
            };
            match self.fetch_secret(reference).await {
                Ok(plaintext) => Some((doc.key.clone(), plaintext)),
                Err(e) => {
                    warn!(key = %doc.key, "failed to resolve secret: {e}");
                    None
                }
            }
        });

        let mut loaded = 0;
        for resolved in join_all(resolutions).await.into_iter().flatten() {
            self.inner.secret_cache.insert(resolved.0, resolved.1);
            loaded += 1;
        }
        info!(loaded, total, "resolved configuration secrets");
        Ok(loaded)
    }

    /// Re-resolves one secret from its persisted reference.
    ///
    /// Returns whether a secret entry existed for the key.
    pub async fn refresh_secret(&self, key: &str) -> Result<bool> {
        let Some(doc) = self.inner.store.find_one(key).await? else {
            return Ok(false);
        };
        if !doc.is_secret() {
            return Ok(false);
        }
        let Some(reference) = doc.secret_reference() else {
            return Err(ConfigError::secret(format!(
                "secret entry '{key}' has a non-string reference"
            )));
        };
        let plaintext = self.fetch_secret(reference).await?;
        self.inner.secret_cache.insert(key.to_string(), plaintext);
        debug!(key, "secret refreshed");
        Ok(true)
    }

    /// Clears the secrets cache and re-resolves everything.
    pub async fn refresh_secrets(&self) -> Result<usize> {
        self.inner.secret_cache.clear();
        self.load_secrets().await
    }

    // ==================== Lifecycle ====================

    /// Loads the database cache and secrets and starts watching for
    /// changes.
    ///
    /// Fails if called twice without an intervening
    /// [`shutdown`](Self::shutdown), and if the baseline cache load
    /// fails, since the registry is unusable without one. Secret loading and
    /// watching are best-effort. Returns whether live watching is
    /// active; `false` means the store cannot provide a change feed and
    /// the cache stays at its last loaded snapshot.
    pub async fn initialize(&self) -> Result<bool> {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return Err(ConfigError::AlreadyInitialized);
        }

        match self.load_from_db().await {
            Ok(count) => info!(count, "configuration cache loaded"),
            Err(e) => {
                self.inner.initialized.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        if let Err(e) = self.load_secrets().await {
            warn!("failed to load configuration secrets: {e}");
        }

        let watching = match self.start_watching().await {
            Ok(watching) => watching,
            Err(e) => {
                warn!("failed to start configuration watcher: {e}");
                false
            }
        };

        Ok(watching)
    }

    /// Stops watching and drops all cached state. Idempotent.
    ///
    /// Runtime overrides survive; they belong to the process, not the
    /// initialize/shutdown session.
    pub async fn shutdown(&self) {
        self.stop_watching().await;
        self.inner.db_cache.clear();
        self.inner.secret_cache.clear();
        self.inner.initialized.store(false, Ordering::SeqCst);
        debug!("configuration registry shut down");
    }

    /// Rebuilds the database cache from a bulk store read. Returns the
    /// number of cached entries.
    pub async fn load_from_db(&self) -> Result<usize> {
        let docs = self.inner.store.find_all().await?;
        let count = docs.len();
        self.inner.db_cache.clear();
        for doc in docs {
            self.inner.db_cache.insert(doc.key, doc.value);
        }
        debug!(count, "database cache rebuilt");
        Ok(count)
    }

    // ==================== Events ====================

    /// Subscribe to configuration change events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.inner.event_bus.subscribe()
    }

    pub(crate) fn emit(&self, event: ConfigChangeEvent) {
        // No subscribers is the common case; not an error.
        let _ = self.inner.event_bus.send(event);
    }
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("backend", &self.inner.store.backend_name())
            .field("registered_keys", &self.inner.registry.len())
            .field("overrides", &self.inner.overrides.len())
            .field("db_cache", &self.inner.db_cache.len())
            .field("secrets", &"<redacted>")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use strata_storage::{ChangeEvent, FeedHandle, StorageError};
    use strata_storage_memory::MemoryConfigStore;
    use tokio::sync::mpsc;

    use crate::secrets::MapSecretManager;

    fn memory_registry() -> (Arc<MemoryConfigStore>, Configuration) {
        let store = Arc::new(MemoryConfigStore::new());
        let config = Configuration::builder()
            .with_store(store.clone())
            .build()
            .unwrap();
        (store, config)
    }

    #[test]
    fn test_build_requires_store() {
        let result = Configuration::builder().build();
        assert!(matches!(result, Err(ConfigError::MissingStore)));
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let (store, config) = memory_registry();
        config.register(
            "SERVICE_NAME",
            ConfigDefinition::new(ConfigKind::String)
                .with_env("STRATA_TEST_SERVICE_NAME")
                .with_default("default-name"),
        );
        unsafe { std::env::set_var("STRATA_TEST_SERVICE_NAME", "env-name") };

        store
            .upsert(
                "SERVICE_NAME",
                ConfigValue::from("db-name"),
                ConfigKind::String,
                None,
            )
            .await
            .unwrap();
        config.load_from_db().await.unwrap();
        config.set("SERVICE_NAME", "override-name").unwrap();

        // Override wins over everything.
        assert_eq!(
            config.get_string("SERVICE_NAME"),
            Some("override-name".to_string())
        );

        // A later cache reload does not displace an existing override.
        store
            .upsert(
                "SERVICE_NAME",
                ConfigValue::from("db-name-2"),
                ConfigKind::String,
                None,
            )
            .await
            .unwrap();
        config.load_from_db().await.unwrap();
        assert_eq!(
            config.get_string("SERVICE_NAME"),
            Some("override-name".to_string())
        );

        // Cleared override falls to the db cache, then env, then default.
        config.clear("SERVICE_NAME");
        assert_eq!(
            config.get_string("SERVICE_NAME"),
            Some("db-name-2".to_string())
        );

        store.delete("SERVICE_NAME");
        config.load_from_db().await.unwrap();
        assert_eq!(
            config.get_string("SERVICE_NAME"),
            Some("env-name".to_string())
        );

        unsafe { std::env::remove_var("STRATA_TEST_SERVICE_NAME") };
        assert_eq!(
            config.get_string("SERVICE_NAME"),
            Some("default-name".to_string())
        );
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let (_store, config) = memory_registry();
        config.clear("NEVER_SET");
        assert_eq!(config.get("NEVER_SET"), None);

        config.set("ONCE", "v").unwrap();
        config.clear("ONCE");
        config.clear("ONCE");
        assert_eq!(config.get("ONCE"), None);
    }

    #[tokio::test]
    async fn test_validator_rejects_and_keeps_previous_override() {
        let (store, config) = memory_registry();
        config.register(
            "PORT",
            ConfigDefinition::new(ConfigKind::Number)
                .with_default(3000i64)
                .with_validator(|v| v.as_number().is_some_and(|n| n > 0.0 && n < 65536.0)),
        );

        config.set("PORT", 8080i64).unwrap();
        let err = config.set("PORT", 99999i64).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert_eq!(config.get_number("PORT"), Some(8080.0));

        // The persisted path enforces the same validator.
        let err = config.set_db("PORT", 99999i64).await.unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(store.find_one("PORT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_env_conversion_failure_uses_default() {
        let (_store, config) = memory_registry();
        config.register(
            "WORKERS",
            ConfigDefinition::new(ConfigKind::Number)
                .with_env("STRATA_TEST_WORKERS")
                .with_default(4i64),
        );
        unsafe { std::env::set_var("STRATA_TEST_WORKERS", "not-a-number") };

        // Default, not NaN and not an error.
        assert_eq!(config.get_number("WORKERS"), Some(4.0));

        unsafe { std::env::remove_var("STRATA_TEST_WORKERS") };
    }

    #[tokio::test]
    async fn test_env_validation_failure_uses_default() {
        let (_store, config) = memory_registry();
        config.register(
            "LISTEN_PORT",
            ConfigDefinition::new(ConfigKind::Number)
                .with_env("STRATA_TEST_LISTEN_PORT")
                .with_default(3000i64)
                .with_validator(|v| v.as_number().is_some_and(|n| n > 0.0 && n < 65536.0)),
        );
        unsafe { std::env::set_var("STRATA_TEST_LISTEN_PORT", "99999") };

        assert_eq!(config.get_number("LISTEN_PORT"), Some(3000.0));

        unsafe { std::env::remove_var("STRATA_TEST_LISTEN_PORT") };
    }

    #[tokio::test]
    async fn test_boolean_env_coercion() {
        let (_store, config) = memory_registry();
        config.register(
            "FLAG",
            ConfigDefinition::new(ConfigKind::Boolean).with_env("STRATA_TEST_FLAG"),
        );

        unsafe { std::env::set_var("STRATA_TEST_FLAG", "1") };
        assert_eq!(config.get_bool("FLAG"), Some(true));

        unsafe { std::env::set_var("STRATA_TEST_FLAG", "true") };
        assert_eq!(config.get_bool("FLAG"), Some(true));

        unsafe { std::env::set_var("STRATA_TEST_FLAG", "0") };
        assert_eq!(config.get_bool("FLAG"), Some(false));

        unsafe { std::env::set_var("STRATA_TEST_FLAG", "yes") };
        assert_eq!(config.get_bool("FLAG"), Some(false));

        unsafe { std::env::remove_var("STRATA_TEST_FLAG") };
    }

    #[tokio::test]
    async fn test_unregistered_key_reads_process_env() {
        let (_store, config) = memory_registry();

        unsafe { std::env::set_var("STRATA_TEST_UNREGISTERED", "raw-string") };
        assert_eq!(
            config.get("STRATA_TEST_UNREGISTERED"),
            Some(ConfigValue::from("raw-string"))
        );
        unsafe { std::env::remove_var("STRATA_TEST_UNREGISTERED") };

        assert_eq!(config.get("STRATA_TEST_UNREGISTERED"), None);
        assert_eq!(
            config.get_or("STRATA_TEST_UNREGISTERED", "fallback"),
            ConfigValue::from("fallback")
        );
    }

    #[tokio::test]
    async fn test_override_shadows_db_cache_immediately() {
        let (store, config) = memory_registry();
        store
            .upsert("KEY", ConfigValue::from("v2"), ConfigKind::String, None)
            .await
            .unwrap();
        config.load_from_db().await.unwrap();

        config.set("KEY", "v3").unwrap();
        assert_eq!(config.get_string("KEY"), Some("v3".to_string()));
    }

    #[tokio::test]
    async fn test_initialize_guards_double_init() {
        let (_store, config) = memory_registry();

        config.initialize().await.unwrap();
        let err = config.initialize().await.unwrap_err();
        assert!(matches!(err, ConfigError::AlreadyInitialized));

        config.shutdown().await;
        config.shutdown().await;
        assert!(!config.is_initialized());

        config.initialize().await.unwrap();
        assert!(config.is_initialized());
        config.shutdown().await;
    }

    struct FailingStore;

    #[async_trait]
    impl ConfigStore for FailingStore {
        async fn find_all(&self) -> std::result::Result<Vec<ConfigDocument>, StorageError> {
            Err(StorageError::connection("store is down"))
        }

        async fn find_one(
            &self,
            _key: &str,
        ) -> std::result::Result<Option<ConfigDocument>, StorageError> {
            Err(StorageError::connection("store is down"))
        }

        async fn upsert(
            &self,
            _key: &str,
            _value: ConfigValue,
            _kind: ConfigKind,
            _description: Option<&str>,
        ) -> std::result::Result<ConfigDocument, StorageError> {
            Err(StorageError::connection("store is down"))
        }

        fn supports_change_feed(&self) -> bool {
            false
        }

        async fn watch(
            &self,
            _tx: mpsc::Sender<ChangeEvent>,
        ) -> std::result::Result<FeedHandle, StorageError> {
            Err(StorageError::unsupported("no change feed"))
        }

        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_initialize_fails_without_baseline_cache() {
        let config = Configuration::builder()
            .with_store(Arc::new(FailingStore))
            .build()
            .unwrap();

        let err = config.initialize().await.unwrap_err();
        assert!(matches!(err, ConfigError::Storage(_)));
        // The failed attempt leaves the registry uninitialized for a retry.
        assert!(!config.is_initialized());
    }

    #[tokio::test]
    async fn test_set_and_persist_background_write() {
        let (store, config) = memory_registry();

        // Before initialization nothing is written.
        config.set_and_persist("EARLY", "v0").unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(store.find_one("EARLY").await.unwrap().is_none());
        assert_eq!(config.get_string("EARLY"), Some("v0".to_string()));

        config.initialize().await.unwrap();
        config.set_and_persist("LATER", "v1").unwrap();
        // The override is visible before the write lands.
        assert_eq!(config.get_string("LATER"), Some("v1".to_string()));

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let doc = store.find_one("LATER").await.unwrap().unwrap();
        assert_eq!(doc.value, ConfigValue::from("v1"));

        config.shutdown().await;
    }

    #[tokio::test]
    async fn test_set_db_infers_kind_from_definition() {
        let (store, config) = memory_registry();
        config.register("TOKEN", ConfigDefinition::new(ConfigKind::Secret));

        config.set_db("TOKEN", "projects/p/secrets/t/versions/latest").await.unwrap();
        config.set_db("COUNT", 3i64).await.unwrap();

        assert_eq!(
            store.find_one("TOKEN").await.unwrap().unwrap().kind,
            ConfigKind::Secret
        );
        assert_eq!(
            store.find_one("COUNT").await.unwrap().unwrap().kind,
            ConfigKind::Number
        );
    }

    #[tokio::test]
    async fn test_fetch_secret_resolution() {
        let store = Arc::new(MemoryConfigStore::new());
        let secrets = Arc::new(MapSecretManager::new());
        secrets.insert("projects/acme/secrets/db-password/versions/latest", b"hunter2".to_vec());

        // Without a manager every fetch fails.
        let bare = Configuration::builder()
            .with_store(store.clone())
            .build()
            .unwrap();
        assert!(bare.fetch_secret("db-password").await.is_err());

        // Short names need a project.
        let unqualified = Configuration::builder()
            .with_store(store.clone())
            .with_secret_manager(secrets.clone())
            .build()
            .unwrap();
        let err = unqualified.fetch_secret("db-password").await.unwrap_err();
        assert!(matches!(err, ConfigError::Secret(_)));

        // Fully qualified paths work regardless.
        assert_eq!(
            unqualified
                .fetch_secret("projects/acme/secrets/db-password/versions/latest")
                .await
                .unwrap(),
            "hunter2"
        );

        let qualified = Configuration::builder()
            .with_store(store)
            .with_secret_manager(secrets)
            .with_secret_project("acme")
            .build()
            .unwrap();
        assert_eq!(qualified.fetch_secret("db-password").await.unwrap(), "hunter2");
    }

    #[tokio::test]
    async fn test_load_secrets_partial_failure() {
        let store = Arc::new(MemoryConfigStore::new());
        let secrets = Arc::new(MapSecretManager::new());
        secrets.insert("projects/acme/secrets/good/versions/latest", b"resolved".to_vec());

        store
            .upsert(
                "GOOD",
                ConfigValue::from("projects/acme/secrets/good/versions/latest"),
                ConfigKind::Secret,
                None,
            )
            .await
            .unwrap();
        store
            .upsert(
                "BAD",
                ConfigValue::from("projects/acme/secrets/missing/versions/latest"),
                ConfigKind::Secret,
                None,
            )
            .await
            .unwrap();

        let config = Configuration::builder()
            .with_store(store)
            .with_secret_manager(secrets)
            .build()
            .unwrap();

        let loaded = config.load_secrets().await.unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(config.secret_keys(), vec!["GOOD".to_string()]);
        assert_eq!(config.get_string("GOOD"), Some("resolved".to_string()));
    }

    #[tokio::test]
    async fn test_secret_isolation_in_dumps() {
        let store = Arc::new(MemoryConfigStore::new());
        let secrets = Arc::new(MapSecretManager::new());
        let reference = "projects/acme/secrets/api-key/versions/latest";
        secrets.insert(reference, b"plaintext-key".to_vec());

        store
            .upsert("API_KEY", ConfigValue::from(reference), ConfigKind::Secret, None)
            .await
            .unwrap();

        let config = Configuration::builder()
            .with_store(store)
            .with_secret_manager(secrets)
            .build()
            .unwrap();
        config.register("API_KEY", ConfigDefinition::new(ConfigKind::Secret));
        config.load_from_db().await.unwrap();
        config.load_secrets().await.unwrap();

        // Key names only.
        assert_eq!(config.secret_keys(), vec!["API_KEY".to_string()]);

        // The effective dump redacts; the db snapshot shows the reference.
        let all = config.all();
        assert_eq!(all.get("API_KEY"), Some(&ConfigValue::from("<secret>")));
        let snapshot = config.db_cache_snapshot();
        assert_eq!(snapshot.get("API_KEY"), Some(&ConfigValue::from(reference)));

        // Direct reads still resolve the plaintext.
        assert_eq!(config.get_string("API_KEY"), Some("plaintext-key".to_string()));
    }

    #[tokio::test]
    async fn test_refresh_secrets_picks_up_rotation() {
        let store = Arc::new(MemoryConfigStore::new());
        let secrets = Arc::new(MapSecretManager::new());
        let reference = "projects/acme/secrets/rotating/versions/latest";
        secrets.insert(reference, b"old".to_vec());

        store
            .upsert("ROTATING", ConfigValue::from(reference), ConfigKind::Secret, None)
            .await
            .unwrap();

        let config = Configuration::builder()
            .with_store(store)
            .with_secret_manager(secrets.clone())
            .build()
            .unwrap();
        config.load_secrets().await.unwrap();
        assert_eq!(config.get_string("ROTATING"), Some("old".to_string()));

        secrets.insert(reference, b"new".to_vec());
        assert_eq!(config.refresh_secrets().await.unwrap(), 1);
        assert_eq!(config.get_string("ROTATING"), Some("new".to_string()));
    }

    #[tokio::test]
    async fn test_refresh_secret_missing_or_plain_entries() {
        let store = Arc::new(MemoryConfigStore::new());
        store
            .upsert("PLAIN", ConfigValue::from("value"), ConfigKind::String, None)
            .await
            .unwrap();

        let config = Configuration::builder()
            .with_store(store)
            .with_secret_manager(Arc::new(MapSecretManager::new()))
            .build()
            .unwrap();

        assert!(!config.refresh_secret("ABSENT").await.unwrap());
        assert!(!config.refresh_secret("PLAIN").await.unwrap());
    }

    #[tokio::test]
    async fn test_introspection() {
        let (store, config) = memory_registry();
        config.register(
            "B_KEY",
            ConfigDefinition::new(ConfigKind::String).with_description("second"),
        );
        config.register("A_KEY", ConfigDefinition::new(ConfigKind::Number));

        assert_eq!(config.keys(), vec!["A_KEY".to_string(), "B_KEY".to_string()]);
        assert_eq!(
            config.definition("B_KEY").unwrap().description(),
            Some("second")
        );
        assert!(config.definition("MISSING").is_none());

        store
            .upsert("C_KEY", ConfigValue::from(true), ConfigKind::Boolean, None)
            .await
            .unwrap();
        config.load_from_db().await.unwrap();
        config.set("A_KEY", 1i64).unwrap();

        // all() covers registered, cached, and overridden keys.
        let all = config.all();
        assert_eq!(all.get("A_KEY"), Some(&ConfigValue::Number(1.0)));
        assert_eq!(all.get("C_KEY"), Some(&ConfigValue::Boolean(true)));
        assert!(!all.contains_key("B_KEY")); // resolves nowhere
    }

    #[tokio::test]
    async fn test_subscribe_receives_change_events() {
        let (_store, config) = memory_registry();
        let mut rx = config.subscribe();

        config.set("WATCHED", "v").unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.source, ChangeSource::Runtime);
        assert_eq!(event.key.as_deref(), Some("WATCHED"));
        assert_eq!(event.operation, ConfigOperation::Set);
    }
}

//! The PostgreSQL store implementation and its notify-driven feed.

use async_trait::async_trait;
use serde::Deserialize;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::{PgListener, PgPool};
use strata_core::{ConfigKind, ConfigValue};
use strata_storage::{
    ChangeEvent, ChangeOperation, ConfigDocument, ConfigStore, FeedHandle, StorageError,
};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// PostgreSQL channel the configuration trigger notifies on.
const CONFIG_CHANNEL: &str = "strata_config_changes";

/// Row shape of `strata.configuration`.
type ConfigRow = (
    Uuid,
    String,
    serde_json::Value,
    String,
    Option<String>,
    OffsetDateTime,
);

/// Notification payload emitted by the table trigger.
#[derive(Debug, Clone, Deserialize)]
struct NotifyPayload {
    key: String,
    operation: String,
}

/// PostgreSQL-backed configuration store.
pub struct PostgresConfigStore {
    pool: PgPool,
}

impl PostgresConfigStore {
    /// Creates a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deletes a document by key.
    ///
    /// The configuration engine never deletes; this exists for operator
    /// tooling. Returns whether a row was removed.
    pub async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let result = query("DELETE FROM strata.configuration WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::internal(format!("Failed to delete config entry: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    fn row_to_document(row: ConfigRow) -> Result<ConfigDocument, StorageError> {
        let (id, key, value, kind, description, updated_at) = row;

        let kind = ConfigKind::parse(&kind)
            .map_err(|e| StorageError::decode(key.clone(), e.to_string()))?;
        let value: ConfigValue = serde_json::from_value(value)
            .map_err(|e| StorageError::decode(key.clone(), format!("invalid value: {e}")))?;

        Ok(ConfigDocument {
            id,
            key,
            value,
            kind,
            description,
            updated_at,
        })
    }
}

#[async_trait]
impl ConfigStore for PostgresConfigStore {
    async fn find_all(&self) -> Result<Vec<ConfigDocument>, StorageError> {
        let rows: Vec<ConfigRow> = query_as(
            r#"
            SELECT id, key, value, kind, description, updated_at
            FROM strata.configuration
            ORDER BY key
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::internal(format!("Failed to load config entries: {e}")))?;

        rows.into_iter().map(Self::row_to_document).collect()
    }

    async fn find_one(&self, key: &str) -> Result<Option<ConfigDocument>, StorageError> {
        let row: Option<ConfigRow> = query_as(
            r#"
            SELECT id, key, value, kind, description, updated_at
            FROM strata.configuration
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::internal(format!("Failed to get config entry: {e}")))?;

        row.map(Self::row_to_document).transpose()
    }

    async fn upsert(
        &self,
        key: &str,
        value: ConfigValue,
        kind: ConfigKind,
        description: Option<&str>,
    ) -> Result<ConfigDocument, StorageError> {
        let stored_value = serde_json::to_value(&value)
            .map_err(|e| StorageError::internal(format!("Failed to serialize value: {e}")))?;

        let result: (Uuid, OffsetDateTime) = query_as(
            r#"
            INSERT INTO strata.configuration (id, key, value, kind, description)
            VALUES (gen_random_uuid(), $1, $2, $3, $4)
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                kind = EXCLUDED.kind,
                description = EXCLUDED.description,
                updated_at = NOW()
            RETURNING id, updated_at
            "#,
        )
        .bind(key)
        .bind(&stored_value)
        .bind(kind.to_string())
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::internal(format!("Failed to set config entry: {e}")))?;

        debug!(key, kind = %kind, "postgres store upsert");

        Ok(ConfigDocument {
            id: result.0,
            key: key.to_string(),
            value,
            kind,
            description: description.map(String::from),
            updated_at: result.1,
        })
    }

    fn supports_change_feed(&self) -> bool {
        true
    }

    async fn watch(&self, tx: mpsc::Sender<ChangeEvent>) -> Result<FeedHandle, StorageError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| StorageError::connection(format!("Failed to connect listener: {e}")))?;

        listener
            .listen(CONFIG_CHANNEL)
            .await
            .map_err(|e| StorageError::connection(format!("Failed to listen: {e}")))?;

        info!("configuration listener started on channel: {CONFIG_CHANNEL}");

        let pool = self.pool.clone();
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("configuration listener shutting down");
                        return;
                    }
                    notification = listener.recv() => {
                        let notification = match notification {
                            Ok(n) => n,
                            Err(e) => {
                                // Dropping tx signals the consumer to re-subscribe.
                                error!("configuration listener error: {e}");
                                return;
                            }
                        };

                        debug!("received config notification: {:?}", notification.payload());

                        let payload =
                            match serde_json::from_str::<NotifyPayload>(notification.payload()) {
                                Ok(p) => p,
                                Err(e) => {
                                    warn!("failed to parse config notification: {e}");
                                    continue;
                                }
                            };

                        let event = match payload.operation.as_str() {
                            "DELETE" => Some(ChangeEvent::delete()),
                            op => match lookup_document(&pool, &payload.key).await {
                                Ok(Some(doc)) => Some(ChangeEvent {
                                    operation: if op == "INSERT" {
                                        ChangeOperation::Insert
                                    } else {
                                        ChangeOperation::Update
                                    },
                                    document: Some(doc),
                                }),
                                // Row gone before the lookup; the delete
                                // notification that follows reconciles it.
                                Ok(None) => None,
                                Err(e) => {
                                    warn!(key = %payload.key, "failed to load changed document: {e}");
                                    None
                                }
                            },
                        };

                        if let Some(event) = event
                            && tx.send(event).await.is_err()
                        {
                            debug!("change feed consumer dropped");
                            return;
                        }
                    }
                }
            }
        });

        Ok(FeedHandle::new(handle, shutdown_tx))
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

async fn lookup_document(pool: &PgPool, key: &str) -> Result<Option<ConfigDocument>, StorageError> {
    let row: Option<ConfigRow> = query_as(
        r#"
        SELECT id, key, value, kind, description, updated_at
        FROM strata.configuration
        WHERE key = $1
        "#,
    )
    .bind(key)
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::internal(format!("Failed to get config entry: {e}")))?;

    row.map(PostgresConfigStore::row_to_document).transpose()
}

impl std::fmt::Debug for PostgresConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfigStore")
            .field("pool", &"<PgPool>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Backend tests require a running PostgreSQL database and are
    // ignored by default.

    #[tokio::test]
    #[ignore]
    async fn test_postgres_roundtrip() {
        let pool = PgPool::connect("postgres://postgres@localhost/strata_test")
            .await
            .unwrap();
        crate::ensure_schema(&pool).await.unwrap();

        let store = PostgresConfigStore::new(pool);
        store
            .upsert("KEY", ConfigValue::from("v1"), ConfigKind::String, None)
            .await
            .unwrap();
        store
            .upsert("KEY", ConfigValue::from("v2"), ConfigKind::String, None)
            .await
            .unwrap();

        let doc = store.find_one("KEY").await.unwrap().unwrap();
        assert_eq!(doc.value, ConfigValue::from("v2"));
        assert_eq!(store.find_all().await.unwrap().len(), 1);

        store.delete("KEY").await.unwrap();
    }

    #[test]
    fn test_notify_payload_parsing() {
        let json = r#"{"key":"PORT","operation":"UPDATE"}"#;
        let payload: NotifyPayload = serde_json::from_str(json).unwrap();

        assert_eq!(payload.key, "PORT");
        assert_eq!(payload.operation, "UPDATE");
    }
}

//! Schema bootstrap for the configuration table and its notify trigger.

use sqlx_core::query::query;
use sqlx_postgres::PgPool;
use strata_storage::StorageError;
use tracing::info;

/// Statements executed by [`ensure_schema`], in order. Each is
/// idempotent so bootstrap can run on every startup.
const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS strata",
    r#"
    CREATE TABLE IF NOT EXISTS strata.configuration (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        key TEXT NOT NULL UNIQUE,
        value JSONB NOT NULL,
        kind TEXT NOT NULL,
        description TEXT,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE OR REPLACE FUNCTION strata.notify_configuration_change() RETURNS trigger AS $$
    BEGIN
        PERFORM pg_notify(
            'strata_config_changes',
            json_build_object(
                'key', COALESCE(NEW.key, OLD.key),
                'operation', TG_OP
            )::text
        );
        RETURN COALESCE(NEW, OLD);
    END;
    $$ LANGUAGE plpgsql
    "#,
    "DROP TRIGGER IF EXISTS configuration_notify ON strata.configuration",
    r#"
    CREATE TRIGGER configuration_notify
        AFTER INSERT OR UPDATE OR DELETE ON strata.configuration
        FOR EACH ROW EXECUTE FUNCTION strata.notify_configuration_change()
    "#,
];

/// Creates the configuration schema, table, and notify trigger if they
/// do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StorageError> {
    for statement in SCHEMA_STATEMENTS {
        query(statement)
            .execute(pool)
            .await
            .map_err(|e| StorageError::internal(format!("Schema bootstrap failed: {e}")))?;
    }
    info!("configuration schema ready");
    Ok(())
}

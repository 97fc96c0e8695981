//! PostgreSQL configuration store backend.
//!
//! Documents live in `strata.configuration` with a unique key column;
//! a row trigger emits `pg_notify` payloads on the
//! `strata_config_changes` channel, and the change-feed producer turns
//! those notifications into [`strata_storage::ChangeEvent`]s,
//! re-reading the affected row to supply the full document. The
//! producer makes a single subscription attempt; when the listener
//! connection fails it logs, drops its channel, and exits, leaving
//! reconnection policy to the consumer.

mod schema;
mod store;

pub use schema::ensure_schema;
pub use store::PostgresConfigStore;

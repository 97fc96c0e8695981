//! Value-store abstraction for the Strata runtime configuration engine.
//!
//! This crate defines the contract every configuration store backend
//! implements: point and bulk reads, upsert-by-key, and a live change
//! feed with an explicit capability probe. The engine consumes the
//! trait; backends (in-memory, PostgreSQL) live in sibling crates.

mod document;
mod error;
mod events;
mod traits;

pub use document::ConfigDocument;
pub use error::StorageError;
pub use events::{ChangeEvent, ChangeOperation};
pub use traits::{ConfigStore, FeedHandle};

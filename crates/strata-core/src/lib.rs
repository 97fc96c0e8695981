//! Core value model for the Strata runtime configuration engine.
//!
//! Configuration values are dynamically typed at the storage boundary:
//! a persisted entry carries a `kind` discriminant
//! (`string|number|boolean|secret`) next to its raw value, and the value
//! is decoded against that discriminant when it is read, never trusted
//! implicitly. This crate defines the [`ConfigKind`] discriminant, the
//! [`ConfigValue`] union, and the string-coercion rules shared by every
//! string-shaped source (environment variables in particular).

mod value;

pub use value::{ConfigKind, ConfigValue, KindParseError};

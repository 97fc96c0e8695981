//! Static configuration key metadata.

use std::sync::Arc;
use strata_core::{ConfigKind, ConfigValue};

/// Predicate applied to candidate values for a key.
pub type Validator = Arc<dyn Fn(&ConfigValue) -> bool + Send + Sync>;

/// Registration metadata for one configuration key.
///
/// Definitions are in-memory only: registered once at startup,
/// overwritten on re-registration, never persisted and never deleted.
/// The declared kind governs conversion of string-shaped sources
/// (environment variables); the validator gates runtime and database
/// writes and filters environment-derived values.
#[derive(Clone)]
pub struct ConfigDefinition {
    kind: ConfigKind,
    env_var: Option<String>,
    default: Option<ConfigValue>,
    validator: Option<Validator>,
    description: Option<String>,
}

impl ConfigDefinition {
    /// Creates a definition of the given kind with no fallbacks.
    pub fn new(kind: ConfigKind) -> Self {
        Self {
            kind,
            env_var: None,
            default: None,
            validator: None,
            description: None,
        }
    }

    /// Names an environment variable supplying a fallback value.
    pub fn with_env(mut self, var: impl Into<String>) -> Self {
        self.env_var = Some(var.into());
        self
    }

    /// Sets the static default value.
    pub fn with_default(mut self, value: impl Into<ConfigValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Attaches a validator predicate.
    pub fn with_validator(
        mut self,
        validator: impl Fn(&ConfigValue) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Attaches free-text documentation.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The declared kind.
    pub fn kind(&self) -> ConfigKind {
        self.kind
    }

    /// The fallback environment variable, if any.
    pub fn env_var(&self) -> Option<&str> {
        self.env_var.as_deref()
    }

    /// The static default, if any.
    pub fn default(&self) -> Option<&ConfigValue> {
        self.default.as_ref()
    }

    /// The documentation text, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Whether a validator is attached.
    pub fn has_validator(&self) -> bool {
        self.validator.is_some()
    }

    /// Runs the validator; a definition without one accepts everything.
    pub fn accepts(&self, value: &ConfigValue) -> bool {
        self.validator.as_ref().is_none_or(|v| v(value))
    }
}

impl std::fmt::Debug for ConfigDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDefinition")
            .field("kind", &self.kind)
            .field("env_var", &self.env_var)
            .field("default", &self.default)
            .field("has_validator", &self.validator.is_some())
            .field("description", &self.description)
            .finish()
    }
}

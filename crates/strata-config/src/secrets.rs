//! Secret resolution against an external secret manager.
//!
//! Secret-kinded configuration documents store a *reference* (a
//! resource name in an external secret store) and the engine resolves
//! the reference to plaintext through the [`SecretManager`] trait.
//! Short names are qualified against a configured project identifier
//! with a fixed latest-version suffix.

use async_trait::async_trait;
use dashmap::DashMap;

/// Version suffix appended when qualifying a short secret name.
const LATEST_VERSION_SUFFIX: &str = "versions/latest";

/// Client for an external secret-management service.
#[async_trait]
pub trait SecretManager: Send + Sync {
    /// Fetches the raw payload of a secret by its fully qualified
    /// resource name.
    async fn access_secret(&self, resource: &str) -> Result<Vec<u8>, SecretError>;
}

/// Errors from the secret-management service.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    /// No secret exists under the given resource name.
    #[error("Secret not found: {name}")]
    NotFound {
        /// The resource name that was looked up.
        name: String,
    },

    /// The service rejected or failed the access.
    #[error("Secret access failed: {message}")]
    Access {
        /// Description of the failure.
        message: String,
    },
}

impl SecretError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates a new `Access` error.
    #[must_use]
    pub fn access(message: impl Into<String>) -> Self {
        Self::Access {
            message: message.into(),
        }
    }
}

/// Qualifies a short secret name against a project identifier.
pub fn qualified_resource(project: &str, name: &str) -> String {
    format!("projects/{project}/secrets/{name}/{LATEST_VERSION_SUFFIX}")
}

/// In-memory secret manager.
///
/// Holds secret payloads in a concurrent map keyed by fully qualified
/// resource name. Backs tests and embedded deployments the way the
/// in-memory store backs the configuration collection.
#[derive(Debug, Default)]
pub struct MapSecretManager {
    secrets: DashMap<String, Vec<u8>>,
}

impl MapSecretManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a secret payload under a resource name, replacing any
    /// previous payload.
    pub fn insert(&self, resource: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.secrets.insert(resource.into(), payload.into());
    }

    /// Removes a secret. Returns whether one was present.
    pub fn remove(&self, resource: &str) -> bool {
        self.secrets.remove(resource).is_some()
    }
}

#[async_trait]
impl SecretManager for MapSecretManager {
    async fn access_secret(&self, resource: &str) -> Result<Vec<u8>, SecretError> {
        self.secrets
            .get(resource)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SecretError::not_found(resource))
    }
}

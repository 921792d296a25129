//! Application credentials and cache-aside resolution.
//!
//! [`CredentialCache::resolve`] consults a [`CacheBackend`] first and falls
//! back to the durable [`CredentialStore`] on a miss or a cache failure. The
//! cache can only ever make resolution faster, never make it fail.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::metrics;

/// How long a resolved credential may be served from cache.
pub const CREDENTIAL_TTL: Duration = Duration::from_secs(5 * 60);

/// Identity and secret of one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub app_id: String,
    /// Key presented by clients when connecting.
    pub app_key: String,
    pub app_secret: String,
}

impl Credential {
    #[must_use]
    pub fn new(
        app_id: impl Into<String>,
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            app_key: app_key.into(),
            app_secret: app_secret.into(),
        }
    }
}

/// Durable store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or the query failed.
    #[error("Credential store unavailable: {0}")]
    Unavailable(String),
}

/// Cache failures. Never fatal to resolution.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache could not be reached.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// An entry exists but cannot be read back as a credential.
    #[error("Corrupt cache entry for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Resolution failures.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No application has this key. The handshake is unauthorized.
    #[error("App not found for key: {0}")]
    AppNotFound(String),

    /// The durable store failed. Distinct from a missing app.
    #[error("Dependency error: {0}")]
    Dependency(#[from] StoreError),
}

impl ResolveError {
    /// Whether this failure means the client is not authorized.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ResolveError::AppNotFound(_))
    }
}

/// Durable lookup of credentials by application key.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find the credential for `app_key`; `Ok(None)` if no app has that key.
    async fn find_credential(&self, app_key: &str) -> Result<Option<Credential>, StoreError>;
}

/// Expiring key/value cache in front of the store.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Look up a cached credential. `Ok(None)` is a miss.
    async fn get(&self, app_key: &str) -> Result<Option<Credential>, CacheError>;

    /// Store a credential for at most `ttl`.
    async fn put(&self, app_key: &str, credential: &Credential, ttl: Duration)
        -> Result<(), CacheError>;
}

/// Cache-aside credential resolver.
pub struct CredentialCache {
    store: Arc<dyn CredentialStore>,
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl CredentialCache {
    /// Create a resolver with the default five minute TTL.
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, cache: Arc<dyn CacheBackend>) -> Self {
        Self::with_ttl(store, cache, CREDENTIAL_TTL)
    }

    /// Create a resolver with a custom TTL.
    #[must_use]
    pub fn with_ttl(
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn CacheBackend>,
        ttl: Duration,
    ) -> Self {
        Self { store, cache, ttl }
    }

    /// Get the cache TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Resolve the credential for an application key.
    ///
    /// Misses are not cached: an unknown key hits the store every time.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::AppNotFound`] if the store has no such key and
    /// [`ResolveError::Dependency`] if the store itself failed.
    pub async fn resolve(&self, app_key: &str) -> Result<Credential, ResolveError> {
        match self.cache.get(app_key).await {
            Ok(Some(credential)) => {
                trace!(app_key = %app_key, "Credential cache hit");
                metrics::record_cache_lookup("hit");
                return Ok(credential);
            }
            Ok(None) => metrics::record_cache_lookup("miss"),
            Err(e) => {
                warn!(app_key = %app_key, error = %e, "Credential cache read failed, using store");
                metrics::record_cache_lookup("error");
            }
        }

        let credential = self
            .store
            .find_credential(app_key)
            .await?
            .ok_or_else(|| ResolveError::AppNotFound(app_key.to_string()))?;
        debug!(app_key = %app_key, app_id = %credential.app_id, "Loaded credential from store");

        if let Err(e) = self.cache.put(app_key, &credential, self.ttl).await {
            warn!(app_key = %app_key, error = %e, "Failed to cache credential");
        }

        Ok(credential)
    }
}

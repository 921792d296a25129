//! In-process credential cache.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::credentials::{CacheBackend, CacheError, Credential};

struct CacheEntry {
    credential: Credential,
    expires_at: Instant,
}

/// A TTL cache held in process memory.
///
/// Expired entries are never returned; they are dropped lazily on lookup or
/// in bulk by [`MemoryCache::purge_expired`].
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, app_key: &str) -> Result<Option<Credential>, CacheError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(app_key) {
            if entry.expires_at > now {
                return Ok(Some(entry.credential.clone()));
            }
        }
        // The read guard is released before touching the shard again.
        self.entries
            .remove_if(app_key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn put(
        &self,
        app_key: &str,
        credential: &Credential,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.entries.insert(
            app_key.to_string(),
            CacheEntry {
                credential: credential.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

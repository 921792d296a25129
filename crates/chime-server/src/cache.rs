//! Redis credential cache.
//!
//! Each credential is a hash at `app:<key>` holding `app_id` and
//! `app_secret`, expiring after the resolver's TTL.

use async_trait::async_trait;
use chime_core::{CacheBackend, CacheError, Credential};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

const APP_ID_FIELD: &str = "app_id";
const APP_SECRET_FIELD: &str = "app_secret";

fn unavailable(e: redis::RedisError) -> CacheError {
    CacheError::Unavailable(e.to_string())
}

fn redis_key(app_key: &str) -> String {
    format!("app:{app_key}")
}

/// Rebuild a credential from its hash. An empty hash is a miss.
fn credential_from_hash(
    app_key: &str,
    mut fields: HashMap<String, String>,
) -> Result<Option<Credential>, CacheError> {
    if fields.is_empty() {
        return Ok(None);
    }
    let mut take = |field: &str| {
        fields.remove(field).ok_or_else(|| CacheError::Corrupt {
            key: redis_key(app_key),
            reason: format!("missing field {field}"),
        })
    };
    let app_id = take(APP_ID_FIELD)?;
    let app_secret = take(APP_SECRET_FIELD)?;
    Ok(Some(Credential::new(app_id, app_key, app_secret)))
}

/// [`CacheBackend`] on a shared Redis connection.
///
/// `ConnectionManager` reconnects on its own; while Redis is down every call
/// fails with [`CacheError::Unavailable`] and resolution falls back to the
/// store.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect to the Redis server at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the first connection fails.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;
        info!("Connected to Redis credential cache");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, app_key: &str) -> Result<Option<Credential>, CacheError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(redis_key(app_key))
            .await
            .map_err(unavailable)?;
        credential_from_hash(app_key, fields)
    }

    async fn put(
        &self,
        app_key: &str,
        credential: &Credential,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let key = redis_key(app_key);
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);

        let () = redis::pipe()
            .atomic()
            .hset_multiple(
                &key,
                &[
                    (APP_ID_FIELD, credential.app_id.as_str()),
                    (APP_SECRET_FIELD, credential.app_secret.as_str()),
                ],
            )
            .ignore()
            .expire(&key, ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

//! SQLite-backed credential and webhook storage.
//!
//! `rusqlite` is synchronous; calls made on the request path run on the
//! blocking pool. Startup helpers (`migrate`, `load_*`, `insert_*`) run
//! inline.

use async_trait::async_trait;
use chime_core::{Credential, CredentialStore, StoreError, WebhookRegistration};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS apps (
    id     TEXT PRIMARY KEY,
    key    TEXT NOT NULL UNIQUE,
    secret TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS webhooks (
    app_id    TEXT NOT NULL REFERENCES apps(id),
    event     TEXT NOT NULL,
    url       TEXT NOT NULL,
    api_token TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_webhooks_app_id ON webhooks(app_id);
";

fn unavailable(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Durable store for applications and their webhooks.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).map_err(unavailable)?;
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Create the schema if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if a statement fails.
    pub fn migrate(&self) -> Result<(), StoreError> {
        self.conn.lock().execute_batch(SCHEMA).map_err(unavailable)?;
        info!("Database schema is up to date");
        Ok(())
    }

    /// Register an application.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails, e.g. on a duplicate key.
    pub fn insert_app(&self, credential: &Credential) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO apps (id, key, secret) VALUES (?1, ?2, ?3)",
                params![credential.app_id, credential.app_key, credential.app_secret],
            )
            .map_err(unavailable)?;
        Ok(())
    }

    /// Register a webhook endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn insert_webhook(&self, webhook: &WebhookRegistration) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO webhooks (app_id, event, url, api_token) VALUES (?1, ?2, ?3, ?4)",
                params![webhook.app_id, webhook.event, webhook.url, webhook.token],
            )
            .map_err(unavailable)?;
        Ok(())
    }

    /// Load every webhook registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn load_webhooks(&self) -> Result<Vec<WebhookRegistration>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT app_id, event, url, api_token FROM webhooks")
            .map_err(unavailable)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(WebhookRegistration {
                    app_id: row.get(0)?,
                    event: row.get(1)?,
                    url: row.get(2)?,
                    token: row.get(3)?,
                })
            })
            .map_err(unavailable)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(unavailable)
    }

    /// Load every application credential, for cache warm-up.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn load_credentials(&self) -> Result<Vec<Credential>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, key, secret FROM apps")
            .map_err(unavailable)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Credential::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(unavailable)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(unavailable)
    }

    fn find_blocking(&self, app_key: &str) -> Result<Option<Credential>, StoreError> {
        self.conn
            .lock()
            .query_row(
                "SELECT id, key, secret FROM apps WHERE key = ?1",
                params![app_key],
                |row| {
                    Ok(Credential::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(unavailable)
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn find_credential(&self, app_key: &str) -> Result<Option<Credential>, StoreError> {
        let store = self.clone();
        let app_key = app_key.to_string();
        tokio::task::spawn_blocking(move || store.find_blocking(&app_key))
            .await
            .map_err(|e| StoreError::Unavailable(format!("lookup task failed: {e}")))?
    }
}

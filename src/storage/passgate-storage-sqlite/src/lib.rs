//! # Passgate Storage - SQLite Backend
//!
//! Session storage whose permanent tier is a SQLite database and whose
//! session tier lives in process memory. Each profile gets its own database
//! file, so several identities can be kept side by side.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tokio::sync::watch;
use tracing::{debug, info};

use passgate_storage::{ReadySignal, SessionStorage, StorageError, StorageTier};

/// SQLite-backed session storage.
///
/// The permanent tier is stored at `{base_path}/{profile}.db`.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    session: Arc<RwLock<HashMap<String, String>>>,
    ready: Arc<watch::Sender<bool>>,
    db_path: PathBuf,
}

impl SqliteStorage {
    /// Opens or creates the database for a profile.
    ///
    /// # Arguments
    ///
    /// * `base_path` - Directory where profile databases are stored
    /// * `profile` - Profile name (must match `[a-z0-9_-]+`)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Profile name is invalid
    /// - Directory cannot be created
    /// - Database connection fails
    pub async fn open(base_path: impl AsRef<Path>, profile: &str) -> Result<Self, StorageError> {
        Self::validate_profile(profile)?;

        let base = base_path.as_ref();
        std::fs::create_dir_all(base).map_err(|e| {
            StorageError::ConnectionFailed(format!("failed to create directory: {e}"))
        })?;

        let db_path = base.join(format!("{profile}.db"));
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        debug!(profile = %profile, path = %db_path.display(), "Opening SQLite session store");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let (ready, _rx) = watch::channel(false);
        let storage = Self {
            pool,
            session: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(ready),
            db_path,
        };

        storage.migrate().await?;
        storage.ready.send_replace(true);

        info!(profile = %profile, "SQLite session store ready");

        Ok(storage)
    }

    /// Path of the database file backing the permanent tier.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Validates that a profile name is safe to use as a file name.
    ///
    /// Only allows: lowercase letters, digits, underscore, hyphen.
    fn validate_profile(profile: &str) -> Result<(), StorageError> {
        if profile.is_empty() {
            return Err(StorageError::InvalidInput("profile cannot be empty".into()));
        }

        if profile.len() > 64 {
            return Err(StorageError::InvalidInput("profile name too long".into()));
        }

        let valid = profile
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

        if !valid {
            return Err(StorageError::InvalidInput(
                "profile must match [a-z0-9_-]+".into(),
            ));
        }

        Ok(())
    }

    /// Runs database migrations.
    async fn migrate(&self) -> Result<(), StorageError> {
        debug!("Running session store migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_kv (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::ConnectionFailed(format!("migration failed: {e}")))?;

        Ok(())
    }

    /// Returns the current Unix timestamp.
    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    fn session_value(&self, key: &str) -> Result<Option<String>, StorageError> {
        let session = self
            .session
            .read()
            .map_err(|_| StorageError::Io("session tier lock poisoned".into()))?;
        Ok(session.get(key).cloned())
    }

    fn write_session(&self, entries: &[(&str, String)]) -> Result<(), StorageError> {
        let mut session = self
            .session
            .write()
            .map_err(|_| StorageError::Io("session tier lock poisoned".into()))?;
        for (key, value) in entries {
            session.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }

    fn remove_session(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut session = self
            .session
            .write()
            .map_err(|_| StorageError::Io("session tier lock poisoned".into()))?;
        for key in keys {
            session.remove(*key);
        }
        Ok(())
    }

    /// Upserts every entry in one transaction.
    async fn write_permanent(&self, entries: &[(&str, String)]) -> Result<(), StorageError> {
        let now = Self::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        for (key, value) in entries {
            sqlx::query(
                r#"
                INSERT INTO session_kv (key, value, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(*key)
            .bind(value.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        debug!(count = entries.len(), "Saved batch to permanent tier");
        Ok(())
    }

    async fn remove_permanent(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        for key in keys {
            sqlx::query("DELETE FROM session_kv WHERE key = ?")
                .bind(*key)
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))
    }
}

#[async_trait]
impl SessionStorage for SqliteStorage {
    async fn get_tier_value(
        &self,
        key: &str,
        tier: StorageTier,
    ) -> Result<Option<String>, StorageError> {
        match tier {
            StorageTier::Session => self.session_value(key),
            StorageTier::Permanent => {
                let row: Option<(String,)> =
                    sqlx::query_as("SELECT value FROM session_kv WHERE key = ?")
                        .bind(key)
                        .fetch_optional(&self.pool)
                        .await
                        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
                Ok(row.map(|(v,)| v))
            },
        }
    }

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StorageError> {
        let session: Vec<Option<String>> = {
            let tier = self
                .session
                .read()
                .map_err(|_| StorageError::Io("session tier lock poisoned".into()))?;
            keys.iter().map(|key| tier.get(*key).cloned()).collect()
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let mut values = Vec::with_capacity(keys.len());
        for (key, cached) in keys.iter().zip(session) {
            if cached.is_some() {
                values.push(cached);
                continue;
            }
            let row: Option<(String,)> =
                sqlx::query_as("SELECT value FROM session_kv WHERE key = ?")
                    .bind(*key)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
            values.push(row.map(|(v,)| v));
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(values)
    }

    async fn save_batch(
        &self,
        tier: StorageTier,
        entries: &[(&str, String)],
    ) -> Result<(), StorageError> {
        match tier {
            StorageTier::Session => self.write_session(entries),
            StorageTier::Permanent => self.write_permanent(entries).await,
        }
    }

    async fn replace_batch(
        &self,
        tier: StorageTier,
        entries: &[(&str, String)],
    ) -> Result<(), StorageError> {
        let stale: Vec<&str> = entries.iter().map(|(key, _)| *key).collect();

        // New values land before the old tier is cleared.
        match tier {
            StorageTier::Session => {
                self.write_session(entries)?;
                self.remove_permanent(&stale).await
            },
            StorageTier::Permanent => {
                self.write_permanent(entries).await?;
                self.remove_session(&stale)
            },
        }
    }

    async fn delete_batch(&self, keys: &[&str]) -> Result<(), StorageError> {
        self.remove_permanent(keys).await?;
        self.remove_session(keys)
    }

    fn ready(&self) -> ReadySignal {
        ReadySignal::new(self.ready.subscribe())
    }
}

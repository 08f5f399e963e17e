//! Session storage trait definition.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;

use crate::error::StorageError;

/// Persistence tier of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageTier {
    /// Survives process (browser) restarts.
    Permanent,
    /// Shared by every handle of the running application, gone at exit.
    Session,
}

impl StorageTier {
    /// The tier that is not `self`.
    pub fn other(self) -> Self {
        match self {
            StorageTier::Permanent => StorageTier::Session,
            StorageTier::Session => StorageTier::Permanent,
        }
    }
}

/// One-shot "storage is initialized" signal.
///
/// Backends that load persisted state asynchronously flip the signal once
/// reads reflect that state.
#[derive(Debug, Clone)]
pub struct ReadySignal {
    rx: watch::Receiver<bool>,
}

impl ReadySignal {
    /// Wraps a watch receiver; `true` means ready.
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// A signal that has already fired.
    pub fn fired() -> Self {
        let (_tx, rx) = watch::channel(true);
        Self { rx }
    }

    /// Returns whether the storage is ready right now.
    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits until the storage is ready.
    ///
    /// Returns `false` if the backend went away before becoming ready.
    pub async fn wait(mut self) -> bool {
        self.rx.wait_for(|ready| *ready).await.is_ok()
    }
}

/// Two-tier key/value storage for session data.
///
/// Values are JSON text. Batch writes and deletes must become visible all at
/// once: a reader never sees half of a batch.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Get a value from one tier.
    async fn get_tier_value(
        &self,
        key: &str,
        tier: StorageTier,
    ) -> Result<Option<String>, StorageError>;

    /// Get a value, looking in the session tier first, then the permanent one.
    async fn get_value(&self, key: &str) -> Result<Option<String>, StorageError> {
        if let Some(value) = self.get_tier_value(key, StorageTier::Session).await? {
            return Ok(Some(value));
        }
        self.get_tier_value(key, StorageTier::Permanent).await
    }

    /// Get several values at once, with [`get_value`](Self::get_value) lookup
    /// rules. Backends should read them from a single snapshot.
    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StorageError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get_value(key).await?);
        }
        Ok(values)
    }

    /// Write every entry into `tier` as a single atomic batch.
    async fn save_batch(
        &self,
        tier: StorageTier,
        entries: &[(&str, String)],
    ) -> Result<(), StorageError>;

    /// Write every entry into `tier` and remove the same keys from the other
    /// tier.
    ///
    /// Readers see either the previous values or the new ones, never neither.
    async fn replace_batch(
        &self,
        tier: StorageTier,
        entries: &[(&str, String)],
    ) -> Result<(), StorageError>;

    /// Remove every key from both tiers as a single atomic batch.
    async fn delete_batch(&self, keys: &[&str]) -> Result<(), StorageError>;

    /// Signal fired once the storage has loaded its persisted state.
    fn ready(&self) -> ReadySignal;
}

/// Typed convenience layer over [`SessionStorage`].
#[async_trait]
pub trait SessionStorageExt: SessionStorage {
    /// Get and deserialize a value.
    ///
    /// With `permanent_only` the session tier is skipped.
    async fn get_object<T>(&self, key: &str, permanent_only: bool) -> Result<Option<T>, StorageError>
    where
        T: DeserializeOwned + Send,
    {
        let raw = if permanent_only {
            self.get_tier_value(key, StorageTier::Permanent).await?
        } else {
            self.get_value(key).await?
        };
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Serialize and store a value in the permanent tier.
    async fn save_permanent<T>(&self, value: &T, key: &str) -> Result<(), StorageError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let text = serde_json::to_string(value)?;
        self.save_batch(StorageTier::Permanent, &[(key, text)]).await
    }

    /// Serialize and store a value in the session tier.
    async fn save_session_scoped<T>(&self, value: &T, key: &str) -> Result<(), StorageError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let text = serde_json::to_string(value)?;
        self.save_batch(StorageTier::Session, &[(key, text)]).await
    }

    /// Remove a key from both tiers.
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.delete_batch(&[key]).await
    }
}

impl<S: SessionStorage + ?Sized> SessionStorageExt for S {}

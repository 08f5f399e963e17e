//! In-memory session storage.
//!
//! Both tiers live in process memory. Clones share the same maps, so every
//! handle observes the same session tier, the way browser tabs share synced
//! session storage. Suitable for tests and short-lived processes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use crate::backend::{ReadySignal, SessionStorage, StorageTier};
use crate::error::StorageError;

#[derive(Default)]
struct Tiers {
    permanent: HashMap<String, String>,
    session: HashMap<String, String>,
}

impl Tiers {
    fn tier(&self, tier: StorageTier) -> &HashMap<String, String> {
        match tier {
            StorageTier::Permanent => &self.permanent,
            StorageTier::Session => &self.session,
        }
    }

    fn tier_mut(&mut self, tier: StorageTier) -> &mut HashMap<String, String> {
        match tier {
            StorageTier::Permanent => &mut self.permanent,
            StorageTier::Session => &mut self.session,
        }
    }

    fn lookup(&self, key: &str) -> Option<String> {
        self.session
            .get(key)
            .or_else(|| self.permanent.get(key))
            .cloned()
    }
}

/// In-memory two-tier storage.
#[derive(Clone)]
pub struct MemoryStorage {
    tiers: Arc<RwLock<Tiers>>,
    ready: Arc<watch::Sender<bool>>,
}

impl MemoryStorage {
    /// Creates an empty storage that is ready immediately.
    pub fn new() -> Self {
        let storage = Self::pending();
        storage.mark_ready();
        storage
    }

    /// Creates an empty storage whose ready signal has not fired yet.
    pub fn pending() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tiers: Arc::new(RwLock::new(Tiers::default())),
            ready: Arc::new(tx),
        }
    }

    /// Fires the ready signal.
    pub fn mark_ready(&self) {
        self.ready.send_replace(true);
    }

    /// Returns the keys currently held by `tier`, sorted.
    pub fn keys(&self, tier: StorageTier) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self.read()?.tier(tier).keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tiers>, StorageError> {
        self.tiers
            .read()
            .map_err(|_| StorageError::Io("memory storage lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tiers>, StorageError> {
        self.tiers
            .write()
            .map_err(|_| StorageError::Io("memory storage lock poisoned".into()))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn get_tier_value(
        &self,
        key: &str,
        tier: StorageTier,
    ) -> Result<Option<String>, StorageError> {
        Ok(self.read()?.tier(tier).get(key).cloned())
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read()?.lookup(key))
    }

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StorageError> {
        let tiers = self.read()?;
        Ok(keys.iter().map(|key| tiers.lookup(key)).collect())
    }

    async fn save_batch(
        &self,
        tier: StorageTier,
        entries: &[(&str, String)],
    ) -> Result<(), StorageError> {
        let mut tiers = self.write()?;
        let target = tiers.tier_mut(tier);
        for (key, value) in entries {
            target.insert((*key).to_string(), value.clone());
        }
        debug!(?tier, count = entries.len(), "Saved batch to memory storage");
        Ok(())
    }

    async fn replace_batch(
        &self,
        tier: StorageTier,
        entries: &[(&str, String)],
    ) -> Result<(), StorageError> {
        let mut tiers = self.write()?;
        let other = tiers.tier_mut(tier.other());
        for (key, _) in entries {
            other.remove(*key);
        }
        let target = tiers.tier_mut(tier);
        for (key, value) in entries {
            target.insert((*key).to_string(), value.clone());
        }
        debug!(?tier, count = entries.len(), "Replaced batch in memory storage");
        Ok(())
    }

    async fn delete_batch(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut tiers = self.write()?;
        for key in keys {
            tiers.permanent.remove(*key);
            tiers.session.remove(*key);
        }
        Ok(())
    }

    fn ready(&self) -> ReadySignal {
        ReadySignal::new(self.ready.subscribe())
    }
}

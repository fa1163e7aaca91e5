//! Engine-owned index of where each holon lives.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use hyperdrive_common::{ProviderId, ProviderKey};

/// Provider keys and last written version for one holon.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub provider_keys: BTreeMap<ProviderId, ProviderKey>,
    pub version: u64,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub(crate) struct HolonDirectory {
    entries: DashMap<Uuid, DirectoryEntry>,
}

impl HolonDirectory {
    pub(crate) fn get(&self, id: &Uuid) -> Option<DirectoryEntry> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    /// Merges successful writes into the entry. Keys are only ever added here,
    /// so a concurrent writer cannot drop another writer's key.
    pub(crate) fn record_writes(
        &self,
        id: Uuid,
        keys: &BTreeMap<ProviderId, ProviderKey>,
        version: u64,
        deleted_at: Option<DateTime<Utc>>,
    ) {
        let mut entry = self.entries.entry(id).or_default();
        for (provider, key) in keys {
            entry.provider_keys.insert(provider.clone(), key.clone());
        }
        entry.version = entry.version.max(version);
        if deleted_at.is_some() {
            entry.deleted_at = deleted_at;
        }
    }

    /// Installs keys found on the providers for an id with no entry yet.
    /// The version is learned from the first read.
    pub(crate) fn adopt(
        &self,
        id: Uuid,
        keys: BTreeMap<ProviderId, ProviderKey>,
    ) -> DirectoryEntry {
        let mut entry = self.entries.entry(id).or_default();
        for (provider, key) in keys {
            entry.provider_keys.entry(provider).or_insert(key);
        }
        entry.value().clone()
    }

    /// Raises the known version and records a tombstone seen on a read.
    pub(crate) fn observe(&self, id: &Uuid, version: u64, deleted_at: Option<DateTime<Utc>>) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.version = entry.version.max(version);
            if entry.deleted_at.is_none() {
                entry.deleted_at = deleted_at;
            }
        }
    }

    pub(crate) fn remove_key(&self, id: &Uuid, provider: &ProviderId) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.provider_keys.remove(provider);
        }
    }

    /// Drops the entry once no provider holds the holon any more.
    pub(crate) fn remove_if_empty(&self, id: &Uuid) -> bool {
        self.entries
            .remove_if(id, |_, entry| entry.provider_keys.is_empty())
            .is_some()
    }
}

//! In-memory storage provider.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use hyperdrive_common::{
    Capability, HdResult, HyperDriveError, Provider, ProviderCategory, ProviderId, ProviderKey,
};

use crate::holon::Holon;
use crate::provider::HolonProvider;

/// Keeps holons in a map. Useful as a cache tier and in tests.
pub struct InMemoryHolonProvider {
    id: ProviderId,
    records: RwLock<HashMap<ProviderKey, Holon>>,
    online: AtomicBool,
}

impl InMemoryHolonProvider {
    pub fn new(id: impl Into<ProviderId>) -> Self {
        Self {
            id: id.into(),
            records: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
        }
    }

    /// Capabilities to declare when registering this provider.
    pub fn capabilities() -> [Capability; 3] {
        Capability::holon_storage()
    }

    /// Simulate an outage: every call fails with `ProviderUnavailable`.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn key_for(&self, holon: &Holon) -> ProviderKey {
        holon
            .provider_key(&self.id)
            .cloned()
            .unwrap_or_else(|| ProviderKey::new(format!("{}:{}", self.id, holon.id)))
    }

    fn ensure_online(&self) -> HdResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(HyperDriveError::unavailable(format!("{} is offline", self.id)))
        }
    }
}

#[async_trait]
impl Provider for InMemoryHolonProvider {
    fn provider_id(&self) -> &ProviderId {
        &self.id
    }

    fn category(&self) -> ProviderCategory {
        ProviderCategory::Storage
    }

    async fn health_check(&self) -> HdResult<()> {
        self.ensure_online()
    }
}

#[async_trait]
impl HolonProvider for InMemoryHolonProvider {
    async fn save_holon(&self, holon: &Holon) -> HdResult<ProviderKey> {
        self.ensure_online()?;
        let key = self.key_for(holon);
        self.records.write().await.insert(key.clone(), holon.clone());
        Ok(key)
    }

    async fn load_holon(&self, key: &ProviderKey) -> HdResult<Holon> {
        self.ensure_online()?;
        self.records
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| HyperDriveError::not_found(format!("{} has no record {key}", self.id)))
    }

    async fn locate_holon(&self, id: Uuid) -> HdResult<ProviderKey> {
        self.ensure_online()?;
        self.records
            .read()
            .await
            .iter()
            .find(|(_, holon)| holon.id == id)
            .map(|(key, _)| key.clone())
            .ok_or_else(|| HyperDriveError::not_found(format!("{} holds no holon {id}", self.id)))
    }

    async fn delete_holon(&self, key: &ProviderKey) -> HdResult<()> {
        self.ensure_online()?;
        match self.records.write().await.remove(key) {
            Some(_) => Ok(()),
            None => Err(HyperDriveError::not_found(format!(
                "{} has no record {key}",
                self.id
            ))),
        }
    }
}

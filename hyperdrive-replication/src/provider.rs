//! Storage provider capability interface.

use async_trait::async_trait;
use uuid::Uuid;

use hyperdrive_common::{HdResult, HyperDriveError, Provider, ProviderKey};

use crate::holon::Holon;

/// A storage backend that can hold holons.
///
/// Each operation defaults to `CapabilityNotSupported`; adapters override
/// what they implement and declare the matching capabilities on
/// registration so the router never calls the defaults.
#[async_trait]
pub trait HolonProvider: Provider {
    /// Persist `holon`, returning this backend's key for it. Writing a holon
    /// that already has a key on this provider updates the existing record.
    async fn save_holon(&self, holon: &Holon) -> HdResult<ProviderKey> {
        let _ = holon;
        Err(HyperDriveError::not_supported("save_holon", self.provider_id()))
    }

    async fn load_holon(&self, key: &ProviderKey) -> HdResult<Holon> {
        let _ = key;
        Err(HyperDriveError::not_supported("load_holon", self.provider_id()))
    }

    /// This backend's key for holon `id`, for holons the engine has no
    /// directory entry for (e.g. written before a restart).
    async fn locate_holon(&self, id: Uuid) -> HdResult<ProviderKey> {
        let _ = id;
        Err(HyperDriveError::not_supported("locate_holon", self.provider_id()))
    }

    /// Physically remove the record.
    async fn delete_holon(&self, key: &ProviderKey) -> HdResult<()> {
        let _ = key;
        Err(HyperDriveError::not_supported("delete_holon", self.provider_id()))
    }
}

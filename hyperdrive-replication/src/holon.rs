//! The Holon: a generic, versioned, replicable unit of data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use hyperdrive_common::{ProviderId, ProviderKey};

/// Kind of record a holon carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HolonType {
    #[default]
    Holon,
    Avatar,
    Zome,
    Mission,
    Quest,
    Park,
    Document,
}

/// A logical record replicated across providers.
///
/// `provider_keys` and `version` are maintained by the replication engine;
/// callers can read them but not set them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holon {
    pub id: Uuid,
    pub holon_type: HolonType,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub metadata: BTreeMap<String, String>,
    pub(crate) version: u64,
    pub(crate) provider_keys: BTreeMap<ProviderId, ProviderKey>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub(crate) deleted_at: Option<DateTime<Utc>>,
}

impl Holon {
    pub fn new(holon_type: HolonType, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            holon_type,
            parent_id: None,
            name: name.into(),
            metadata: BTreeMap::new(),
            version: 0,
            provider_keys: BTreeMap::new(),
            created_at: now,
            modified_at: now,
            deleted_at: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Number of successful writes this holon has been through.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn provider_keys(&self) -> &BTreeMap<ProviderId, ProviderKey> {
        &self.provider_keys
    }

    pub fn provider_key(&self, provider: &ProviderId) -> Option<&ProviderKey> {
        self.provider_keys.get(provider)
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

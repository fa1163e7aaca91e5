//! HyperDrive replication engine.
//!
//! ```text
//!   save(holon) ──► select_for(SaveHolon) ──► provider 1 ─┐ retry with backoff,
//!                                             provider 2 ─┤ stop at min_success
//!                                             ...        ─┘
//!   load(id)    ──► directory keys ∩ select_for(LoadHolon) ──► first success
//!                                                              or highest version
//! ```
//!
//! Writes to the same holon id are serialized by a per-id lock held for the
//! whole fan-out. Provider keys are merged into an engine-owned directory,
//! never replaced, so concurrent writers cannot lose each other's keys.
//!
//! The directory is rebuilt on demand: an id it has never seen is located on
//! the providers (`locate_holon`) before `load`, `delete` or `purge` give up.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use hyperdrive_common::{
    with_timeout, Capability, ErrorKind, HdResult, HyperDriveError, ProviderFailure, ProviderId,
    ProviderRegistry, ReadConsistency, ReplicationPolicy, ResultExt,
};

use crate::directory::{DirectoryEntry, HolonDirectory};
use crate::holon::Holon;
use crate::provider::HolonProvider;

/// Registry of storage providers.
pub type HolonRegistry = ProviderRegistry<dyn HolonProvider>;

// ═══════════════════════════════════════════════════════════════════════════════
// OUTCOMES
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of a write that met its replication floor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SaveOutcome {
    /// The holon as persisted, with every known provider key.
    pub holon: Holon,
    /// Providers that accepted this write, in the order they were tried.
    pub written_to: Vec<ProviderId>,
    /// Providers that failed along the way. Diagnostic only.
    pub failures: Vec<ProviderFailure>,
}

/// A provider answered with an older version than the engine expected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSkew {
    pub provider_id: ProviderId,
    pub returned_version: u64,
    pub expected_version: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoadOutcome {
    pub holon: Holon,
    pub served_by: ProviderId,
    pub failures: Vec<ProviderFailure>,
    /// Stale responses seen during this read. Reported, not reconciled.
    pub skew: Vec<VersionSkew>,
}

impl LoadOutcome {
    pub fn is_consistent(&self) -> bool {
        self.skew.is_empty()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PurgeOutcome {
    pub removed_from: Vec<ProviderId>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// HOLON MANAGER
// ═══════════════════════════════════════════════════════════════════════════════

/// Replicates holons across the providers in a [`HolonRegistry`].
pub struct HolonManager {
    registry: Arc<HolonRegistry>,
    directory: HolonDirectory,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    default_policy: ReplicationPolicy,
}

impl HolonManager {
    pub fn new(registry: Arc<HolonRegistry>) -> Self {
        Self {
            registry,
            directory: HolonDirectory::default(),
            locks: DashMap::new(),
            default_policy: ReplicationPolicy::default(),
        }
    }

    pub fn with_default_policy(mut self, policy: ReplicationPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn registry(&self) -> &Arc<HolonRegistry> {
        &self.registry
    }

    pub fn default_policy(&self) -> &ReplicationPolicy {
        &self.default_policy
    }

    /// Where the engine believes the holon lives.
    pub fn directory_entry(&self, id: &Uuid) -> Option<DirectoryEntry> {
        self.directory.get(id)
    }

    fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Writes `holon` to at least `policy.min_success` providers.
    ///
    /// Providers are tried in priority order; the call stops as soon as the
    /// floor is met. Failing providers are reported in the outcome.
    pub async fn save(&self, holon: Holon, policy: &ReplicationPolicy) -> HdResult<SaveOutcome> {
        policy.validate()?;
        let lock = self.lock_for(holon.id);
        let _guard = lock.lock().await;

        if let Some(entry) = self.directory.get(&holon.id) {
            if entry.deleted_at.is_some() {
                return Err(HyperDriveError::deleted(format!(
                    "holon {} has been deleted",
                    holon.id
                )));
            }
        }
        self.write_locked(holon, policy).await
    }

    async fn write_locked(
        &self,
        mut holon: Holon,
        policy: &ReplicationPolicy,
    ) -> HdResult<SaveOutcome> {
        let known = self.directory.get(&holon.id).unwrap_or_default();
        holon.version = known.version.max(holon.version) + 1;
        holon.modified_at = Utc::now();
        // Existing keys ride along so adapters update in place.
        for (provider, key) in &known.provider_keys {
            holon
                .provider_keys
                .entry(provider.clone())
                .or_insert_with(|| key.clone());
        }

        let candidates = self
            .registry
            .select_for(Capability::SaveHolon, &HashSet::new())
            .await;
        if candidates.is_empty() {
            return Err(HyperDriveError::no_provider(
                "no active provider can save holons",
            ));
        }

        let required = policy.min_success as usize;
        let candidate_count = candidates.len();
        let mut written = BTreeMap::new();
        let mut written_to = Vec::new();
        let mut failures = Vec::new();

        for provider in candidates {
            if written_to.len() >= required {
                break;
            }
            let provider_id = provider.provider_id().clone();
            let attempt = self
                .call_provider(&provider, policy, "save_holon", || provider.save_holon(&holon))
                .await;
            match attempt {
                Ok(key) => {
                    tracing::debug!(holon = %holon.id, provider = %provider_id, key = %key, "Holon written");
                    written.insert(provider_id.clone(), key);
                    written_to.push(provider_id);
                }
                Err(failure) => failures.push(failure),
            }
        }

        let met = written_to.len() >= required;
        if !written.is_empty() {
            let tombstone = if met { holon.deleted_at } else { None };
            self.directory
                .record_writes(holon.id, &written, holon.version, tombstone);
        }
        if let Some(entry) = self.directory.get(&holon.id) {
            holon.provider_keys = entry.provider_keys;
        }

        if met {
            tracing::info!(
                holon = %holon.id,
                version = holon.version,
                written = written_to.len(),
                failed = failures.len(),
                "Holon saved"
            );
            Ok(SaveOutcome {
                holon,
                written_to,
                failures,
            })
        } else {
            tracing::error!(
                holon = %holon.id,
                written = written_to.len(),
                required,
                candidates = candidate_count,
                "Holon save did not reach replication floor"
            );
            Err(HyperDriveError::partial_failure(
                format!(
                    "holon {} written to {} of {} required providers ({} candidates)",
                    holon.id,
                    written_to.len(),
                    required,
                    candidate_count
                ),
                failures,
            ))
        }
    }

    /// Reads a holon from the providers known to hold it.
    pub async fn load(&self, id: Uuid, policy: &ReplicationPolicy) -> HdResult<LoadOutcome> {
        policy.validate()?;
        let entry = self.entry_for(id, policy).await?;
        if entry.deleted_at.is_some() {
            return Err(HyperDriveError::deleted(format!("holon {id} has been deleted")));
        }
        self.load_entry(id, &entry, policy).await
    }

    async fn load_entry(
        &self,
        id: Uuid,
        entry: &DirectoryEntry,
        policy: &ReplicationPolicy,
    ) -> HdResult<LoadOutcome> {
        let candidates: Vec<_> = self
            .registry
            .select_for(Capability::LoadHolon, &HashSet::new())
            .await
            .into_iter()
            .filter(|provider| entry.provider_keys.contains_key(provider.provider_id()))
            .collect();
        if candidates.is_empty() {
            return Err(HyperDriveError::no_provider(format!(
                "no active provider holds holon {id}"
            )));
        }

        let candidate_count = candidates.len();
        let mut failures = Vec::new();
        let mut responses: Vec<(ProviderId, Holon)> = Vec::new();

        for provider in candidates {
            let provider_id = provider.provider_id().clone();
            let Some(key) = entry.provider_keys.get(&provider_id) else {
                continue;
            };
            let attempt = self
                .call_provider(&provider, policy, "load_holon", || provider.load_holon(key))
                .await;
            match attempt {
                Ok(holon) if holon.id != id => {
                    failures.push(ProviderFailure {
                        provider_id,
                        kind: ErrorKind::Internal,
                        message: format!("key {key} resolved to holon {}", holon.id),
                        attempts: 1,
                    });
                }
                Ok(holon) => {
                    responses.push((provider_id, holon));
                    if policy.read_consistency == ReadConsistency::FirstSuccess {
                        break;
                    }
                }
                Err(failure) => failures.push(failure),
            }
        }

        if responses.is_empty() {
            if failures.iter().all(|f| f.kind == ErrorKind::NotFound) {
                return Err(
                    HyperDriveError::not_found(format!("holon {id} not found on any provider"))
                        .with_failures(failures),
                );
            }
            return Err(HyperDriveError::no_provider(format!(
                "all {candidate_count} providers holding holon {id} failed"
            ))
            .with_failures(failures));
        }

        let chosen = match policy.read_consistency {
            ReadConsistency::FirstSuccess => 0,
            ReadConsistency::HighestVersion => responses
                .iter()
                .enumerate()
                .max_by_key(|(index, (_, holon))| (holon.version, Reverse(*index)))
                .map(|(index, _)| index)
                .unwrap_or(0),
        };

        let newest = responses
            .iter()
            .map(|(_, holon)| holon.version)
            .max()
            .unwrap_or(0)
            .max(entry.version);
        let skew: Vec<VersionSkew> = responses
            .iter()
            .filter(|(_, holon)| holon.version < newest)
            .map(|(provider_id, holon)| VersionSkew {
                provider_id: provider_id.clone(),
                returned_version: holon.version,
                expected_version: newest,
            })
            .collect();
        for gap in &skew {
            tracing::warn!(
                holon = %id,
                provider = %gap.provider_id,
                returned = gap.returned_version,
                expected = gap.expected_version,
                "Provider returned a stale holon version"
            );
        }

        let (served_by, mut holon) = responses.swap_remove(chosen);
        self.directory.observe(&id, newest, holon.deleted_at);
        if holon.is_deleted() {
            return Err(HyperDriveError::deleted(format!("holon {id} has been deleted")));
        }
        holon.provider_keys = entry.provider_keys.clone();
        tracing::debug!(holon = %id, provider = %served_by, version = holon.version, "Holon loaded");

        Ok(LoadOutcome {
            holon,
            served_by,
            failures,
            skew,
        })
    }

    /// Soft-deletes a holon by writing a tombstone through the normal write path.
    pub async fn delete(&self, id: Uuid, policy: &ReplicationPolicy) -> HdResult<SaveOutcome> {
        policy.validate()?;
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let entry = self.entry_for(id, policy).await?;
        if entry.deleted_at.is_some() {
            return Err(HyperDriveError::deleted(format!(
                "holon {id} is already deleted"
            )));
        }

        let current = self
            .load_entry(id, &entry, policy)
            .await
            .context(format!("loading holon {id} before delete"))?;
        let mut holon = current.holon;
        holon.deleted_at = Some(Utc::now());

        let outcome = self.write_locked(holon, policy).await?;
        tracing::info!(holon = %id, version = outcome.holon.version, "Holon soft-deleted");
        Ok(outcome)
    }

    /// Physically removes a holon from every provider holding it.
    ///
    /// Intended for retention cleanup of tombstoned holons; regular deletes
    /// go through [`HolonManager::delete`].
    pub async fn purge(&self, id: Uuid, policy: &ReplicationPolicy) -> HdResult<PurgeOutcome> {
        policy.validate()?;
        let lock = self.lock_for(id);
        let outcome = {
            let _guard = lock.lock().await;
            self.purge_locked(id, policy).await
        };
        drop(lock);
        // Writers queued on this id still hold a clone and keep the entry.
        self.locks.remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
        outcome
    }

    async fn purge_locked(&self, id: Uuid, policy: &ReplicationPolicy) -> HdResult<PurgeOutcome> {
        let entry = self.entry_for(id, policy).await?;
        let deleters = self
            .registry
            .select_for(Capability::DeleteHolon, &HashSet::new())
            .await;

        let mut removed_from = Vec::new();
        let mut failures = Vec::new();
        for (provider_id, key) in &entry.provider_keys {
            let Some(provider) = deleters.iter().find(|p| p.provider_id() == provider_id) else {
                let kind = if self
                    .registry
                    .supports(provider_id, Capability::DeleteHolon)
                    .await
                {
                    ErrorKind::ProviderUnavailable
                } else {
                    ErrorKind::CapabilityNotSupported
                };
                failures.push(ProviderFailure {
                    provider_id: provider_id.clone(),
                    kind,
                    message: "provider cannot delete holons right now".into(),
                    attempts: 0,
                });
                continue;
            };

            let attempt = self
                .call_provider(provider, policy, "delete_holon", || provider.delete_holon(key))
                .await;
            match attempt {
                Ok(()) => {}
                Err(failure) if failure.kind == ErrorKind::NotFound => {}
                Err(failure) => {
                    failures.push(failure);
                    continue;
                }
            }
            self.directory.remove_key(&id, provider_id);
            removed_from.push(provider_id.clone());
        }
        self.directory.remove_if_empty(&id);

        if failures.is_empty() {
            tracing::info!(holon = %id, providers = removed_from.len(), "Holon purged");
            Ok(PurgeOutcome { removed_from })
        } else {
            Err(HyperDriveError::partial_failure(
                format!(
                    "holon {id} purged from {} of {} providers",
                    removed_from.len(),
                    entry.provider_keys.len()
                ),
                failures,
            ))
        }
    }

    /// The directory entry for `id`, locating the holon on the providers when
    /// this engine has not seen it yet.
    async fn entry_for(&self, id: Uuid, policy: &ReplicationPolicy) -> HdResult<DirectoryEntry> {
        if let Some(entry) = self.directory.get(&id) {
            return Ok(entry);
        }

        let candidates = self
            .registry
            .select_for(Capability::LoadHolon, &HashSet::new())
            .await;
        let mut found = BTreeMap::new();
        let mut failures = Vec::new();
        for provider in candidates {
            let attempt = self
                .call_provider(&provider, policy, "locate_holon", || provider.locate_holon(id))
                .await;
            match attempt {
                Ok(key) => {
                    found.insert(provider.provider_id().clone(), key);
                }
                Err(failure) => failures.push(failure),
            }
        }

        if found.is_empty() {
            let unavailable: Vec<_> = failures
                .into_iter()
                .filter(|f| {
                    !matches!(f.kind, ErrorKind::NotFound | ErrorKind::CapabilityNotSupported)
                })
                .collect();
            if unavailable.is_empty() {
                return Err(HyperDriveError::not_found(format!("holon {id} not found")));
            }
            return Err(HyperDriveError::no_provider(format!(
                "holon {id} is unknown and {} providers could not be searched",
                unavailable.len()
            ))
            .with_failures(unavailable));
        }

        tracing::info!(holon = %id, providers = found.len(), "Located holon on providers");
        Ok(self.directory.adopt(id, found))
    }

    /// One provider call with per-attempt timeout and exponential backoff.
    ///
    /// Transient failures are retried up to `max_attempts`; every failed
    /// attempt that reflects on the provider is reported to the registry.
    async fn call_provider<T, F, Fut>(
        &self,
        provider: &Arc<dyn HolonProvider>,
        policy: &ReplicationPolicy,
        operation: &str,
        mut call: F,
    ) -> Result<T, ProviderFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HdResult<T>>,
    {
        let provider_id = provider.provider_id().clone();
        let max_attempts = policy.retry.max_attempts;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match with_timeout(policy.attempt_timeout(), operation, call()).await {
                Ok(value) => {
                    self.registry.record_success(&provider_id).await;
                    return Ok(value);
                }
                Err(e) => e,
            };

            if error.kind.counts_against_health() {
                self.registry
                    .record_failure_within(&provider_id, max_attempts)
                    .await;
            }
            if !error.is_retryable() || attempt >= max_attempts {
                tracing::warn!(
                    provider = %provider_id,
                    operation,
                    attempts = attempt,
                    error = %error,
                    "Provider call failed"
                );
                return Err(ProviderFailure::from_error(provider_id, &error, attempt));
            }

            let delay = policy.retry.delay_for(attempt);
            tracing::debug!(
                provider = %provider_id,
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying provider call"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holon::HolonType;
    use crate::memory::InMemoryHolonProvider;
    use hyperdrive_common::{HealthPolicy, RetryPolicy};

    async fn manager_with(providers: &[(&str, u32)]) -> HolonManager {
        let registry = Arc::new(HolonRegistry::new(HealthPolicy::default()));
        for (name, priority) in providers {
            registry
                .register(
                    Arc::new(InMemoryHolonProvider::new(*name)),
                    Capability::holon_storage(),
                    *priority,
                )
                .await
                .unwrap();
        }
        HolonManager::new(registry)
    }

    fn quick() -> ReplicationPolicy {
        ReplicationPolicy::default().with_retry(RetryPolicy::no_retry())
    }

    #[tokio::test]
    async fn test_save_bumps_version_and_records_keys() {
        let manager = manager_with(&[("mongo", 1), ("ipfs", 2)]).await;
        let holon = Holon::new(HolonType::Document, "readme");

        let outcome = manager.save(holon, &quick().with_min_success(2)).await.unwrap();
        assert_eq!(outcome.holon.version(), 1);
        assert_eq!(outcome.holon.provider_keys().len(), 2);
        assert!(outcome.failures.is_empty());

        let again = manager
            .save(outcome.holon.clone(), &quick())
            .await
            .unwrap();
        assert_eq!(again.holon.version(), 2);
        assert_eq!(again.written_to, vec![ProviderId::from("mongo")]);
        // Keys from the first write survive a narrower second write.
        assert_eq!(again.holon.provider_keys().len(), 2);
    }

    #[tokio::test]
    async fn test_save_without_providers() {
        let manager = manager_with(&[]).await;
        let err = manager
            .save(Holon::new(HolonType::Holon, "orphan"), &quick())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoProviderAvailable);
    }

    #[tokio::test]
    async fn test_invalid_policy_rejected() {
        let manager = manager_with(&[("mongo", 1)]).await;
        let err = manager
            .save(Holon::new(HolonType::Holon, "x"), &quick().with_min_success(0))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_load_unknown_is_not_found() {
        let manager = manager_with(&[("mongo", 1)]).await;
        let err = manager.load(Uuid::new_v4(), &quick()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_delete_then_load_is_deleted() {
        let manager = manager_with(&[("mongo", 1)]).await;
        let saved = manager
            .save(Holon::new(HolonType::Avatar, "alice"), &quick())
            .await
            .unwrap();
        let id = saved.holon.id;

        let tombstone = manager.delete(id, &quick()).await.unwrap();
        assert!(tombstone.holon.is_deleted());
        assert_eq!(tombstone.holon.version(), 2);

        let err = manager.load(id, &quick()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Deleted);

        let err = manager.save(saved.holon, &quick()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Deleted);
    }

    #[tokio::test]
    async fn test_fresh_manager_locates_stored_holon() {
        let writer = manager_with(&[("mongo", 1), ("ipfs", 2)]).await;
        let saved = writer
            .save(Holon::new(HolonType::Avatar, "bob"), &quick().with_min_success(2))
            .await
            .unwrap();
        let id = saved.holon.id;

        let reader = HolonManager::new(Arc::clone(writer.registry()));
        assert!(reader.directory_entry(&id).is_none());
        let loaded = reader.load(id, &quick()).await.unwrap();
        assert_eq!(loaded.holon.name, "bob");
        assert_eq!(loaded.holon.provider_keys().len(), 2);

        let entry = reader.directory_entry(&id).unwrap();
        assert_eq!(entry.version, 1);

        // The next write continues the version sequence.
        let again = reader.save(loaded.holon, &quick()).await.unwrap();
        assert_eq!(again.holon.version(), 2);
    }

    #[tokio::test]
    async fn test_fresh_manager_sees_tombstone() {
        let writer = manager_with(&[("mongo", 1)]).await;
        let saved = writer
            .save(Holon::new(HolonType::Quest, "gone"), &quick())
            .await
            .unwrap();
        writer.delete(saved.holon.id, &quick()).await.unwrap();

        let reader = HolonManager::new(Arc::clone(writer.registry()));
        let err = reader.load(saved.holon.id, &quick()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Deleted);
        let err = reader.save(saved.holon, &quick()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Deleted);
    }

    #[tokio::test]
    async fn test_purge_releases_holon_lock() {
        let manager = manager_with(&[("mongo", 1)]).await;
        let saved = manager
            .save(Holon::new(HolonType::Quest, "q"), &quick())
            .await
            .unwrap();
        assert!(manager.locks.contains_key(&saved.holon.id));

        manager.purge(saved.holon.id, &quick()).await.unwrap();
        assert!(!manager.locks.contains_key(&saved.holon.id));
    }

    #[tokio::test]
    async fn test_purge_removes_directory_entry() {
        let manager = manager_with(&[("mongo", 1), ("ipfs", 2)]).await;
        let saved = manager
            .save(Holon::new(HolonType::Quest, "q"), &quick().with_min_success(2))
            .await
            .unwrap();
        let id = saved.holon.id;

        let outcome = manager.purge(id, &quick()).await.unwrap();
        assert_eq!(outcome.removed_from.len(), 2);
        assert!(manager.directory_entry(&id).is_none());
        assert_eq!(
            manager.load(id, &quick()).await.unwrap_err().kind,
            ErrorKind::NotFound
        );
    }
}

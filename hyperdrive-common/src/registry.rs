//! Provider registry and router.
//!
//! Holds registered adapters with their declared capabilities, priority and
//! health, and answers "which providers may serve this operation, in what
//! order". The registry is generic over the adapter trait object so the holon
//! engine and the bridge orchestrator share one implementation:
//!
//! ```text
//!   HolonManager ──┐                      ┌── dyn HolonProvider
//!                  ├── ProviderRegistry<A> ┤
//!   Orchestrator ──┘   (RwLock<HashMap>)   └── dyn BridgeAdapter
//! ```
//!
//! Selection is a pure function over a snapshot of the registrations, so
//! callers may re-select on every retry with a growing exclusion set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::HealthPolicy;
use crate::error::{HdResult, HyperDriveError};
use crate::types::{Capability, ProviderCategory, ProviderHealth, ProviderId};

// ═══════════════════════════════════════════════════════════════════════════════
// PROVIDER TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Behaviour every registrable adapter shares.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier, unique within a registry.
    fn provider_id(&self) -> &ProviderId;

    fn category(&self) -> ProviderCategory {
        ProviderCategory::Storage
    }

    /// Cheap liveness probe used to revive degraded providers.
    async fn health_check(&self) -> HdResult<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// A registered adapter and its routing state.
pub struct ProviderRegistration<A: ?Sized> {
    pub adapter: Arc<A>,
    pub capabilities: BTreeSet<Capability>,
    /// Lower is preferred.
    pub priority: u32,
    pub health: ProviderHealth,
    pub last_activated_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    /// Failed attempts since the last success, across calls.
    pub consecutive_failures: u32,
}

impl<A: ?Sized> Clone for ProviderRegistration<A> {
    fn clone(&self) -> Self {
        Self {
            adapter: Arc::clone(&self.adapter),
            capabilities: self.capabilities.clone(),
            priority: self.priority,
            health: self.health,
            last_activated_at: self.last_activated_at,
            registered_at: self.registered_at,
            consecutive_failures: self.consecutive_failures,
        }
    }
}

impl<A: ?Sized> ProviderRegistration<A> {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Read-only view of a registration, without the adapter handle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationInfo {
    pub provider_id: ProviderId,
    pub category: ProviderCategory,
    pub capabilities: BTreeSet<Capability>,
    pub priority: u32,
    pub health: ProviderHealth,
    pub last_activated_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    pub consecutive_failures: u32,
}

/// Ordered candidates for `capability`: Active only, by priority then id.
pub fn select_candidates<'a, A, I>(
    registrations: I,
    capability: Capability,
    excluding: &HashSet<ProviderId>,
) -> Vec<(&'a ProviderId, &'a ProviderRegistration<A>)>
where
    A: ?Sized + 'a,
    I: IntoIterator<Item = (&'a ProviderId, &'a ProviderRegistration<A>)>,
{
    let mut candidates: Vec<_> = registrations
        .into_iter()
        .filter(|(id, reg)| {
            reg.health == ProviderHealth::Active
                && reg.supports(capability)
                && !excluding.contains(*id)
        })
        .collect();
    candidates.sort_by(|(a_id, a), (b_id, b)| a.priority.cmp(&b.priority).then(a_id.cmp(b_id)));
    candidates
}

/// Parses a comma-separated provider list such as `"mongo, ipfs,neo4j"`.
pub fn parse_provider_list(list: &str) -> HdResult<Vec<ProviderId>> {
    let mut seen = HashSet::new();
    let mut providers = Vec::new();
    for raw in list.split(',') {
        let name = raw.trim();
        if name.is_empty() {
            return Err(HyperDriveError::validation(format!(
                "empty entry in provider list '{list}'"
            )));
        }
        let id = ProviderId::from(name);
        if seen.insert(id.clone()) {
            providers.push(id);
        }
    }
    Ok(providers)
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// Registry of adapters of one kind.
pub struct ProviderRegistry<A: ?Sized> {
    registrations: RwLock<HashMap<ProviderId, ProviderRegistration<A>>>,
    health_policy: HealthPolicy,
}

impl<A: Provider + ?Sized> ProviderRegistry<A> {
    pub fn new(health_policy: HealthPolicy) -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            health_policy,
        }
    }

    pub fn health_policy(&self) -> &HealthPolicy {
        &self.health_policy
    }

    /// Adds or replaces a registration.
    ///
    /// Replacing an id with a different capability set fails with
    /// `DuplicateProvider`; use [`ProviderRegistry::register_with_override`].
    pub async fn register(
        &self,
        adapter: Arc<A>,
        capabilities: impl IntoIterator<Item = Capability>,
        priority: u32,
    ) -> HdResult<()> {
        self.insert(adapter, capabilities.into_iter().collect(), priority, false)
            .await
    }

    /// Adds or replaces a registration regardless of the previous capability set.
    pub async fn register_with_override(
        &self,
        adapter: Arc<A>,
        capabilities: impl IntoIterator<Item = Capability>,
        priority: u32,
    ) -> HdResult<()> {
        self.insert(adapter, capabilities.into_iter().collect(), priority, true)
            .await
    }

    async fn insert(
        &self,
        adapter: Arc<A>,
        capabilities: BTreeSet<Capability>,
        priority: u32,
        override_existing: bool,
    ) -> HdResult<()> {
        let id = adapter.provider_id().clone();
        let mut registrations = self.registrations.write().await;

        match registrations.get_mut(&id) {
            Some(existing) => {
                if existing.capabilities != capabilities && !override_existing {
                    return Err(HyperDriveError::new(
                        crate::error::ErrorKind::DuplicateProvider,
                        format!("{id} is already registered with different capabilities"),
                    ));
                }
                existing.adapter = adapter;
                existing.capabilities = capabilities;
                existing.priority = priority;
                tracing::info!(provider = %id, priority, "Replaced provider registration");
            }
            None => {
                let now = Utc::now();
                tracing::info!(
                    provider = %id,
                    category = ?adapter.category(),
                    priority,
                    capabilities = ?capabilities,
                    "Registered provider"
                );
                registrations.insert(
                    id,
                    ProviderRegistration {
                        adapter,
                        capabilities,
                        priority,
                        health: ProviderHealth::Active,
                        last_activated_at: Some(now),
                        registered_at: now,
                        consecutive_failures: 0,
                    },
                );
            }
        }
        Ok(())
    }

    pub async fn unregister(&self, provider_id: &ProviderId) -> HdResult<()> {
        match self.registrations.write().await.remove(provider_id) {
            Some(_) => {
                tracing::info!(provider = %provider_id, "Unregistered provider");
                Ok(())
            }
            None => Err(unknown(provider_id)),
        }
    }

    /// Moves a provider's health toward `target`, one adjacent step at a time.
    pub async fn set_health(
        &self,
        provider_id: &ProviderId,
        target: ProviderHealth,
    ) -> HdResult<ProviderHealth> {
        let mut registrations = self.registrations.write().await;
        let reg = registrations
            .get_mut(provider_id)
            .ok_or_else(|| unknown(provider_id))?;
        walk_health(provider_id, reg, target);
        Ok(reg.health)
    }

    /// Ordered list of active providers declaring `capability`.
    pub async fn select_for(
        &self,
        capability: Capability,
        excluding: &HashSet<ProviderId>,
    ) -> Vec<Arc<A>> {
        self.select_matching(capability, excluding, |_| true).await
    }

    /// [`ProviderRegistry::select_for`] narrowed by an adapter-level predicate.
    pub async fn select_matching<F>(
        &self,
        capability: Capability,
        excluding: &HashSet<ProviderId>,
        predicate: F,
    ) -> Vec<Arc<A>>
    where
        F: Fn(&A) -> bool,
    {
        let registrations = self.registrations.read().await;
        let selected: Vec<Arc<A>> = select_candidates(registrations.iter(), capability, excluding)
            .into_iter()
            .filter(|(_, reg)| predicate(reg.adapter.as_ref()))
            .map(|(_, reg)| Arc::clone(&reg.adapter))
            .collect();
        tracing::debug!(
            capability = %capability,
            excluded = excluding.len(),
            selected = selected.len(),
            "Selected providers"
        );
        selected
    }

    /// Whether any registration, healthy or not, declares `capability` and
    /// satisfies `predicate`.
    pub async fn any_registered<F>(&self, capability: Capability, predicate: F) -> bool
    where
        F: Fn(&A) -> bool,
    {
        self.registrations
            .read()
            .await
            .values()
            .any(|reg| reg.supports(capability) && predicate(reg.adapter.as_ref()))
    }

    /// Clears the consecutive-failure counter after a successful call.
    pub async fn record_success(&self, provider_id: &ProviderId) {
        if let Some(reg) = self.registrations.write().await.get_mut(provider_id) {
            reg.consecutive_failures = 0;
        }
    }

    /// Counts a failed attempt and downgrades health once the registry's
    /// [`HealthPolicy`] thresholds are crossed.
    pub async fn record_failure(&self, provider_id: &ProviderId) -> Option<ProviderHealth> {
        self.count_failure(provider_id, self.health_policy.degrade_after)
            .await
    }

    /// [`ProviderRegistry::record_failure`] for a caller that gives up on a
    /// provider after `attempt_budget` attempts. The provider degrades at
    /// whichever threshold comes first.
    pub async fn record_failure_within(
        &self,
        provider_id: &ProviderId,
        attempt_budget: u32,
    ) -> Option<ProviderHealth> {
        let threshold = attempt_budget.min(self.health_policy.degrade_after);
        self.count_failure(provider_id, threshold).await
    }

    async fn count_failure(
        &self,
        provider_id: &ProviderId,
        degrade_after: u32,
    ) -> Option<ProviderHealth> {
        let mut registrations = self.registrations.write().await;
        let reg = registrations.get_mut(provider_id)?;
        reg.consecutive_failures = reg.consecutive_failures.saturating_add(1);

        let target = if reg.consecutive_failures >= self.health_policy.deactivate_after {
            ProviderHealth::Inactive
        } else if reg.consecutive_failures >= degrade_after.max(1) {
            ProviderHealth::Degraded
        } else {
            ProviderHealth::Active
        };
        if reg.health.is_better_than(target) {
            tracing::warn!(
                provider = %provider_id,
                failures = reg.consecutive_failures,
                "Provider crossed failure threshold"
            );
            walk_health(provider_id, reg, target);
        }
        Some(reg.health)
    }

    /// Probes every Degraded provider: success restores Active, failure
    /// counts toward deactivation. Returns the resulting health per probed id.
    pub async fn probe_degraded(&self) -> Vec<(ProviderId, ProviderHealth)> {
        let degraded: Vec<(ProviderId, Arc<A>)> = {
            let registrations = self.registrations.read().await;
            registrations
                .iter()
                .filter(|(_, reg)| reg.health == ProviderHealth::Degraded)
                .map(|(id, reg)| (id.clone(), Arc::clone(&reg.adapter)))
                .collect()
        };

        let mut results = Vec::with_capacity(degraded.len());
        for (id, adapter) in degraded {
            let probe = adapter.health_check().await;
            let mut registrations = self.registrations.write().await;
            let Some(reg) = registrations.get_mut(&id) else {
                continue;
            };
            match probe {
                Ok(()) => {
                    tracing::info!(provider = %id, "Health probe succeeded");
                    walk_health(&id, reg, ProviderHealth::Active);
                }
                Err(e) => {
                    reg.consecutive_failures = reg.consecutive_failures.saturating_add(1);
                    tracing::warn!(provider = %id, error = %e, "Health probe failed");
                    if reg.consecutive_failures >= self.health_policy.deactivate_after {
                        walk_health(&id, reg, ProviderHealth::Inactive);
                    }
                }
            }
            results.push((id, reg.health));
        }
        results
    }

    pub async fn get(&self, provider_id: &ProviderId) -> Option<RegistrationInfo> {
        self.registrations
            .read()
            .await
            .get(provider_id)
            .map(|reg| info(provider_id, reg))
    }

    /// The adapter handle regardless of health, e.g. to poll a submitted transaction.
    pub async fn adapter(&self, provider_id: &ProviderId) -> Option<Arc<A>> {
        self.registrations
            .read()
            .await
            .get(provider_id)
            .map(|reg| Arc::clone(&reg.adapter))
    }

    pub async fn supports(&self, provider_id: &ProviderId, capability: Capability) -> bool {
        self.registrations
            .read()
            .await
            .get(provider_id)
            .map(|reg| reg.supports(capability))
            .unwrap_or(false)
    }

    /// All registrations sorted by priority.
    pub async fn snapshot(&self) -> Vec<RegistrationInfo> {
        let registrations = self.registrations.read().await;
        let mut all: Vec<RegistrationInfo> = registrations
            .iter()
            .map(|(id, reg)| info(id, reg))
            .collect();
        all.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.provider_id.cmp(&b.provider_id))
        });
        all
    }

    pub async fn len(&self) -> usize {
        self.registrations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.registrations.read().await.is_empty()
    }
}

fn info<A: Provider + ?Sized>(id: &ProviderId, reg: &ProviderRegistration<A>) -> RegistrationInfo {
    RegistrationInfo {
        provider_id: id.clone(),
        category: reg.adapter.category(),
        capabilities: reg.capabilities.clone(),
        priority: reg.priority,
        health: reg.health,
        last_activated_at: reg.last_activated_at,
        registered_at: reg.registered_at,
        consecutive_failures: reg.consecutive_failures,
    }
}

fn walk_health<A: ?Sized>(
    id: &ProviderId,
    reg: &mut ProviderRegistration<A>,
    target: ProviderHealth,
) {
    while reg.health != target {
        let next = reg.health.step_toward(target);
        tracing::info!(provider = %id, from = %reg.health, to = %next, "Provider health changed");
        reg.health = next;
        if next == ProviderHealth::Active {
            reg.last_activated_at = Some(Utc::now());
            reg.consecutive_failures = 0;
        }
    }
}

fn unknown(provider_id: &ProviderId) -> HyperDriveError {
    HyperDriveError::new(
        crate::error::ErrorKind::UnknownProvider,
        format!("{provider_id} is not registered"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Stub {
        id: ProviderId,
        healthy: AtomicBool,
    }

    impl Stub {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: ProviderId::from(id),
                healthy: AtomicBool::new(true),
            })
        }
    }

    #[async_trait]
    impl Provider for Stub {
        fn provider_id(&self) -> &ProviderId {
            &self.id
        }

        async fn health_check(&self) -> HdResult<()> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(HyperDriveError::unavailable("unhealthy"))
            }
        }
    }

    fn ids(selected: &[Arc<Stub>]) -> Vec<String> {
        selected.iter().map(|p| p.id.to_string()).collect()
    }

    #[tokio::test]
    async fn test_select_orders_by_priority_and_skips_excluded() {
        let registry = ProviderRegistry::<Stub>::new(HealthPolicy::default());
        registry.register(Stub::new("ipfs"), Capability::holon_storage(), 2).await.unwrap();
        registry.register(Stub::new("mongo"), Capability::holon_storage(), 1).await.unwrap();
        registry.register(Stub::new("neo4j"), [Capability::LoadHolon], 0).await.unwrap();

        let selected = registry.select_for(Capability::SaveHolon, &HashSet::new()).await;
        assert_eq!(ids(&selected), vec!["mongo", "ipfs"]);

        let excluding: HashSet<_> = [ProviderId::from("mongo")].into_iter().collect();
        let selected = registry.select_for(Capability::SaveHolon, &excluding).await;
        assert_eq!(ids(&selected), vec!["ipfs"]);

        let selected = registry.select_for(Capability::LockValue, &HashSet::new()).await;
        assert!(selected.is_empty());
    }

    #[tokio::test]
    async fn test_reregister_with_different_capabilities_needs_override() {
        let registry = ProviderRegistry::<Stub>::new(HealthPolicy::default());
        registry.register(Stub::new("mongo"), Capability::holon_storage(), 1).await.unwrap();

        let err = registry
            .register(Stub::new("mongo"), [Capability::LoadHolon], 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateProvider);

        registry
            .register(Stub::new("mongo"), Capability::holon_storage(), 5)
            .await
            .unwrap();
        assert_eq!(registry.get(&"mongo".into()).await.unwrap().priority, 5);

        registry
            .register_with_override(Stub::new("mongo"), [Capability::LoadHolon], 1)
            .await
            .unwrap();
        assert_eq!(registry.len().await, 1);
        let info = registry.get(&"mongo".into()).await.unwrap();
        assert_eq!(info.capabilities.len(), 1);
    }

    #[tokio::test]
    async fn test_set_health_unknown_provider() {
        let registry = ProviderRegistry::<Stub>::new(HealthPolicy::default());
        let err = registry
            .set_health(&"ghost".into(), ProviderHealth::Degraded)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownProvider);
        assert_eq!(
            registry.unregister(&"ghost".into()).await.unwrap_err().kind,
            ErrorKind::UnknownProvider
        );
    }

    #[tokio::test]
    async fn test_inactive_provider_not_selected() {
        let registry = ProviderRegistry::<Stub>::new(HealthPolicy::default());
        registry.register(Stub::new("mongo"), Capability::holon_storage(), 1).await.unwrap();
        let health = registry
            .set_health(&"mongo".into(), ProviderHealth::Inactive)
            .await
            .unwrap();
        assert_eq!(health, ProviderHealth::Inactive);
        assert!(registry.select_for(Capability::LoadHolon, &HashSet::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_failures_degrade_then_deactivate() {
        let policy = HealthPolicy {
            degrade_after: 3,
            deactivate_after: 5,
        };
        let registry = ProviderRegistry::<Stub>::new(policy);
        registry.register(Stub::new("ipfs"), Capability::holon_storage(), 1).await.unwrap();
        let id = ProviderId::from("ipfs");

        assert_eq!(registry.record_failure(&id).await, Some(ProviderHealth::Active));
        assert_eq!(registry.record_failure(&id).await, Some(ProviderHealth::Active));
        assert_eq!(registry.record_failure(&id).await, Some(ProviderHealth::Degraded));
        assert_eq!(registry.record_failure(&id).await, Some(ProviderHealth::Degraded));
        assert_eq!(registry.record_failure(&id).await, Some(ProviderHealth::Inactive));
    }

    #[tokio::test]
    async fn test_smaller_attempt_budget_degrades_sooner() {
        let registry = ProviderRegistry::<Stub>::new(HealthPolicy::default());
        registry.register(Stub::new("ipfs"), Capability::holon_storage(), 1).await.unwrap();
        let id = ProviderId::from("ipfs");

        assert_eq!(
            registry.record_failure_within(&id, 1).await,
            Some(ProviderHealth::Degraded)
        );

        registry.set_health(&id, ProviderHealth::Active).await.unwrap();
        // A budget above the policy threshold does not delay degradation.
        assert_eq!(registry.record_failure_within(&id, 10).await, Some(ProviderHealth::Active));
        assert_eq!(registry.record_failure_within(&id, 10).await, Some(ProviderHealth::Active));
        assert_eq!(
            registry.record_failure_within(&id, 10).await,
            Some(ProviderHealth::Degraded)
        );
    }

    #[tokio::test]
    async fn test_success_resets_failure_counter() {
        let registry = ProviderRegistry::<Stub>::new(HealthPolicy::default());
        registry.register(Stub::new("ipfs"), Capability::holon_storage(), 1).await.unwrap();
        let id = ProviderId::from("ipfs");

        registry.record_failure(&id).await;
        registry.record_failure(&id).await;
        registry.record_success(&id).await;
        assert_eq!(registry.record_failure(&id).await, Some(ProviderHealth::Active));
        assert_eq!(registry.get(&id).await.unwrap().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_health_check_revives_degraded_provider() {
        let registry = ProviderRegistry::<Stub>::new(HealthPolicy::default());
        let stub = Stub::new("ipfs");
        registry.register(Arc::clone(&stub), Capability::holon_storage(), 1).await.unwrap();
        let id = ProviderId::from("ipfs");
        registry.set_health(&id, ProviderHealth::Degraded).await.unwrap();

        stub.healthy.store(false, Ordering::SeqCst);
        let results = registry.probe_degraded().await;
        assert_eq!(results, vec![(id.clone(), ProviderHealth::Degraded)]);

        stub.healthy.store(true, Ordering::SeqCst);
        let results = registry.probe_degraded().await;
        assert_eq!(results, vec![(id.clone(), ProviderHealth::Active)]);
        let info = registry.get(&id).await.unwrap();
        assert_eq!(info.consecutive_failures, 0);
        assert!(info.last_activated_at.is_some());
    }

    #[test]
    fn test_parse_provider_list() {
        let list = parse_provider_list(" mongo, ipfs ,neo4j,mongo").unwrap();
        assert_eq!(
            list,
            vec![
                ProviderId::from("mongo"),
                ProviderId::from("ipfs"),
                ProviderId::from("neo4j")
            ]
        );
        assert!(parse_provider_list("mongo,,ipfs").is_err());
    }
}

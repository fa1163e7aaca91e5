//! Scripted providers and shared keys for the workspace's integration tests.

mod chain;
mod holon;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};

use hyperdrive_bridge::{BridgeOrchestrator, BridgeRegistry, FixedRates};
use hyperdrive_common::{Capability, HealthPolicy};
use hyperdrive_replication::{HolonManager, HolonRegistry};
use hyperdrive_verifier::{CommitmentProver, CommitmentVerifier};

pub use chain::{LockScript, ScriptedBridgeAdapter, StatusScript};
pub use holon::ScriptedHolonProvider;

static PROOF_KEY: OnceCell<[u8; 32]> = OnceCell::new();

/// Key shared by [`prover`] and [`verifier`].
pub fn proof_key() -> [u8; 32] {
    *PROOF_KEY.get_or_init(|| {
        let mut hasher = Sha256::new();
        hasher.update(b"hyperdrive_test_fixtures_v1");
        let mut key = [0u8; 32];
        key.copy_from_slice(&hasher.finalize());
        key
    })
}

pub fn prover() -> CommitmentProver {
    CommitmentProver::new(proof_key())
}

pub fn verifier() -> Arc<CommitmentVerifier> {
    Arc::new(CommitmentVerifier::new(proof_key()))
}

/// Registers each provider with full holon storage capabilities.
pub async fn holon_registry(providers: &[(Arc<ScriptedHolonProvider>, u32)]) -> Arc<HolonRegistry> {
    let registry = Arc::new(HolonRegistry::new(HealthPolicy::default()));
    for (provider, priority) in providers {
        registry
            .register(
                provider.clone(),
                Capability::holon_storage(),
                *priority,
            )
            .await
            .unwrap_or_else(|e| panic!("fixture registration failed: {e}"));
    }
    registry
}

pub async fn holon_manager(providers: &[(Arc<ScriptedHolonProvider>, u32)]) -> HolonManager {
    HolonManager::new(holon_registry(providers).await)
}

/// Orchestrator over `adapters` with parity rates and the fixture verifier.
pub async fn orchestrator(adapters: &[Arc<ScriptedBridgeAdapter>]) -> BridgeOrchestrator {
    let registry = Arc::new(BridgeRegistry::new(HealthPolicy::default()));
    for adapter in adapters {
        registry
            .register(adapter.clone(), adapter.capabilities(), 0)
            .await
            .unwrap_or_else(|e| panic!("fixture registration failed: {e}"));
    }
    BridgeOrchestrator::new(registry, verifier(), Arc::new(FixedRates::parity()))
}

//! hyperdrive-node
//!
//! Runs the replication engine and the bridge orchestrator over the providers
//! named in the environment.
//!
//! Startup:
//! 1. Register storage providers and chain adapters
//! 2. Optionally replicate a probe holon and bridge a unit of value
//! 3. Probe degraded providers on an interval until shutdown

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{error, info, warn};

use hyperdrive_bridge::{
    BridgeOrchestrator, BridgeRegistry, CreateOrderRequest, ExecuteOptions, ExecuteOutcome,
    FixedRates, InMemoryChain,
};
use hyperdrive_common::{Amount, Provider, ProviderRegistry};
use hyperdrive_replication::{Holon, HolonManager, HolonRegistry, HolonType, InMemoryHolonProvider};
use hyperdrive_verifier::{CommitmentProver, CommitmentVerifier, VerifierRegistry};

use crate::config::NodeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = NodeConfig::from_env()?;
    init_tracing(config.log_json);

    info!("Starting hyperdrive-node");
    info!(
        providers = config.providers.len(),
        chains = config.chains.len(),
        min_success = config.hyperdrive.replication.min_success,
        "Loaded configuration"
    );

    let holons = Arc::new(HolonRegistry::new(config.hyperdrive.health.clone()));
    for spec in &config.providers {
        holons
            .register(
                Arc::new(InMemoryHolonProvider::new(spec.id.clone())),
                InMemoryHolonProvider::capabilities(),
                spec.priority,
            )
            .await?;
    }
    let manager = HolonManager::new(Arc::clone(&holons))
        .with_default_policy(config.hyperdrive.replication.clone());

    let chains = Arc::new(BridgeRegistry::new(config.hyperdrive.health.clone()));
    let mut adapters = Vec::with_capacity(config.chains.len());
    for spec in &config.chains {
        let tokens: Vec<&str> = spec.tokens.iter().map(String::as_str).collect();
        let adapter = Arc::new(InMemoryChain::new(spec.id.clone(), &tokens));
        chains
            .register(adapter.clone(), InMemoryChain::capabilities(), 0)
            .await?;
        adapters.push(adapter);
    }
    let verifiers = VerifierRegistry::new()
        .with_verifier(Arc::new(CommitmentVerifier::new(config.verifier_key)));
    let orchestrator = BridgeOrchestrator::new(
        Arc::clone(&chains),
        Arc::new(verifiers),
        Arc::new(FixedRates::parity()),
    )
    .with_config(config.hyperdrive.bridge.clone());

    info!(
        "Storage providers: {}",
        serde_json::to_string(&holons.snapshot().await)?
    );
    info!("Chains: {}", serde_json::to_string(&chains.snapshot().await)?);

    if config.self_check {
        replication_self_check(&manager).await?;
        match adapters.as_slice() {
            [source, destination, ..] => {
                bridge_self_check(&orchestrator, source, destination, &config).await?;
            }
            _ => warn!("Fewer than two chains configured, skipping bridge self-check"),
        }
    }

    let probe_interval = Duration::from_secs(config.probe_interval_secs);
    let probe_handle = {
        let holons = Arc::clone(&holons);
        let chains = Arc::clone(&chains);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(probe_interval);
            loop {
                ticker.tick().await;
                report_probes("storage", &holons).await;
                report_probes("chain", &chains).await;
            }
        })
    };

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down hyperdrive-node...");
    probe_handle.abort();

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "hyperdrive_node=info,hyperdrive_replication=info,hyperdrive_bridge=info".into()
    });
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn report_probes<A: Provider + ?Sized>(kind: &str, registry: &ProviderRegistry<A>) {
    for (provider, health) in registry.probe_degraded().await {
        info!(kind, provider = %provider, health = ?health, "Probed degraded provider");
    }
}

/// Replicates a probe holon and reads it back.
async fn replication_self_check(manager: &HolonManager) -> anyhow::Result<()> {
    let policy = manager.default_policy().clone();
    let holon = Holon::new(HolonType::Holon, "hyperdrive-self-check")
        .with_metadata("run", uuid::Uuid::new_v4().to_string());

    let saved = manager
        .save(holon, &policy)
        .await
        .context("self-check save")?;
    for failure in &saved.failures {
        warn!(provider = %failure.provider_id, error = %failure, "Self-check write failure");
    }

    let loaded = manager
        .load(saved.holon.id, &policy)
        .await
        .context("self-check load")?;
    if loaded.holon.version() != saved.holon.version() {
        bail!(
            "self-check read version {} after writing {}",
            loaded.holon.version(),
            saved.holon.version()
        );
    }
    info!(
        holon = %saved.holon.id,
        replicas = saved.written_to.len(),
        served_by = %loaded.served_by,
        "Replication self-check passed"
    );
    Ok(())
}

/// Bridges one unit between the first two chains, gated on a proof.
async fn bridge_self_check(
    orchestrator: &BridgeOrchestrator,
    source: &Arc<InMemoryChain>,
    destination: &Arc<InMemoryChain>,
    config: &NodeConfig,
) -> anyhow::Result<()> {
    let (Some(from_token), Some(to_token)) = (
        config.chains[0].tokens.first(),
        config.chains[1].tokens.first(),
    ) else {
        bail!("self-check chains must list a token");
    };

    let sender = orchestrator
        .create_account(source.provider_id())
        .await
        .context("self-check account on source chain")?;
    let recipient = orchestrator
        .create_account(destination.provider_id())
        .await
        .context("self-check account on destination chain")?;
    source.fund(&sender.public_key, Amount::new(1)).await?;
    let options = ExecuteOptions::from_config(orchestrator.config())?;

    let order = orchestrator
        .create_order(
            CreateOrderRequest::new(
                from_token.as_str(),
                to_token.as_str(),
                1u128,
                sender.public_key.as_str(),
                recipient.public_key.as_str(),
            )
            .with_proof_verification(),
        )
        .await?;

    let report = orchestrator
        .execute(order.order_id, options)
        .await?;
    if report.outcome != ExecuteOutcome::AwaitingProof {
        bail!("self-check order stopped at {:?}", report.outcome);
    }

    let statement = orchestrator.proof_statement(order.order_id).await?;
    let proof = CommitmentProver::new(config.verifier_key).prove(&statement)?;
    orchestrator.attach_proof(order.order_id, proof).await?;

    let report = match orchestrator
        .execute(order.order_id, options)
        .await
    {
        Ok(report) => report,
        Err(e) => {
            error!(order_id = %order.order_id, error = %e, "Bridge self-check failed");
            return Err(e.into());
        }
    };
    if report.outcome != ExecuteOutcome::Released {
        bail!("self-check order stopped at {:?}", report.outcome);
    }
    info!(order = %serde_json::to_string(&report.order)?, "Bridge self-check passed");
    Ok(())
}

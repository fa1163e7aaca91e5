//! Node configuration.

use anyhow::{anyhow, bail, Context, Result};
use std::env;

use hyperdrive_common::{parse_provider_list, HyperDriveConfig, ProviderId};

/// A storage provider to register at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderSpec {
    pub id: ProviderId,
    pub priority: u32,
}

/// A chain adapter to register at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainSpec {
    pub id: ProviderId,
    pub tokens: Vec<String>,
}

/// Node configuration.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Storage providers, `id:priority`.
    pub providers: Vec<ProviderSpec>,
    /// Chains, `id:TOKEN|TOKEN`.
    pub chains: Vec<ChainSpec>,
    /// Replication, health and bridge policies.
    pub hyperdrive: HyperDriveConfig,
    /// Interval between probes of degraded providers.
    pub probe_interval_secs: u64,
    /// Key for the commitment proof system.
    pub verifier_key: [u8; 32],
    /// Run a save/load and a bridge transfer at startup.
    pub self_check: bool,
    /// Emit JSON log lines.
    pub log_json: bool,
}

impl NodeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut hyperdrive = match lookup("HYPERDRIVE_CONFIG") {
            Some(path) => {
                let json = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading HYPERDRIVE_CONFIG {path}"))?;
                HyperDriveConfig::from_json(&json)
                    .with_context(|| format!("parsing HYPERDRIVE_CONFIG {path}"))?
            }
            None => HyperDriveConfig::default(),
        };

        if let Some(min_success) = parse_var(&lookup, "HYPERDRIVE_MIN_SUCCESS")? {
            hyperdrive.replication.min_success = min_success;
        }
        if let Some(max_attempts) = parse_var(&lookup, "HYPERDRIVE_MAX_ATTEMPTS")? {
            hyperdrive.replication.retry.max_attempts = max_attempts;
        }
        hyperdrive.validate().context("invalid HyperDrive policy")?;

        let providers = parse_providers(
            &lookup("HYPERDRIVE_PROVIDERS")
                .unwrap_or_else(|| "memory-primary:0,memory-replica:1".to_string()),
        )?;
        let chains = parse_chains(
            &lookup("HYPERDRIVE_CHAINS").unwrap_or_else(|| "solana:SOL,radix:XRD".to_string()),
        )?;

        let probe_interval_secs = parse_var(&lookup, "HYPERDRIVE_PROBE_INTERVAL_SECS")?.unwrap_or(30);
        if probe_interval_secs == 0 {
            bail!("HYPERDRIVE_PROBE_INTERVAL_SECS must be positive");
        }

        let verifier_key = match lookup("HYPERDRIVE_VERIFIER_KEY") {
            Some(key) => parse_key(&key).context("HYPERDRIVE_VERIFIER_KEY")?,
            None => ephemeral_key(),
        };

        Ok(Self {
            providers,
            chains,
            hyperdrive,
            probe_interval_secs,
            verifier_key,
            self_check: parse_var(&lookup, "HYPERDRIVE_SELF_CHECK")?.unwrap_or(true),
            log_json: parse_var(&lookup, "HYPERDRIVE_LOG_JSON")?.unwrap_or(false),
        })
    }
}

fn parse_var<F, T>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("{name}={raw}: {e}")),
        None => Ok(None),
    }
}

/// `mongo:1,ipfs:2`; a missing priority means list position.
fn parse_providers(list: &str) -> Result<Vec<ProviderSpec>> {
    let mut ids = Vec::new();
    let mut priorities = Vec::new();
    for (position, entry) in list.split(',').enumerate() {
        let (id, priority) = match entry.split_once(':') {
            Some((id, priority)) => (
                id,
                priority
                    .trim()
                    .parse()
                    .with_context(|| format!("priority of provider '{}'", id.trim()))?,
            ),
            None => (entry, position as u32),
        };
        ids.push(id.trim());
        priorities.push(priority);
    }
    let unique = parse_provider_list(&ids.join(","))?;
    if unique.len() != ids.len() {
        bail!("HYPERDRIVE_PROVIDERS lists a provider twice");
    }
    Ok(unique
        .into_iter()
        .zip(priorities)
        .map(|(id, priority)| ProviderSpec { id, priority })
        .collect())
}

/// `solana:SOL|USDC,radix:XRD`
fn parse_chains(list: &str) -> Result<Vec<ChainSpec>> {
    list.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| {
            let (id, tokens) = entry
                .split_once(':')
                .ok_or_else(|| anyhow!("chain '{entry}' must be id:TOKEN"))?;
            let tokens: Vec<String> = tokens
                .split('|')
                .map(|t| t.trim().to_ascii_uppercase())
                .filter(|t| !t.is_empty())
                .collect();
            if id.trim().is_empty() || tokens.is_empty() {
                bail!("chain '{entry}' must be id:TOKEN");
            }
            Ok(ChainSpec {
                id: ProviderId::new(id.trim()),
                tokens,
            })
        })
        .collect()
}

fn parse_key(hex_key: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_key.trim().trim_start_matches("0x")).context("not hex")?;
    if bytes.len() != 32 {
        bail!("expected 32 bytes, got {}", bytes.len());
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Random per-process key. Proofs do not survive a restart.
fn ephemeral_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    key[16..].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    key
}

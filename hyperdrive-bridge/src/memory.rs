//! In-memory chain used by the node's self-check and by tests.
//!
//! Balances are plain integers per address. Lock moves value from the sender
//! into the bridge custody address; release mints to the recipient. Every
//! transaction confirms immediately and submissions are deduplicated by
//! order id.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use hyperdrive_common::{
    Amount, Capability, HdResult, HyperDriveError, Provider, ProviderCategory, ProviderId,
};

use crate::adapter::{
    AccountKeys, BridgeAdapter, LockRequest, ReleaseRequest, TxReceipt, TxRef, TxStatus,
};
use crate::order::BridgeStep;

const SEED_WORDS: [&str; 16] = [
    "anchor", "binary", "cable", "delta", "ember", "fabric", "granite", "harbor", "island",
    "jungle", "kernel", "lantern", "meadow", "nectar", "orbit", "pylon",
];

pub struct InMemoryChain {
    id: ProviderId,
    tokens: HashSet<String>,
    bridge_address: String,
    address_prefix: Option<String>,
    balances: RwLock<HashMap<String, Amount>>,
    transactions: RwLock<HashMap<TxRef, TxStatus>>,
    submitted: RwLock<HashMap<(Uuid, BridgeStep), TxReceipt>>,
    nonce: AtomicU64,
    online: AtomicBool,
}

impl InMemoryChain {
    pub fn new(id: impl Into<ProviderId>, tokens: &[&str]) -> Self {
        let id = id.into();
        Self {
            bridge_address: format!("{id}-bridge"),
            id,
            tokens: tokens.iter().map(|t| t.to_ascii_uppercase()).collect(),
            address_prefix: None,
            balances: RwLock::new(HashMap::new()),
            transactions: RwLock::new(HashMap::new()),
            submitted: RwLock::new(HashMap::new()),
            nonce: AtomicU64::new(0),
            online: AtomicBool::new(true),
        }
    }

    /// Require addresses on this chain to start with `prefix`.
    pub fn with_address_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.bridge_address = format!("{prefix}{}-bridge", self.id);
        self.address_prefix = Some(prefix);
        self
    }

    pub fn capabilities() -> [Capability; 5] {
        Capability::full_bridge()
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Credits `amount` to `address` outside of any order.
    pub async fn fund(&self, address: &str, amount: Amount) -> HdResult<()> {
        let mut balances = self.balances.write().await;
        let balance = balances.entry(address.to_string()).or_default();
        *balance = balance.checked_add(amount)?;
        Ok(())
    }

    fn ensure_online(&self) -> HdResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(HyperDriveError::unavailable(format!("{} RPC unreachable", self.id)))
        }
    }

    fn next_tx(&self) -> TxRef {
        let n = self.nonce.fetch_add(1, Ordering::SeqCst);
        TxRef::new(format!("{}-tx-{n}", self.id))
    }

    async fn previous(&self, order_id: Uuid, step: BridgeStep) -> Option<TxReceipt> {
        self.submitted.read().await.get(&(order_id, step)).cloned()
    }

    async fn commit(&self, order_id: Uuid, step: BridgeStep) -> TxReceipt {
        let receipt = TxReceipt::new(self.next_tx(), TxStatus::Confirmed);
        self.transactions
            .write()
            .await
            .insert(receipt.tx_ref.clone(), receipt.status);
        self.submitted
            .write()
            .await
            .insert((order_id, step), receipt.clone());
        receipt
    }
}

#[async_trait]
impl Provider for InMemoryChain {
    fn provider_id(&self) -> &ProviderId {
        &self.id
    }

    fn category(&self) -> ProviderCategory {
        ProviderCategory::Blockchain
    }

    async fn health_check(&self) -> HdResult<()> {
        self.ensure_online()
    }
}

#[async_trait]
impl BridgeAdapter for InMemoryChain {
    fn supports_token(&self, token: &str) -> bool {
        self.tokens.contains(&token.to_ascii_uppercase())
    }

    fn bridge_address(&self) -> &str {
        &self.bridge_address
    }

    fn validate_address(&self, address: &str) -> HdResult<()> {
        let well_formed = !address.trim().is_empty()
            && !address.chars().any(char::is_whitespace)
            && self
                .address_prefix
                .as_deref()
                .map_or(true, |prefix| address.starts_with(prefix));
        if well_formed {
            Ok(())
        } else {
            Err(HyperDriveError::validation(format!(
                "'{address}' is not a valid {} address",
                self.id
            )))
        }
    }

    async fn get_balance(&self, address: &str) -> HdResult<Amount> {
        self.ensure_online()?;
        Ok(self
            .balances
            .read()
            .await
            .get(address)
            .copied()
            .unwrap_or_default())
    }

    async fn create_account(&self) -> HdResult<AccountKeys> {
        self.ensure_online()?;
        let mut hasher = Sha256::new();
        hasher.update(Uuid::new_v4().as_bytes());
        hasher.update(self.nonce.fetch_add(1, Ordering::SeqCst).to_be_bytes());
        let secret = hasher.finalize();

        let public = Sha256::digest(secret);
        let seed_phrase = secret
            .iter()
            .take(12)
            .map(|b| SEED_WORDS[(*b as usize) % SEED_WORDS.len()])
            .collect::<Vec<_>>()
            .join(" ");
        let public_key = format!(
            "{}{}",
            self.address_prefix.as_deref().unwrap_or_default(),
            hex::encode(public)
        );

        self.balances
            .write()
            .await
            .entry(public_key.clone())
            .or_default();
        Ok(AccountKeys {
            public_key,
            private_key: hex::encode(secret),
            seed_phrase,
        })
    }

    async fn lock(&self, request: &LockRequest) -> HdResult<TxReceipt> {
        self.ensure_online()?;
        if let Some(receipt) = self.previous(request.order_id, BridgeStep::Lock).await {
            return Ok(receipt);
        }
        if !self.supports_token(&request.token) {
            return Err(HyperDriveError::validation(format!(
                "{} does not hold {}",
                self.id, request.token
            )));
        }
        self.validate_address(&request.from_address)?;

        {
            let mut balances = self.balances.write().await;
            let available = balances
                .get(&request.from_address)
                .copied()
                .unwrap_or_default();
            let remaining = available.checked_sub(request.amount)?;
            balances.insert(request.from_address.clone(), remaining);
            let custody = balances
                .entry(request.to_bridge_address.clone())
                .or_default();
            *custody = custody.checked_add(request.amount)?;
        }

        let receipt = self.commit(request.order_id, BridgeStep::Lock).await;
        tracing::debug!(chain = %self.id, tx = %receipt.tx_ref, amount = %request.amount, "Locked");
        Ok(receipt)
    }

    async fn release(&self, request: &ReleaseRequest) -> HdResult<TxReceipt> {
        self.ensure_online()?;
        if let Some(receipt) = self.previous(request.order_id, BridgeStep::Release).await {
            return Ok(receipt);
        }
        self.validate_address(&request.to_address)?;
        self.fund(&request.to_address, request.amount).await?;

        let receipt = self.commit(request.order_id, BridgeStep::Release).await;
        tracing::debug!(chain = %self.id, tx = %receipt.tx_ref, amount = %request.amount, "Released");
        Ok(receipt)
    }

    async fn get_transaction_status(&self, tx_ref: &TxRef) -> HdResult<TxStatus> {
        self.ensure_online()?;
        self.transactions
            .read()
            .await
            .get(tx_ref)
            .copied()
            .ok_or_else(|| HyperDriveError::not_found(format!("{} has no tx {tx_ref}", self.id)))
    }
}

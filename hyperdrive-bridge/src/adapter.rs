//! Chain adapter capability interface consumed by the orchestrator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use hyperdrive_common::{Amount, HdResult, HyperDriveError, Provider};

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSACTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Chain-specific transaction reference (hash, signature, intent id).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxRef(String);

impl TxRef {
    pub fn new(tx_ref: impl Into<String>) -> Self {
        Self(tx_ref.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Finality of a submitted transaction as reported by the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl TxStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}

/// Returned by an adapter when a transaction is submitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_ref: TxRef,
    /// Status known at submission time.
    pub status: TxStatus,
    pub submitted_at: DateTime<Utc>,
}

impl TxReceipt {
    pub fn new(tx_ref: TxRef, status: TxStatus) -> Self {
        Self {
            tx_ref,
            status,
            submitted_at: Utc::now(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REQUESTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Withdraw `amount` from `from_address` into the bridge's custody.
///
/// `order_id` is an idempotency key: an adapter receiving the same order id
/// twice must return the original receipt instead of locking again.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRequest {
    pub order_id: Uuid,
    pub token: String,
    pub amount: Amount,
    pub from_address: String,
    pub to_bridge_address: String,
}

/// Deposit or mint `amount` to `to_address`. `order_id` is an idempotency key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub order_id: Uuid,
    pub token: String,
    pub amount: Amount,
    pub to_address: String,
}

/// Key material for a freshly created chain account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountKeys {
    pub public_key: String,
    pub private_key: String,
    pub seed_phrase: String,
}

impl fmt::Debug for AccountKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKeys")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .field("seed_phrase", &"<redacted>")
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADAPTER TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// One chain's bridge operations.
///
/// Operation bodies default to `CapabilityNotSupported`; adapters declare the
/// capabilities they implement when registering.
#[async_trait]
pub trait BridgeAdapter: Provider {
    /// Whether this chain can hold `token`.
    fn supports_token(&self, token: &str) -> bool;

    /// Custody address that receives locked value.
    fn bridge_address(&self) -> &str;

    /// Chain-specific address format check.
    fn validate_address(&self, address: &str) -> HdResult<()> {
        if address.trim().is_empty() || address.chars().any(char::is_whitespace) {
            return Err(HyperDriveError::validation(format!(
                "'{address}' is not a valid {} address",
                self.provider_id()
            )));
        }
        Ok(())
    }

    async fn get_balance(&self, address: &str) -> HdResult<Amount> {
        let _ = address;
        Err(HyperDriveError::not_supported("get_balance", self.provider_id()))
    }

    async fn create_account(&self) -> HdResult<AccountKeys> {
        Err(HyperDriveError::not_supported("create_account", self.provider_id()))
    }

    async fn lock(&self, request: &LockRequest) -> HdResult<TxReceipt> {
        let _ = request;
        Err(HyperDriveError::not_supported("lock", self.provider_id()))
    }

    async fn release(&self, request: &ReleaseRequest) -> HdResult<TxReceipt> {
        let _ = request;
        Err(HyperDriveError::not_supported("release", self.provider_id()))
    }

    async fn get_transaction_status(&self, tx_ref: &TxRef) -> HdResult<TxStatus> {
        let _ = tx_ref;
        Err(HyperDriveError::not_supported(
            "get_transaction_status",
            self.provider_id(),
        ))
    }
}

//! Identifiers and small value types shared by the engines.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{HdResult, HyperDriveError};

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTIFIERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Identifier of a registered provider ("mongo", "ipfs", "solana", ...).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProviderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Backend-specific identifier of a record on one provider.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderKey(String);

impl ProviderKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CAPABILITIES AND HEALTH
// ═══════════════════════════════════════════════════════════════════════════════

/// Operation families an adapter may declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SaveHolon,
    LoadHolon,
    DeleteHolon,
    /// Withdraw/lock value on a source chain.
    LockValue,
    /// Deposit/mint value on a destination chain.
    ReleaseValue,
    TransactionStatus,
    QueryBalance,
    CreateAccount,
}

impl Capability {
    pub fn holon_storage() -> [Capability; 3] {
        [
            Capability::SaveHolon,
            Capability::LoadHolon,
            Capability::DeleteHolon,
        ]
    }

    pub fn full_bridge() -> [Capability; 5] {
        [
            Capability::LockValue,
            Capability::ReleaseValue,
            Capability::TransactionStatus,
            Capability::QueryBalance,
            Capability::CreateAccount,
        ]
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::SaveHolon => "save_holon",
            Capability::LoadHolon => "load_holon",
            Capability::DeleteHolon => "delete_holon",
            Capability::LockValue => "lock_value",
            Capability::ReleaseValue => "release_value",
            Capability::TransactionStatus => "transaction_status",
            Capability::QueryBalance => "query_balance",
            Capability::CreateAccount => "create_account",
        };
        f.write_str(name)
    }
}

/// Provider health. Moves one step at a time along Active, Degraded, Inactive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderHealth {
    #[default]
    Active,
    Degraded,
    Inactive,
}

impl ProviderHealth {
    fn rank(self) -> u8 {
        match self {
            ProviderHealth::Active => 0,
            ProviderHealth::Degraded => 1,
            ProviderHealth::Inactive => 2,
        }
    }

    /// The adjacent state one step closer to `target`, or `self` if already there.
    pub fn step_toward(self, target: ProviderHealth) -> ProviderHealth {
        match self.rank().cmp(&target.rank()) {
            std::cmp::Ordering::Less => match self {
                ProviderHealth::Active => ProviderHealth::Degraded,
                _ => ProviderHealth::Inactive,
            },
            std::cmp::Ordering::Greater => match self {
                ProviderHealth::Inactive => ProviderHealth::Degraded,
                _ => ProviderHealth::Active,
            },
            std::cmp::Ordering::Equal => self,
        }
    }

    /// Whether `self` is strictly healthier than `other`.
    pub fn is_better_than(self, other: ProviderHealth) -> bool {
        self.rank() < other.rank()
    }
}

impl fmt::Display for ProviderHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderHealth::Active => write!(f, "active"),
            ProviderHealth::Degraded => write!(f, "degraded"),
            ProviderHealth::Inactive => write!(f, "inactive"),
        }
    }
}

/// Broad backend family, used for logging and configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCategory {
    #[default]
    Storage,
    Blockchain,
    Network,
}

// ═══════════════════════════════════════════════════════════════════════════════
// AMOUNTS
// ═══════════════════════════════════════════════════════════════════════════════

/// A token amount in the token's smallest unit.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn new(units: u128) -> Self {
        Self(units)
    }

    pub fn units(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> HdResult<Amount> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or_else(|| HyperDriveError::validation("amount overflow"))
    }

    pub fn checked_sub(self, other: Amount) -> HdResult<Amount> {
        self.0
            .checked_sub(other.0)
            .map(Amount)
            .ok_or_else(|| HyperDriveError::validation("insufficient funds"))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u128> for Amount {
    fn from(units: u128) -> Self {
        Self(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_steps_one_at_a_time() {
        use ProviderHealth::*;
        assert_eq!(Active.step_toward(Inactive), Degraded);
        assert_eq!(Degraded.step_toward(Inactive), Inactive);
        assert_eq!(Inactive.step_toward(Active), Degraded);
        assert_eq!(Degraded.step_toward(Active), Active);
        assert_eq!(Active.step_toward(Active), Active);
        assert!(Active.is_better_than(Degraded));
        assert!(!Inactive.is_better_than(Degraded));
    }

    #[test]
    fn test_amount_arithmetic() {
        let a = Amount::new(10);
        assert_eq!(a.checked_add(Amount::new(5)).unwrap(), Amount::new(15));
        assert!(a.checked_sub(Amount::new(11)).is_err());
        assert!(Amount::new(u128::MAX).checked_add(Amount::new(1)).is_err());
    }

    #[test]
    fn test_ids_serialize_as_strings() {
        let id = ProviderId::from("mongo");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"mongo\"");
        assert_eq!(id.to_string(), "mongo");
    }
}

//! Replication, retry, health and bridge policies.
//!
//! All structs deserialize with defaults so a partial JSON document is valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{HdResult, HyperDriveError};

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Top-level configuration for a HyperDrive deployment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HyperDriveConfig {
    /// Default policy for holon writes and reads.
    #[serde(default)]
    pub replication: ReplicationPolicy,

    /// Health downgrade thresholds applied by the registries.
    #[serde(default)]
    pub health: HealthPolicy,

    /// Bridge orchestration defaults.
    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl HyperDriveConfig {
    /// Parse a JSON document, filling missing fields with defaults.
    pub fn from_json(json: &str) -> HdResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> HdResult<()> {
        self.replication.validate()?;
        self.health.validate()?;
        self.bridge.validate()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REPLICATION
// ═══════════════════════════════════════════════════════════════════════════════

/// How a read picks among providers holding the same holon.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadConsistency {
    /// Return the first successful response in priority order.
    #[default]
    FirstSuccess,
    /// Query every candidate and return the highest version.
    HighestVersion,
}

/// Per-call replication policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplicationPolicy {
    /// Number of providers that must accept a write.
    #[serde(default = "default_min_success")]
    pub min_success: u32,

    /// Retry behaviour for each provider.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Upper bound on a single adapter call.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    #[serde(default)]
    pub read_consistency: ReadConsistency,
}

fn default_min_success() -> u32 {
    1
}

fn default_attempt_timeout_ms() -> u64 {
    5_000
}

impl Default for ReplicationPolicy {
    fn default() -> Self {
        Self {
            min_success: default_min_success(),
            retry: RetryPolicy::default(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            read_consistency: ReadConsistency::default(),
        }
    }
}

impl ReplicationPolicy {
    pub fn with_min_success(mut self, min_success: u32) -> Self {
        self.min_success = min_success;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_read_consistency(mut self, consistency: ReadConsistency) -> Self {
        self.read_consistency = consistency;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn validate(&self) -> HdResult<()> {
        if self.min_success == 0 {
            return Err(HyperDriveError::validation("min_success must be at least 1"));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(HyperDriveError::validation(
                "attempt_timeout_ms must be positive",
            ));
        }
        self.retry.validate()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RETRY
// ═══════════════════════════════════════════════════════════════════════════════

/// Exponential backoff settings for one provider within one call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per provider, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff_ms = initial.as_millis() as u64;
        self.max_backoff_ms = max.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> HdResult<()> {
        if self.max_attempts == 0 {
            return Err(HyperDriveError::validation(
                "max_attempts_per_provider must be at least 1",
            ));
        }
        if !(self.multiplier >= 1.0) {
            return Err(HyperDriveError::validation(
                "backoff multiplier must be >= 1.0",
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HEALTH
// ═══════════════════════════════════════════════════════════════════════════════

/// Consecutive-failure thresholds for health downgrades.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPolicy {
    /// Failures before Degraded. Callers with a smaller attempt budget degrade sooner.
    #[serde(default = "default_degrade_after")]
    pub degrade_after: u32,

    /// Failures before Inactive.
    #[serde(default = "default_deactivate_after")]
    pub deactivate_after: u32,
}

fn default_degrade_after() -> u32 {
    default_max_attempts()
}

fn default_deactivate_after() -> u32 {
    10
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            degrade_after: default_degrade_after(),
            deactivate_after: default_deactivate_after(),
        }
    }
}

impl HealthPolicy {
    pub fn validate(&self) -> HdResult<()> {
        if self.degrade_after == 0 || self.deactivate_after == 0 {
            return Err(HyperDriveError::validation(
                "health thresholds must be positive",
            ));
        }
        if self.deactivate_after < self.degrade_after {
            return Err(HyperDriveError::validation(
                "deactivate_after must be >= degrade_after",
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BRIDGE
// ═══════════════════════════════════════════════════════════════════════════════

/// Bridge orchestration defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Default confirmation window offered to callers.
    #[serde(default = "default_confirm_wait_secs")]
    pub confirm_wait_secs: u64,

    /// Default polling interval inside the confirmation window.
    #[serde(default = "default_confirm_interval_secs")]
    pub confirm_interval_secs: u64,

    /// Upper bound on a single chain adapter call.
    #[serde(default = "default_adapter_timeout_ms")]
    pub adapter_timeout_ms: u64,

    /// Check the source balance before locking.
    #[serde(default = "bool_true")]
    pub check_balance_before_lock: bool,

    /// Retries for transient adapter failures within one step.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_confirm_wait_secs() -> u64 {
    60
}

fn default_confirm_interval_secs() -> u64 {
    5
}

fn default_adapter_timeout_ms() -> u64 {
    30_000
}

fn bool_true() -> bool {
    true
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            confirm_wait_secs: default_confirm_wait_secs(),
            confirm_interval_secs: default_confirm_interval_secs(),
            adapter_timeout_ms: default_adapter_timeout_ms(),
            check_balance_before_lock: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl BridgeConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    pub fn validate(&self) -> HdResult<()> {
        if self.confirm_wait_secs == 0 || self.confirm_interval_secs == 0 {
            return Err(HyperDriveError::validation(
                "confirmation wait and interval must be positive",
            ));
        }
        if self.adapter_timeout_ms == 0 {
            return Err(HyperDriveError::validation(
                "adapter_timeout_ms must be positive",
            ));
        }
        self.retry.validate()
    }
}

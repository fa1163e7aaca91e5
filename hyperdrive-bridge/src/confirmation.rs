//! Bounded polling for transaction finality.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use hyperdrive_common::{with_timeout, HdResult, HyperDriveError};

use crate::adapter::{BridgeAdapter, TxRef, TxStatus};

/// Outcome of a confirmation wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    Confirmed,
    /// The window elapsed without finality. Recoverable.
    Pending,
    Rejected,
}

impl From<TxStatus> for Confirmation {
    fn from(status: TxStatus) -> Self {
        match status {
            TxStatus::Pending => Confirmation::Pending,
            TxStatus::Confirmed => Confirmation::Confirmed,
            TxStatus::Rejected => Confirmation::Rejected,
        }
    }
}

/// How long to wait for finality and how often to ask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationWindow {
    pub wait: Duration,
    pub interval: Duration,
}

impl ConfirmationWindow {
    pub fn from_secs(wait_secs: u64, attempt_interval_secs: u64) -> HdResult<Self> {
        if wait_secs == 0 {
            return Err(HyperDriveError::validation("wait_secs must be positive"));
        }
        if attempt_interval_secs == 0 {
            return Err(HyperDriveError::validation(
                "attempt_interval_secs must be positive",
            ));
        }
        Ok(Self {
            wait: Duration::from_secs(wait_secs),
            interval: Duration::from_secs(attempt_interval_secs),
        })
    }
}

/// Polls `adapter` until `tx_ref` is final or the window elapses.
///
/// Status-query errors inside the window count as "still pending".
pub async fn poll_transaction(
    adapter: &dyn BridgeAdapter,
    tx_ref: &TxRef,
    window: &ConfirmationWindow,
    call_timeout: Duration,
) -> Confirmation {
    let deadline = Instant::now() + window.wait;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let limit = call_timeout.min(remaining.max(Duration::from_millis(1)));
        match with_timeout(limit, "get_transaction_status", adapter.get_transaction_status(tx_ref))
            .await
        {
            Ok(TxStatus::Pending) => {
                tracing::debug!(tx = %tx_ref, attempt, "Transaction still pending");
            }
            Ok(status) => {
                tracing::info!(tx = %tx_ref, attempt, status = ?status, "Transaction final");
                return status.into();
            }
            Err(e) => {
                tracing::warn!(tx = %tx_ref, attempt, error = %e, "Status query failed");
            }
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::info!(tx = %tx_ref, attempts = attempt, "Confirmation window elapsed");
            return Confirmation::Pending;
        }
        tokio::time::sleep(window.interval.min(deadline - now)).await;
    }
}

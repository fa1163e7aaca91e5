//! Bridge orders and their state machine.
//!
//! ```text
//!   Created ─► Locking ─► Locked ─┬───────────────────────────────► Releasing ─► Released
//!                                 └─► ProofPending ─┬─► ProofVerified ─┘
//!                                                   └─► ProofRejected ─► Failed
//!   any non-terminal state ─► Failed
//! ```
//!
//! The proof states are only legal when the order requires proof
//! verification, and `Locked ─► Releasing` is only legal when it does not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hyperdrive_common::{Amount, ErrorKind, HdResult, HyperDriveError, ProviderId};
use hyperdrive_verifier::BridgeProof;

use crate::adapter::{TxReceipt, TxRef};

// ═══════════════════════════════════════════════════════════════════════════════
// STATES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    Created,
    Locking,
    Locked,
    ProofPending,
    ProofVerified,
    ProofRejected,
    Releasing,
    Released,
    Failed,
}

impl BridgeState {
    /// No further progress is possible from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BridgeState::Released | BridgeState::Failed | BridgeState::ProofRejected
        )
    }

    fn rank(&self) -> u8 {
        match self {
            BridgeState::Created => 0,
            BridgeState::Locking => 1,
            BridgeState::Locked => 2,
            BridgeState::ProofPending => 3,
            BridgeState::ProofVerified | BridgeState::ProofRejected => 4,
            BridgeState::Releasing => 5,
            BridgeState::Released => 6,
            BridgeState::Failed => 7,
        }
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_advance_to(&self, next: BridgeState, require_proof: bool) -> bool {
        use BridgeState::*;
        match (*self, next) {
            (Created, Locking) | (Locking, Locked) | (Releasing, Released) => true,
            (Locked, ProofPending) => require_proof,
            (Locked, Releasing) => !require_proof,
            (ProofPending, ProofVerified) | (ProofPending, ProofRejected) => true,
            (ProofVerified, Releasing) => true,
            (ProofRejected, Failed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BridgeState::Created => "Order created, nothing submitted",
            BridgeState::Locking => "Lock submitted on source chain",
            BridgeState::Locked => "Value locked on source chain",
            BridgeState::ProofPending => "Waiting for proof verification",
            BridgeState::ProofVerified => "Proof verified",
            BridgeState::ProofRejected => "Proof rejected",
            BridgeState::Releasing => "Release submitted on destination chain",
            BridgeState::Released => "Value released on destination chain",
            BridgeState::Failed => "Order failed",
        }
    }
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The two on-chain steps of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeStep {
    Lock,
    Release,
}

impl std::fmt::Display for BridgeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeStep::Lock => write!(f, "lock"),
            BridgeStep::Release => write!(f, "release"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: BridgeState,
    pub to: BridgeState,
    pub at: DateTime<Utc>,
}

/// Adapter receipt kept for inspection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReceipt {
    pub step: BridgeStep,
    pub provider_id: ProviderId,
    pub receipt: TxReceipt,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFailure {
    pub kind: ErrorKind,
    pub message: String,
    /// State the order was in when it failed.
    pub failed_in: BridgeState,
    pub at: DateTime<Utc>,
}

impl OrderFailure {
    pub fn to_error(&self, order_id: Uuid) -> HyperDriveError {
        HyperDriveError::new(
            self.kind,
            format!("order {order_id} failed in {}: {}", self.failed_in, self.message),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REQUEST
// ═══════════════════════════════════════════════════════════════════════════════

/// Caller input for [`crate::BridgeOrchestrator::create_order`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub from_token: String,
    pub to_token: String,
    pub amount: Amount,
    pub from_address: String,
    pub to_address: String,
    #[serde(default)]
    pub require_proof_verification: bool,
}

impl CreateOrderRequest {
    pub fn new(
        from_token: impl Into<String>,
        to_token: impl Into<String>,
        amount: impl Into<Amount>,
        from_address: impl Into<String>,
        to_address: impl Into<String>,
    ) -> Self {
        Self {
            from_token: from_token.into(),
            to_token: to_token.into(),
            amount: amount.into(),
            from_address: from_address.into(),
            to_address: to_address.into(),
            require_proof_verification: false,
        }
    }

    pub fn with_proof_verification(mut self) -> Self {
        self.require_proof_verification = true;
        self
    }

    /// Chain-independent checks.
    pub fn validate(&self) -> HdResult<()> {
        if self.amount.is_zero() {
            return Err(HyperDriveError::validation("amount must be greater than zero"));
        }
        if self.from_token.trim().is_empty() || self.to_token.trim().is_empty() {
            return Err(HyperDriveError::validation("both tokens must be set"));
        }
        if self.from_token.eq_ignore_ascii_case(&self.to_token) {
            return Err(HyperDriveError::validation(
                "from_token and to_token must differ",
            ));
        }
        if self.from_address.trim().is_empty() {
            return Err(HyperDriveError::validation("from_address must be set"));
        }
        if self.to_address.trim().is_empty() {
            return Err(HyperDriveError::validation("to_address must be set"));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ORDER
// ═══════════════════════════════════════════════════════════════════════════════

/// One cross-chain transfer and its progress.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeOrder {
    pub order_id: Uuid,
    pub from_token: String,
    pub to_token: String,
    pub amount: Amount,
    /// `amount` converted into `to_token` at order creation.
    pub to_amount: Amount,
    pub from_address: String,
    pub to_address: String,
    pub require_proof_verification: bool,
    pub state: BridgeState,
    /// Adapter that locks on the source chain.
    pub source_provider: ProviderId,
    /// Adapter that releases on the destination chain.
    pub destination_provider: ProviderId,
    pub lock_tx_ref: Option<TxRef>,
    pub proof: Option<BridgeProof>,
    /// Set only once the order is `Released`.
    pub release_tx_ref: Option<TxRef>,
    pub receipts: Vec<StepReceipt>,
    pub history: Vec<StateTransition>,
    pub failure: Option<OrderFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BridgeOrder {
    pub(crate) fn new(
        request: CreateOrderRequest,
        to_amount: Amount,
        source_provider: ProviderId,
        destination_provider: ProviderId,
    ) -> Self {
        let now = Utc::now();
        Self {
            order_id: Uuid::new_v4(),
            from_token: request.from_token,
            to_token: request.to_token,
            amount: request.amount,
            to_amount,
            from_address: request.from_address,
            to_address: request.to_address,
            require_proof_verification: request.require_proof_verification,
            state: BridgeState::Created,
            source_provider,
            destination_provider,
            lock_tx_ref: None,
            proof: None,
            release_tx_ref: None,
            receipts: Vec::new(),
            history: Vec::new(),
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Every state the order has been in, oldest first.
    pub fn states_visited(&self) -> Vec<BridgeState> {
        let mut states = vec![BridgeState::Created];
        states.extend(self.history.iter().map(|t| t.to));
        states
    }

    /// Most recent receipt for `step`.
    pub fn receipt_for(&self, step: BridgeStep) -> Option<&StepReceipt> {
        self.receipts.iter().rev().find(|r| r.step == step)
    }

    /// Moves to `next` if it is a legal transition.
    ///
    /// Returns `AlreadyInState` when the order is already at or past `next`
    /// so callers can treat repeated steps as no-ops.
    pub(crate) fn advance(&mut self, next: BridgeState) -> HdResult<()> {
        let legal = self
            .state
            .can_advance_to(next, self.require_proof_verification);
        let already_past = self.state == next
            || (self.state.is_terminal() && !legal)
            || (next != BridgeState::Failed && self.state.rank() >= next.rank());
        if already_past {
            return Err(HyperDriveError::already_in_state(format!(
                "order {} is already {}",
                self.order_id, self.state
            )));
        }
        if !legal {
            return Err(HyperDriveError::invalid_transition(format!(
                "order {} cannot move from {} to {}",
                self.order_id, self.state, next
            )));
        }

        let now = Utc::now();
        tracing::info!(
            order_id = %self.order_id,
            from = %self.state,
            to = %next,
            "Bridge order transition"
        );
        self.history.push(StateTransition {
            from: self.state,
            to: next,
            at: now,
        });
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    pub(crate) fn record_receipt(
        &mut self,
        step: BridgeStep,
        provider_id: ProviderId,
        receipt: TxReceipt,
    ) {
        if step == BridgeStep::Lock {
            self.lock_tx_ref = Some(receipt.tx_ref.clone());
        }
        self.receipts.push(StepReceipt {
            step,
            provider_id,
            receipt,
        });
        self.updated_at = Utc::now();
    }

    /// Records `error` and moves the order to `Failed`.
    pub(crate) fn fail(&mut self, error: &HyperDriveError) {
        if self.state == BridgeState::Failed || self.state == BridgeState::Released {
            return;
        }
        tracing::error!(
            order_id = %self.order_id,
            state = %self.state,
            kind = %error.kind,
            error = %error.message,
            "Bridge order failed"
        );
        self.failure = Some(OrderFailure {
            kind: error.kind,
            message: error.message.clone(),
            failed_in: self.state,
            at: Utc::now(),
        });
        // Failed is reachable from every non-terminal state and from ProofRejected.
        if let Err(e) = self.advance(BridgeState::Failed) {
            tracing::error!(order_id = %self.order_id, error = %e, "Order could not be marked failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(require_proof: bool) -> BridgeOrder {
        let mut request = CreateOrderRequest::new("SOL", "XRD", 10u128, "alice", "bob");
        request.require_proof_verification = require_proof;
        BridgeOrder::new(request, Amount::new(10), "solana".into(), "radix".into())
    }

    #[test]
    fn test_request_validation() {
        let ok = CreateOrderRequest::new("SOL", "XRD", 10u128, "alice", "bob");
        ok.validate().unwrap();

        let zero = CreateOrderRequest::new("SOL", "XRD", 0u128, "alice", "bob");
        assert_eq!(zero.validate().unwrap_err().kind, ErrorKind::Validation);

        let same = CreateOrderRequest::new("SOL", "sol", 1u128, "alice", "bob");
        assert!(same.validate().is_err());

        let blank = CreateOrderRequest::new("SOL", "XRD", 1u128, "alice", "  ");
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_happy_path_without_proof() {
        let mut order = order(false);
        for next in [
            BridgeState::Locking,
            BridgeState::Locked,
            BridgeState::Releasing,
            BridgeState::Released,
        ] {
            order.advance(next).unwrap();
        }
        assert!(order.is_terminal());
        assert_eq!(order.states_visited().len(), 5);
    }

    #[test]
    fn test_proof_states_require_flag() {
        let mut order = order(false);
        order.advance(BridgeState::Locking).unwrap();
        order.advance(BridgeState::Locked).unwrap();
        let err = order.advance(BridgeState::ProofPending).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTransition);

        let mut gated = self::order(true);
        gated.advance(BridgeState::Locking).unwrap();
        gated.advance(BridgeState::Locked).unwrap();
        let err = gated.advance(BridgeState::Releasing).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTransition);
        gated.advance(BridgeState::ProofPending).unwrap();
        gated.advance(BridgeState::ProofVerified).unwrap();
        gated.advance(BridgeState::Releasing).unwrap();
    }

    #[test]
    fn test_backwards_step_is_already_in_state() {
        let mut order = order(false);
        order.advance(BridgeState::Locking).unwrap();
        order.advance(BridgeState::Locked).unwrap();
        let err = order.advance(BridgeState::Locking).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyInState);
        let err = order.advance(BridgeState::Locked).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyInState);
    }

    #[test]
    fn test_skipping_states_is_invalid() {
        let mut order = order(false);
        let err = order.advance(BridgeState::Released).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTransition);
    }

    #[test]
    fn test_fail_records_failure_once() {
        let mut order = order(true);
        order.advance(BridgeState::Locking).unwrap();
        order.advance(BridgeState::Locked).unwrap();
        order.advance(BridgeState::ProofPending).unwrap();
        order.advance(BridgeState::ProofRejected).unwrap();
        order.fail(&HyperDriveError::proof_rejected("commitment mismatch"));
        assert_eq!(order.state, BridgeState::Failed);

        let failure = order.failure.clone().unwrap();
        assert_eq!(failure.kind, ErrorKind::ProofRejected);
        assert_eq!(failure.failed_in, BridgeState::ProofRejected);

        order.fail(&HyperDriveError::internal("late"));
        assert_eq!(order.failure.unwrap().kind, ErrorKind::ProofRejected);
        let err = order_after_release().advance(BridgeState::Failed).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyInState);
    }

    #[test]
    fn test_fail_reaches_failed_from_every_open_state() {
        let path = [
            BridgeState::Locking,
            BridgeState::Locked,
            BridgeState::Releasing,
        ];
        for depth in 0..=path.len() {
            let mut order = order(false);
            for next in &path[..depth] {
                order.advance(*next).unwrap();
            }
            let from = order.state;
            order.fail(&HyperDriveError::unavailable("chain down"));
            assert_eq!(order.state, BridgeState::Failed, "from {from}");
            assert_eq!(order.history.last().unwrap().from, from);
        }

        let mut released = order_after_release();
        released.fail(&HyperDriveError::unavailable("late"));
        assert_eq!(released.state, BridgeState::Released);
        assert!(released.failure.is_none());
    }

    fn order_after_release() -> BridgeOrder {
        let mut order = order(false);
        for next in [
            BridgeState::Locking,
            BridgeState::Locked,
            BridgeState::Releasing,
            BridgeState::Released,
        ] {
            order.advance(next).unwrap();
        }
        order
    }

    #[test]
    fn test_lock_receipt_sets_lock_ref_only() {
        let mut order = order(false);
        order.record_receipt(
            BridgeStep::Lock,
            "solana".into(),
            TxReceipt::new(TxRef::new("sig-1"), crate::adapter::TxStatus::Pending),
        );
        assert_eq!(order.lock_tx_ref, Some(TxRef::new("sig-1")));
        assert!(order.release_tx_ref.is_none());
        assert_eq!(
            order.receipt_for(BridgeStep::Lock).unwrap().provider_id,
            ProviderId::from("solana")
        );
    }
}

//! Cross-chain bridge orchestrator.
//!
//! Drives each [`BridgeOrder`] through lock, optional proof verification and
//! release. Every operation on one order runs under that order's mutex, and
//! every step first checks whether the order is already past it, so a repeated
//! `execute` never resubmits a completed step.
//!
//! Read-only views (`get_order`, `list_orders`) never wait on that mutex: they
//! read the snapshot the running operation last published.
//!
//! Transient adapter failures are retried inside a step with the configured
//! backoff and reported to the registry; only the final failure reaches the
//! order. There is no in-band rollback: a failed order keeps its receipts for
//! an operator or an external compensation process.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use hyperdrive_common::{
    with_timeout, Amount, BridgeConfig, Capability, ErrorKind, HdResult, HyperDriveError,
    ProviderId, ProviderRegistry,
};
use hyperdrive_verifier::{
    address_commitment, verify_fail_closed, BridgeProof, ClaimedInputs, ClaimedOutputs,
    ProofStatement, ProofVerifier,
};

use crate::adapter::{AccountKeys, BridgeAdapter, LockRequest, ReleaseRequest, TxRef, TxStatus};
use crate::confirmation::{poll_transaction, Confirmation, ConfirmationWindow};
use crate::order::{BridgeOrder, BridgeState, BridgeStep, CreateOrderRequest};
use crate::rates::{ExchangeRate, ExchangeRateSource};

/// Registry of chain adapters.
pub type BridgeRegistry = ProviderRegistry<dyn BridgeAdapter>;

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIONS AND REPORTS
// ═══════════════════════════════════════════════════════════════════════════════

/// How `execute` treats transaction finality.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// `None` trusts the submission receipt. `Some` waits for finality
    /// within the window before advancing.
    pub confirmation: Option<ConfirmationWindow>,
}

impl ExecuteOptions {
    pub fn optimistic() -> Self {
        Self { confirmation: None }
    }

    pub fn wait_for_finality(window: ConfirmationWindow) -> Self {
        Self {
            confirmation: Some(window),
        }
    }

    /// Waits for finality with the configured default window.
    pub fn from_config(config: &BridgeConfig) -> HdResult<Self> {
        let window =
            ConfirmationWindow::from_secs(config.confirm_wait_secs, config.confirm_interval_secs)?;
        Ok(Self::wait_for_finality(window))
    }
}

/// Where an `execute` call stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteOutcome {
    Released,
    /// The order was already terminal; nothing was called.
    AlreadyInState,
    /// Parked in `ProofPending` until a proof is attached.
    AwaitingProof,
    /// Submitted but not final within the window.
    AwaitingConfirmation(BridgeStep),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecuteReport {
    pub order: BridgeOrder,
    pub outcome: ExecuteOutcome,
}

impl ExecuteReport {
    pub fn is_no_op(&self) -> bool {
        self.outcome == ExecuteOutcome::AlreadyInState
    }
}

/// Balances on both sides of an order plus the status of its transactions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBalance {
    pub order_id: Uuid,
    pub state: BridgeState,
    pub source_balance: Amount,
    pub destination_balance: Amount,
    pub lock_status: Option<TxStatus>,
    pub release_status: Option<TxStatus>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ORDER SLOTS
// ═══════════════════════════════════════════════════════════════════════════════

/// One order: the execution mutex and the last published snapshot.
struct OrderSlot {
    order: Mutex<BridgeOrder>,
    view: RwLock<BridgeOrder>,
}

impl OrderSlot {
    fn new(order: BridgeOrder) -> Self {
        Self {
            view: RwLock::new(order.clone()),
            order: Mutex::new(order),
        }
    }

    async fn publish(&self, order: &BridgeOrder) {
        *self.view.write().await = order.clone();
    }

    async fn snapshot(&self) -> BridgeOrder {
        self.view.read().await.clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ORCHESTRATOR
// ═══════════════════════════════════════════════════════════════════════════════

pub struct BridgeOrchestrator {
    registry: Arc<BridgeRegistry>,
    verifier: Arc<dyn ProofVerifier>,
    rates: Arc<dyn ExchangeRateSource>,
    orders: DashMap<Uuid, Arc<OrderSlot>>,
    config: BridgeConfig,
}

impl BridgeOrchestrator {
    pub fn new(
        registry: Arc<BridgeRegistry>,
        verifier: Arc<dyn ProofVerifier>,
        rates: Arc<dyn ExchangeRateSource>,
    ) -> Self {
        Self {
            registry,
            verifier,
            rates,
            orders: DashMap::new(),
            config: BridgeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<BridgeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Validates the request and records a new order in `Created`.
    pub async fn create_order(&self, request: CreateOrderRequest) -> HdResult<BridgeOrder> {
        request.validate()?;

        let source = self
            .pick_adapter(Capability::LockValue, &request.from_token, None)
            .await?;
        let destination = self
            .pick_adapter(Capability::ReleaseValue, &request.to_token, None)
            .await?;
        source.validate_address(&request.from_address)?;
        destination.validate_address(&request.to_address)?;

        let rate = self
            .rates
            .rate(&request.from_token, &request.to_token)
            .await?;
        let to_amount = rate.convert(request.amount)?;

        let order = BridgeOrder::new(
            request,
            to_amount,
            source.provider_id().clone(),
            destination.provider_id().clone(),
        );
        tracing::info!(
            order_id = %order.order_id,
            from = %order.from_token,
            to = %order.to_token,
            amount = %order.amount,
            to_amount = %order.to_amount,
            source = %order.source_provider,
            destination = %order.destination_provider,
            proof = order.require_proof_verification,
            "Bridge order created"
        );
        self.orders
            .insert(order.order_id, Arc::new(OrderSlot::new(order.clone())));
        Ok(order)
    }

    pub async fn get_order(&self, order_id: Uuid) -> HdResult<BridgeOrder> {
        Ok(self.order_slot(order_id)?.snapshot().await)
    }

    /// All orders, oldest first.
    pub async fn list_orders(&self) -> Vec<BridgeOrder> {
        let slots: Vec<_> = self
            .orders
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut orders = Vec::with_capacity(slots.len());
        for slot in slots {
            orders.push(slot.snapshot().await);
        }
        orders.sort_by_key(|order| order.created_at);
        orders
    }

    /// Drops a terminal order from memory once it has been archived elsewhere.
    pub async fn forget_order(&self, order_id: Uuid) -> HdResult<BridgeOrder> {
        let slot = self.order_slot(order_id)?;
        let order = slot.order.lock().await;
        if !order.is_terminal() {
            return Err(HyperDriveError::invalid_transition(format!(
                "order {order_id} is {} and still in progress",
                order.state
            )));
        }
        self.orders.remove(&order_id);
        tracing::info!(order_id = %order_id, state = %order.state, "Bridge order forgotten");
        Ok(order.clone())
    }

    pub async fn exchange_rate(&self, from_token: &str, to_token: &str) -> HdResult<ExchangeRate> {
        self.rates.rate(from_token, to_token).await
    }

    /// Creates an account on the given chain.
    pub async fn create_account(&self, provider_id: &ProviderId) -> HdResult<AccountKeys> {
        if !self
            .registry
            .supports(provider_id, Capability::CreateAccount)
            .await
        {
            return Err(HyperDriveError::not_supported("create_account", provider_id));
        }
        let adapter = self.registered_adapter(provider_id).await?;
        self.call_adapter(adapter.as_ref(), "create_account", || adapter.create_account())
            .await
    }

    /// Attaches proof material to an order that still needs it.
    pub async fn attach_proof(&self, order_id: Uuid, proof: BridgeProof) -> HdResult<BridgeOrder> {
        let slot = self.order_slot(order_id)?;
        let mut order = slot.order.lock().await;

        if !order.require_proof_verification {
            return Err(HyperDriveError::validation(format!(
                "order {order_id} does not require proof verification"
            )));
        }
        match order.state {
            BridgeState::Created
            | BridgeState::Locking
            | BridgeState::Locked
            | BridgeState::ProofPending => {
                order.proof = Some(proof);
                order.updated_at = Utc::now();
                slot.publish(&order).await;
                tracing::info!(order_id = %order_id, state = %order.state, "Proof attached");
                Ok(order.clone())
            }
            state => Err(HyperDriveError::invalid_transition(format!(
                "order {order_id} is {state}; proof can no longer change"
            ))),
        }
    }

    /// The statement a proof for this order must prove. Available once locked.
    pub async fn proof_statement(&self, order_id: Uuid) -> HdResult<ProofStatement> {
        let order = self.get_order(order_id).await?;
        statement_for(&order)
    }

    /// Drives the order forward as far as it can go in one call.
    ///
    /// Returns `Err` when the order fails during this call (it stays
    /// inspectable through [`BridgeOrchestrator::get_order`]) or when no
    /// adapter can serve the next step, in which case its state is unchanged.
    pub async fn execute(&self, order_id: Uuid, options: ExecuteOptions) -> HdResult<ExecuteReport> {
        let slot = self.order_slot(order_id)?;
        let mut order = slot.order.lock().await;

        if order.is_terminal() {
            tracing::debug!(order_id = %order_id, state = %order.state, "Order already terminal");
            return Ok(ExecuteReport {
                order: order.clone(),
                outcome: ExecuteOutcome::AlreadyInState,
            });
        }

        let driven = self.drive(&slot, &mut order, &options).await;
        slot.publish(&order).await;
        Ok(ExecuteReport {
            order: order.clone(),
            outcome: driven?,
        })
    }

    async fn drive(
        &self,
        slot: &OrderSlot,
        order: &mut BridgeOrder,
        options: &ExecuteOptions,
    ) -> HdResult<ExecuteOutcome> {
        loop {
            let parked = match order.state {
                BridgeState::Created => self.begin_lock(slot, order, options).await?,
                BridgeState::Locking => self.resume_lock(slot, order, options).await?,
                BridgeState::Locked if order.require_proof_verification => {
                    order.advance(BridgeState::ProofPending)?;
                    None
                }
                BridgeState::Locked | BridgeState::ProofVerified => {
                    self.begin_release(slot, order, options).await?
                }
                BridgeState::ProofPending => self.verify_proof(order)?,
                BridgeState::Releasing => self.resume_release(slot, order, options).await?,
                BridgeState::Released => Some(ExecuteOutcome::Released),
                BridgeState::Failed | BridgeState::ProofRejected => {
                    return Err(failure_of(order));
                }
            };
            if let Some(outcome) = parked {
                return Ok(outcome);
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LOCK
    // ═══════════════════════════════════════════════════════════════════════════

    async fn begin_lock(
        &self,
        slot: &OrderSlot,
        order: &mut BridgeOrder,
        options: &ExecuteOptions,
    ) -> HdResult<Option<ExecuteOutcome>> {
        let adapter = self
            .pick_adapter(
                Capability::LockValue,
                &order.from_token,
                Some(&order.source_provider),
            )
            .await?;
        let provider_id = adapter.provider_id().clone();
        order.source_provider = provider_id.clone();

        if self.config.check_balance_before_lock
            && self
                .registry
                .supports(&provider_id, Capability::QueryBalance)
                .await
        {
            let balance = self
                .call_adapter(adapter.as_ref(), "get_balance", || {
                    adapter.get_balance(&order.from_address)
                })
                .await?;
            if balance < order.amount {
                let error = HyperDriveError::validation(format!(
                    "insufficient funds: {} holds {balance}, order needs {}",
                    order.from_address, order.amount
                ));
                order.fail(&error);
                return Err(failure_of(order));
            }
        }

        order.advance(BridgeState::Locking)?;
        self.submit_lock(slot, order, adapter.as_ref(), options).await
    }

    async fn resume_lock(
        &self,
        slot: &OrderSlot,
        order: &mut BridgeOrder,
        options: &ExecuteOptions,
    ) -> HdResult<Option<ExecuteOutcome>> {
        let adapter = self.registered_adapter(&order.source_provider).await?;
        match order.lock_tx_ref.clone() {
            Some(tx_ref) => {
                let status = self
                    .confirm_submitted(adapter.as_ref(), &tx_ref, options)
                    .await?;
                self.settle(order, BridgeStep::Lock, tx_ref, status, options)
            }
            // A previous call was cut off mid-submission. The order id makes
            // the adapter return the original receipt if the lock landed.
            None => self.submit_lock(slot, order, adapter.as_ref(), options).await,
        }
    }

    async fn submit_lock(
        &self,
        slot: &OrderSlot,
        order: &mut BridgeOrder,
        adapter: &dyn BridgeAdapter,
        options: &ExecuteOptions,
    ) -> HdResult<Option<ExecuteOutcome>> {
        slot.publish(order).await;
        let request = LockRequest {
            order_id: order.order_id,
            token: order.from_token.clone(),
            amount: order.amount,
            from_address: order.from_address.clone(),
            to_bridge_address: adapter.bridge_address().to_string(),
        };
        let receipt = match self
            .call_adapter(adapter, "lock", || adapter.lock(&request))
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.submission_failed(order, BridgeStep::Lock, e)),
        };

        tracing::info!(order_id = %order.order_id, tx = %receipt.tx_ref, status = ?receipt.status, "Lock submitted");
        let tx_ref = receipt.tx_ref.clone();
        let submitted = receipt.status;
        order.record_receipt(BridgeStep::Lock, adapter.provider_id().clone(), receipt);

        let status = match options.confirmation {
            Some(window) => {
                slot.publish(order).await;
                self.wait_for(adapter, &tx_ref, &window).await
            }
            None => submitted,
        };
        self.settle(order, BridgeStep::Lock, tx_ref, status, options)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PROOF
    // ═══════════════════════════════════════════════════════════════════════════

    fn verify_proof(&self, order: &mut BridgeOrder) -> HdResult<Option<ExecuteOutcome>> {
        let Some(proof) = order.proof.clone() else {
            tracing::info!(order_id = %order.order_id, "Waiting for proof");
            return Ok(Some(ExecuteOutcome::AwaitingProof));
        };

        let statement = statement_for(order)?;
        if verify_fail_closed(self.verifier.as_ref(), &proof, &statement) {
            order.advance(BridgeState::ProofVerified)?;
            return Ok(None);
        }

        order.advance(BridgeState::ProofRejected)?;
        order.fail(&HyperDriveError::proof_rejected(format!(
            "{} proof does not match the lock evidence",
            proof.proof_system
        )));
        Err(failure_of(order))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RELEASE
    // ═══════════════════════════════════════════════════════════════════════════

    async fn begin_release(
        &self,
        slot: &OrderSlot,
        order: &mut BridgeOrder,
        options: &ExecuteOptions,
    ) -> HdResult<Option<ExecuteOutcome>> {
        let adapter = self
            .pick_adapter(
                Capability::ReleaseValue,
                &order.to_token,
                Some(&order.destination_provider),
            )
            .await?;
        adapter.validate_address(&order.to_address)?;
        order.destination_provider = adapter.provider_id().clone();

        order.advance(BridgeState::Releasing)?;
        self.submit_release(slot, order, adapter.as_ref(), options)
            .await
    }

    async fn resume_release(
        &self,
        slot: &OrderSlot,
        order: &mut BridgeOrder,
        options: &ExecuteOptions,
    ) -> HdResult<Option<ExecuteOutcome>> {
        let adapter = self
            .registered_adapter(&order.destination_provider)
            .await?;
        let submitted = order
            .receipt_for(BridgeStep::Release)
            .map(|r| r.receipt.tx_ref.clone());
        match submitted {
            Some(tx_ref) => {
                let status = self
                    .confirm_submitted(adapter.as_ref(), &tx_ref, options)
                    .await?;
                self.settle(order, BridgeStep::Release, tx_ref, status, options)
            }
            None => {
                self.submit_release(slot, order, adapter.as_ref(), options)
                    .await
            }
        }
    }

    async fn submit_release(
        &self,
        slot: &OrderSlot,
        order: &mut BridgeOrder,
        adapter: &dyn BridgeAdapter,
        options: &ExecuteOptions,
    ) -> HdResult<Option<ExecuteOutcome>> {
        slot.publish(order).await;
        let request = ReleaseRequest {
            order_id: order.order_id,
            token: order.to_token.clone(),
            amount: order.to_amount,
            to_address: order.to_address.clone(),
        };
        let receipt = match self
            .call_adapter(adapter, "release", || adapter.release(&request))
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.submission_failed(order, BridgeStep::Release, e)),
        };

        tracing::info!(order_id = %order.order_id, tx = %receipt.tx_ref, status = ?receipt.status, "Release submitted");
        let tx_ref = receipt.tx_ref.clone();
        let submitted = receipt.status;
        order.record_receipt(BridgeStep::Release, adapter.provider_id().clone(), receipt);

        let status = match options.confirmation {
            Some(window) => {
                slot.publish(order).await;
                self.wait_for(adapter, &tx_ref, &window).await
            }
            None => submitted,
        };
        self.settle(order, BridgeStep::Release, tx_ref, status, options)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FINALITY
    // ═══════════════════════════════════════════════════════════════════════════

    /// Polls the adapter for a submitted transaction's finality.
    ///
    /// `Confirmed` advances the order past the step, `Rejected` fails it
    /// (unless it was already released, which is only logged), and `Pending`
    /// leaves it untouched for a later call.
    pub async fn poll_for_confirmation(
        &self,
        order_id: Uuid,
        step: BridgeStep,
        wait_secs: u64,
        attempt_interval_secs: u64,
    ) -> HdResult<Confirmation> {
        let window = ConfirmationWindow::from_secs(wait_secs, attempt_interval_secs)?;
        let slot = self.order_slot(order_id)?;
        let mut order = slot.order.lock().await;

        let confirmation = self.poll_locked(&mut order, step, &window).await;
        slot.publish(&order).await;
        confirmation
    }

    async fn poll_locked(
        &self,
        order: &mut BridgeOrder,
        step: BridgeStep,
        window: &ConfirmationWindow,
    ) -> HdResult<Confirmation> {
        let order_id = order.order_id;
        let receipt = order.receipt_for(step).cloned().ok_or_else(|| {
            HyperDriveError::validation(format!("order {order_id} has no {step} transaction"))
        })?;
        let adapter = self.registered_adapter(&receipt.provider_id).await?;
        let tx_ref = receipt.receipt.tx_ref;

        let confirmation = poll_transaction(
            adapter.as_ref(),
            &tx_ref,
            window,
            self.config.adapter_timeout(),
        )
        .await;

        match confirmation {
            Confirmation::Confirmed => match (step, order.state) {
                (BridgeStep::Lock, BridgeState::Locking) => order.advance(BridgeState::Locked)?,
                (BridgeStep::Release, BridgeState::Releasing) => {
                    order.advance(BridgeState::Released)?;
                    order.release_tx_ref = Some(tx_ref);
                }
                _ => {}
            },
            Confirmation::Pending => {
                tracing::info!(order_id = %order_id, step = %step, "Still pending after wait window");
            }
            Confirmation::Rejected => {
                if order.state == BridgeState::Released {
                    tracing::error!(
                        order_id = %order_id,
                        step = %step,
                        tx = %tx_ref,
                        "Chain reports rejection for an already released order"
                    );
                } else {
                    order.fail(&HyperDriveError::transaction_rejected(format!(
                        "{step} transaction {tx_ref} rejected by {}",
                        receipt.provider_id
                    )));
                }
            }
        }
        Ok(confirmation)
    }

    async fn wait_for(
        &self,
        adapter: &dyn BridgeAdapter,
        tx_ref: &TxRef,
        window: &ConfirmationWindow,
    ) -> TxStatus {
        match poll_transaction(adapter, tx_ref, window, self.config.adapter_timeout()).await {
            Confirmation::Confirmed => TxStatus::Confirmed,
            Confirmation::Pending => TxStatus::Pending,
            Confirmation::Rejected => TxStatus::Rejected,
        }
    }

    /// Status of an already submitted transaction when resuming.
    async fn confirm_submitted(
        &self,
        adapter: &dyn BridgeAdapter,
        tx_ref: &TxRef,
        options: &ExecuteOptions,
    ) -> HdResult<TxStatus> {
        match options.confirmation {
            Some(window) => Ok(self.wait_for(adapter, tx_ref, &window).await),
            None => {
                self.call_adapter(adapter, "get_transaction_status", || {
                    adapter.get_transaction_status(tx_ref)
                })
                .await
            }
        }
    }

    /// Applies a step's finality to the order.
    fn settle(
        &self,
        order: &mut BridgeOrder,
        step: BridgeStep,
        tx_ref: TxRef,
        status: TxStatus,
        options: &ExecuteOptions,
    ) -> HdResult<Option<ExecuteOutcome>> {
        let advance = match status {
            TxStatus::Confirmed => true,
            // Without a confirmation window the receipt is trusted.
            TxStatus::Pending => options.confirmation.is_none(),
            TxStatus::Rejected => {
                order.fail(&HyperDriveError::transaction_rejected(format!(
                    "{step} transaction {tx_ref} rejected"
                )));
                return Err(failure_of(order));
            }
        };
        if !advance {
            return Ok(Some(ExecuteOutcome::AwaitingConfirmation(step)));
        }

        match step {
            BridgeStep::Lock => order.advance(BridgeState::Locked)?,
            BridgeStep::Release => {
                order.advance(BridgeState::Released)?;
                order.release_tx_ref = Some(tx_ref);
                tracing::info!(order_id = %order.order_id, "Bridge order released");
                return Ok(Some(ExecuteOutcome::Released));
            }
        }
        Ok(None)
    }

    /// Submission errors that survived the retries fail the order, except
    /// timeouts: the transaction may have landed, so the order stays in its
    /// in-flight state and the next `execute` resubmits under the same order id.
    fn submission_failed(
        &self,
        order: &mut BridgeOrder,
        step: BridgeStep,
        error: HyperDriveError,
    ) -> HyperDriveError {
        if error.kind == ErrorKind::Timeout {
            tracing::warn!(
                order_id = %order.order_id,
                step = %step,
                error = %error,
                "Submission outcome unknown, order left in flight"
            );
            return error;
        }
        order.fail(&error);
        failure_of(order).with_cause(error)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BALANCES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Balances of both addresses and the status of the order's transactions.
    pub async fn check_order_balance(&self, order_id: Uuid) -> HdResult<OrderBalance> {
        let order = self.get_order(order_id).await?;
        let source = self.registered_adapter(&order.source_provider).await?;
        let destination = self
            .registered_adapter(&order.destination_provider)
            .await?;

        let source_balance = self
            .call_adapter(source.as_ref(), "get_balance", || {
                source.get_balance(&order.from_address)
            })
            .await?;
        let destination_balance = self
            .call_adapter(destination.as_ref(), "get_balance", || {
                destination.get_balance(&order.to_address)
            })
            .await?;

        let mut lock_status = None;
        if let Some(tx_ref) = &order.lock_tx_ref {
            lock_status = Some(
                self.call_adapter(source.as_ref(), "get_transaction_status", || {
                    source.get_transaction_status(tx_ref)
                })
                .await?,
            );
        }
        let mut release_status = None;
        if let Some(receipt) = order.receipt_for(BridgeStep::Release) {
            release_status = Some(
                self.call_adapter(destination.as_ref(), "get_transaction_status", || {
                    destination.get_transaction_status(&receipt.receipt.tx_ref)
                })
                .await?,
            );
        }

        Ok(OrderBalance {
            order_id,
            state: order.state,
            source_balance,
            destination_balance,
            lock_status,
            release_status,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // HELPERS
    // ═══════════════════════════════════════════════════════════════════════════

    /// One adapter call with per-attempt timeout and exponential backoff.
    ///
    /// Transient failures are retried up to `retry.max_attempts`; each one is
    /// reported to the registry and each success clears the provider's count.
    async fn call_adapter<T, F, Fut>(
        &self,
        adapter: &dyn BridgeAdapter,
        operation: &str,
        mut call: F,
    ) -> HdResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HdResult<T>>,
    {
        let provider_id = adapter.provider_id();
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match with_timeout(self.config.adapter_timeout(), operation, call()).await {
                Ok(value) => {
                    self.registry.record_success(provider_id).await;
                    return Ok(value);
                }
                Err(e) => e,
            };

            if error.kind.counts_against_health() {
                self.registry.record_failure(provider_id).await;
            }
            if !error.is_retryable() || attempt >= retry.max_attempts {
                tracing::warn!(
                    provider = %provider_id,
                    operation,
                    attempts = attempt,
                    error = %error,
                    "Adapter call failed"
                );
                return Err(error);
            }

            let delay = retry.delay_for(attempt);
            tracing::debug!(
                provider = %provider_id,
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying adapter call"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn order_slot(&self, order_id: Uuid) -> HdResult<Arc<OrderSlot>> {
        self.orders
            .get(&order_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| HyperDriveError::not_found(format!("bridge order {order_id} not found")))
    }

    /// First active adapter for `capability` holding `token`, preferring `preferred`.
    async fn pick_adapter(
        &self,
        capability: Capability,
        token: &str,
        preferred: Option<&ProviderId>,
    ) -> HdResult<Arc<dyn BridgeAdapter>> {
        let candidates = self
            .registry
            .select_matching(capability, &HashSet::new(), |adapter| {
                adapter.supports_token(token)
            })
            .await;

        if let Some(preferred) = preferred {
            if let Some(adapter) = candidates.iter().find(|a| a.provider_id() == preferred) {
                return Ok(Arc::clone(adapter));
            }
        }
        if let Some(adapter) = candidates.into_iter().next() {
            return Ok(adapter);
        }

        let known = self
            .registry
            .any_registered(capability, |adapter| adapter.supports_token(token))
            .await;
        if known {
            Err(HyperDriveError::no_provider(format!(
                "no active adapter can {capability} for {token}"
            )))
        } else {
            Err(HyperDriveError::validation(format!(
                "no bridge adapter supports {token} for {capability}"
            )))
        }
    }

    /// The adapter a transaction was submitted through, regardless of health.
    async fn registered_adapter(&self, provider_id: &ProviderId) -> HdResult<Arc<dyn BridgeAdapter>> {
        self.registry.adapter(provider_id).await.ok_or_else(|| {
            HyperDriveError::no_provider(format!("{provider_id} is no longer registered"))
        })
    }
}

fn statement_for(order: &BridgeOrder) -> HdResult<ProofStatement> {
    let lock_tx_ref = order.lock_tx_ref.as_ref().ok_or_else(|| {
        HyperDriveError::invalid_transition(format!(
            "order {} has no lock transaction yet",
            order.order_id
        ))
    })?;
    Ok(ProofStatement::new(
        ClaimedInputs {
            order_id: order.order_id,
            lock_tx_ref: lock_tx_ref.to_string(),
            token: order.from_token.clone(),
            amount: order.amount,
            source_commitment: address_commitment(&order.from_address),
        },
        ClaimedOutputs {
            token: order.to_token.clone(),
            amount: order.to_amount,
            destination_commitment: address_commitment(&order.to_address),
        },
    ))
}

fn failure_of(order: &BridgeOrder) -> HyperDriveError {
    match &order.failure {
        Some(failure) => failure.to_error(order.order_id),
        None => HyperDriveError::internal(format!(
            "order {} is {} without a recorded failure",
            order.order_id, order.state
        )),
    }
}

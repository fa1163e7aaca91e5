use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use hyperdrive_bridge::{
    BridgeAdapter, BridgeStep, LockRequest, ReleaseRequest, TxReceipt, TxRef, TxStatus,
};
use hyperdrive_common::{
    Amount, Capability, ErrorKind, HdResult, HyperDriveError, Provider, ProviderCategory,
    ProviderId,
};

/// What a lock or release submission does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockScript {
    Submit(TxStatus),
    Fail(ErrorKind),
    /// Fails the next `n` submissions with the kind, then confirms.
    FailTimes(u32, ErrorKind),
}

impl LockScript {
    /// The script for this submission; counts down `FailTimes`.
    fn play(&mut self) -> LockScript {
        match *self {
            LockScript::FailTimes(0, _) => {
                *self = LockScript::Submit(TxStatus::Confirmed);
                *self
            }
            LockScript::FailTimes(n, kind) => {
                *self = LockScript::FailTimes(n - 1, kind);
                LockScript::Fail(kind)
            }
            other => other,
        }
    }
}

/// What `get_transaction_status` reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusScript {
    Always(TxStatus),
    /// `Pending` for the first `n` queries, then `Confirmed`.
    ConfirmAfter(u32),
    Fail(ErrorKind),
}

struct ChainScript {
    lock: LockScript,
    release: LockScript,
    status: StatusScript,
    balance: Option<Amount>,
    delay: Option<Duration>,
}

/// Chain adapter that records every call and answers from a script.
pub struct ScriptedBridgeAdapter {
    id: ProviderId,
    tokens: HashSet<String>,
    bridge_address: String,
    script: Mutex<ChainScript>,
    submitted: Mutex<HashMap<(Uuid, BridgeStep), TxReceipt>>,
    locks: AtomicU32,
    releases: AtomicU32,
    status_queries: AtomicU32,
    balance_queries: AtomicU32,
}

impl ScriptedBridgeAdapter {
    /// Confirms every submission immediately.
    pub fn new(id: &str, tokens: &[&str]) -> Self {
        Self {
            id: ProviderId::new(id),
            tokens: tokens.iter().map(|t| t.to_ascii_uppercase()).collect(),
            bridge_address: format!("{id}-bridge"),
            script: Mutex::new(ChainScript {
                lock: LockScript::Submit(TxStatus::Confirmed),
                release: LockScript::Submit(TxStatus::Confirmed),
                status: StatusScript::Always(TxStatus::Confirmed),
                balance: None,
                delay: None,
            }),
            submitted: Mutex::new(HashMap::new()),
            locks: AtomicU32::new(0),
            releases: AtomicU32::new(0),
            status_queries: AtomicU32::new(0),
            balance_queries: AtomicU32::new(0),
        }
    }

    pub fn with_lock(self, lock: LockScript) -> Self {
        self.script().lock = lock;
        self
    }

    pub fn with_release(self, release: LockScript) -> Self {
        self.script().release = release;
        self
    }

    pub fn with_status(self, status: StatusScript) -> Self {
        self.script().status = status;
        self
    }

    /// Reports `balance` for every address and declares `QueryBalance`.
    pub fn with_balance(self, balance: Amount) -> Self {
        self.script().balance = Some(balance);
        self
    }

    /// Lock and release sleep for `delay` before answering.
    pub fn with_submit_delay(self, delay: Duration) -> Self {
        self.script().delay = Some(delay);
        self
    }

    pub fn set_status(&self, status: StatusScript) {
        self.script().status = status;
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        let mut capabilities = vec![
            Capability::LockValue,
            Capability::ReleaseValue,
            Capability::TransactionStatus,
        ];
        if self.script().balance.is_some() {
            capabilities.push(Capability::QueryBalance);
        }
        capabilities
    }

    pub fn lock_calls(&self) -> u32 {
        self.locks.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> u32 {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_queries.load(Ordering::SeqCst)
    }

    pub fn balance_calls(&self) -> u32 {
        self.balance_queries.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> u32 {
        self.lock_calls() + self.release_calls() + self.status_calls() + self.balance_calls()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, ChainScript> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn submit(&self, order_id: Uuid, step: BridgeStep, script: LockScript) -> HdResult<TxReceipt> {
        let delay = self.script().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut submitted = self.submitted.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(receipt) = submitted.get(&(order_id, step)) {
            return Ok(receipt.clone());
        }
        match script {
            LockScript::Submit(status) => {
                let receipt = TxReceipt::new(
                    TxRef::new(format!("{}-{step}-{}", self.id, submitted.len())),
                    status,
                );
                submitted.insert((order_id, step), receipt.clone());
                Ok(receipt)
            }
            LockScript::Fail(kind) | LockScript::FailTimes(_, kind) => Err(HyperDriveError::new(
                kind,
                format!("{} scripted {step} failure", self.id),
            )),
        }
    }
}

#[async_trait]
impl Provider for ScriptedBridgeAdapter {
    fn provider_id(&self) -> &ProviderId {
        &self.id
    }

    fn category(&self) -> ProviderCategory {
        ProviderCategory::Blockchain
    }

    async fn health_check(&self) -> HdResult<()> {
        Ok(())
    }
}

#[async_trait]
impl BridgeAdapter for ScriptedBridgeAdapter {
    fn supports_token(&self, token: &str) -> bool {
        self.tokens.contains(&token.to_ascii_uppercase())
    }

    fn bridge_address(&self) -> &str {
        &self.bridge_address
    }

    async fn get_balance(&self, _address: &str) -> HdResult<Amount> {
        self.balance_queries.fetch_add(1, Ordering::SeqCst);
        let balance = self.script().balance;
        balance.ok_or_else(|| HyperDriveError::not_supported("get_balance", &self.id))
    }

    async fn lock(&self, request: &LockRequest) -> HdResult<TxReceipt> {
        self.locks.fetch_add(1, Ordering::SeqCst);
        let script = self.script().lock.play();
        self.submit(request.order_id, BridgeStep::Lock, script).await
    }

    async fn release(&self, request: &ReleaseRequest) -> HdResult<TxReceipt> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        let script = self.script().release.play();
        self.submit(request.order_id, BridgeStep::Release, script).await
    }

    async fn get_transaction_status(&self, _tx_ref: &TxRef) -> HdResult<TxStatus> {
        let seen = self.status_queries.fetch_add(1, Ordering::SeqCst);
        let script = self.script().status;
        match script {
            StatusScript::Always(status) => Ok(status),
            StatusScript::ConfirmAfter(n) if seen < n => Ok(TxStatus::Pending),
            StatusScript::ConfirmAfter(_) => Ok(TxStatus::Confirmed),
            StatusScript::Fail(kind) => Err(HyperDriveError::new(
                kind,
                format!("{} scripted status failure", self.id),
            )),
        }
    }
}

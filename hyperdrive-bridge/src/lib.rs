//! Cross-chain value bridge.
//!
//! ```text
//! ┌──────────────┐  lock   ┌──────────────┐  verify  ┌──────────────┐  release  ┌──────────────┐
//! │ source chain │ ──────► │    Locked    │ ───────► │ProofVerified │ ────────► │ dest. chain  │
//! └──────────────┘         └──────────────┘ (option) └──────────────┘           └──────────────┘
//! ```
//!
//! A [`BridgeOrchestrator`] owns the orders and drives them through the
//! [`BridgeState`] machine. Chains plug in through [`BridgeAdapter`] and are
//! chosen through the shared provider registry. Proofs are checked by any
//! [`hyperdrive_verifier::ProofVerifier`].

pub mod adapter;
pub mod confirmation;
pub mod memory;
pub mod orchestrator;
pub mod order;
pub mod rates;

pub use adapter::{
    AccountKeys, BridgeAdapter, LockRequest, ReleaseRequest, TxReceipt, TxRef, TxStatus,
};
pub use confirmation::{poll_transaction, Confirmation, ConfirmationWindow};
pub use memory::InMemoryChain;
pub use orchestrator::{
    BridgeOrchestrator, BridgeRegistry, ExecuteOptions, ExecuteOutcome, ExecuteReport,
    OrderBalance,
};
pub use order::{
    BridgeOrder, BridgeState, BridgeStep, CreateOrderRequest, OrderFailure, StateTransition,
    StepReceipt,
};
pub use rates::{ExchangeRate, ExchangeRateSource, FixedRates};

//! The uniform result contract used by every HyperDrive operation.
//!
//! Every public operation returns [`HdResult<T>`]. A failure carries an
//! [`ErrorKind`] that drives retry decisions, a human readable message, the
//! lower-level error it wraps (if any) and per-provider diagnostics for
//! aggregated outcomes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ProviderId;

/// Result alias used across the HyperDrive crates.
pub type HdResult<T> = Result<T, HyperDriveError>;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR KIND
// ═══════════════════════════════════════════════════════════════════════════════

/// Classification of a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input. Never retried.
    #[error("validation error")]
    Validation,

    /// The adapter does not implement the operation.
    #[error("capability not supported")]
    CapabilityNotSupported,

    /// Transient backend failure.
    #[error("provider unavailable")]
    ProviderUnavailable,

    /// A bounded wait elapsed.
    #[error("timeout")]
    Timeout,

    /// No registered, active provider can serve the request.
    #[error("no provider available")]
    NoProviderAvailable,

    /// Fewer providers succeeded than the policy requires.
    #[error("partial failure")]
    PartialFailure,

    /// The proof verifier rejected the proof.
    #[error("proof rejected")]
    ProofRejected,

    /// The chain reported the transaction as failed.
    #[error("transaction rejected")]
    TransactionRejected,

    /// The entity is already at or past the requested state.
    #[error("already in state")]
    AlreadyInState,

    /// A provider id is already registered with a different capability set.
    #[error("duplicate provider")]
    DuplicateProvider,

    /// The provider id is not registered.
    #[error("unknown provider")]
    UnknownProvider,

    /// The record does not exist.
    #[error("not found")]
    NotFound,

    /// The record exists but has been soft-deleted.
    #[error("deleted")]
    Deleted,

    /// The requested state change is not a legal transition.
    #[error("invalid transition")]
    InvalidTransition,

    /// Programming invariant violation or an unclassified backend error.
    #[error("internal error")]
    Internal,
}

impl ErrorKind {
    /// Whether an adapter call failing with this kind may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::ProviderUnavailable | ErrorKind::Timeout | ErrorKind::Internal
        )
    }

    /// Whether this failure says something about the provider's health.
    ///
    /// Missing records and unsupported operations are not the provider's fault.
    pub fn counts_against_health(&self) -> bool {
        self.is_transient()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROVIDER DIAGNOSTICS
// ═══════════════════════════════════════════════════════════════════════════════

/// One provider's failure inside an aggregated outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider_id: ProviderId,
    pub kind: ErrorKind,
    pub message: String,
    /// Number of attempts made against the provider before giving up.
    pub attempts: u32,
}

impl ProviderFailure {
    pub fn from_error(provider_id: ProviderId, error: &HyperDriveError, attempts: u32) -> Self {
        Self {
            provider_id,
            kind: error.kind,
            message: error.message.clone(),
            attempts,
        }
    }
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} after {} attempt(s)): {}",
            self.provider_id, self.kind, self.attempts, self.message
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HYPERDRIVE ERROR
// ═══════════════════════════════════════════════════════════════════════════════

/// The error half of the result contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct HyperDriveError {
    pub kind: ErrorKind,
    pub message: String,
    /// The lower-level error this one wraps.
    #[source]
    pub cause: Option<Box<HyperDriveError>>,
    /// Per-provider failures collected while producing this outcome.
    #[serde(default)]
    pub failures: Vec<ProviderFailure>,
}

impl HyperDriveError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            failures: Vec::new(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_supported(operation: &str, provider: &ProviderId) -> Self {
        Self::new(
            ErrorKind::CapabilityNotSupported,
            format!("{provider} does not support {operation}"),
        )
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderUnavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn no_provider(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoProviderAvailable, message)
    }

    pub fn partial_failure(message: impl Into<String>, failures: Vec<ProviderFailure>) -> Self {
        Self::new(ErrorKind::PartialFailure, message).with_failures(failures)
    }

    pub fn proof_rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProofRejected, message)
    }

    pub fn transaction_rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransactionRejected, message)
    }

    pub fn already_in_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyInState, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn deleted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Deleted, message)
    }

    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidTransition, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach the lower-level error this one wraps.
    pub fn with_cause(mut self, cause: HyperDriveError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Attach per-provider diagnostics.
    pub fn with_failures(mut self, failures: Vec<ProviderFailure>) -> Self {
        self.failures = failures;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_transient()
    }

    /// The innermost error in the cause chain.
    pub fn root_cause(&self) -> &HyperDriveError {
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            current = cause;
        }
        current
    }
}

impl From<serde_json::Error> for HyperDriveError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("serialization error: {err}"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTRUCTION AND PROPAGATION HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Successful outcome.
pub fn ok<T>(value: T) -> HdResult<T> {
    Ok(value)
}

/// Failed outcome with the given message and kind.
pub fn fail<T>(message: impl Into<String>, kind: ErrorKind) -> HdResult<T> {
    Err(HyperDriveError::new(kind, message))
}

/// Wraps a lower-level result into a higher-level one, keeping the original as `cause`.
pub trait ResultExt<T> {
    fn wrap_err(self, kind: ErrorKind, message: impl Into<String>) -> HdResult<T>;

    /// Like [`ResultExt::wrap_err`] but keeps the inner kind.
    fn context(self, message: impl Into<String>) -> HdResult<T>;
}

impl<T> ResultExt<T> for HdResult<T> {
    fn wrap_err(self, kind: ErrorKind, message: impl Into<String>) -> HdResult<T> {
        self.map_err(|inner| HyperDriveError::new(kind, message).with_cause(inner))
    }

    fn context(self, message: impl Into<String>) -> HdResult<T> {
        self.map_err(|inner| {
            let kind = inner.kind;
            let failures = inner.failures.clone();
            HyperDriveError::new(kind, message)
                .with_failures(failures)
                .with_cause(inner)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_build_value_xor_error() {
        let good: HdResult<u32> = ok(7);
        assert_eq!(good, Ok(7));

        let bad: HdResult<u32> = fail("amount must be positive", ErrorKind::Validation);
        let err = bad.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.to_string(), "validation error: amount must be positive");
    }

    #[test]
    fn test_wrap_err_preserves_cause() {
        let inner: HdResult<()> = Err(HyperDriveError::timeout("mongo did not answer"));
        let outer = inner
            .wrap_err(ErrorKind::PartialFailure, "save reached 0 of 1")
            .unwrap_err();

        assert_eq!(outer.kind, ErrorKind::PartialFailure);
        let cause = outer.cause.as_deref().unwrap();
        assert_eq!(cause.kind, ErrorKind::Timeout);
        assert_eq!(outer.root_cause().message, "mongo did not answer");
        assert!(std::error::Error::source(&outer).is_some());
    }

    #[test]
    fn test_context_keeps_kind_and_failures() {
        let failure = ProviderFailure {
            provider_id: ProviderId::from("ipfs"),
            kind: ErrorKind::ProviderUnavailable,
            message: "gateway down".into(),
            attempts: 3,
        };
        let inner: HdResult<()> = Err(HyperDriveError::partial_failure(
            "0 of 1 writes",
            vec![failure.clone()],
        ));
        let outer = inner.context("saving holon").unwrap_err();
        assert_eq!(outer.kind, ErrorKind::PartialFailure);
        assert_eq!(outer.failures, vec![failure]);
    }

    #[test]
    fn test_transient_classification() {
        assert!(ErrorKind::Timeout.is_transient());
        assert!(ErrorKind::ProviderUnavailable.is_transient());
        assert!(!ErrorKind::Validation.is_transient());
        assert!(!ErrorKind::CapabilityNotSupported.is_transient());
        assert!(!ErrorKind::NotFound.counts_against_health());
    }

    #[test]
    fn test_error_roundtrips_through_json() {
        let err = HyperDriveError::proof_rejected("bad commitment")
            .with_cause(HyperDriveError::validation("proof length 3"));
        let json = serde_json::to_string(&err).unwrap();
        let back: HyperDriveError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}

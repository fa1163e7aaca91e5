//! hyperdrive-verifier
//!
//! Verification contract for proofs that gate bridge releases. A verifier is
//! pure with respect to chain state, deterministic for a given proof and
//! statement, and fails closed: any internal error counts as rejection.

pub mod commitment;
pub mod proof;
pub mod registry;
pub mod statement;

pub use commitment::{CommitmentProver, CommitmentVerifier, COMMITMENT_PROOF_SYSTEM};
pub use proof::BridgeProof;
pub use registry::VerifierRegistry;
pub use statement::{address_commitment, ClaimedInputs, ClaimedOutputs, ProofStatement};

use hyperdrive_common::HdResult;

/// Checks a proof against the statement it claims to prove.
pub trait ProofVerifier: Send + Sync {
    /// Identifier of the proof system this verifier accepts.
    fn proof_system(&self) -> &str;

    /// `Ok(true)` on accept, `Ok(false)` on a well-formed but invalid proof,
    /// `Err` when the proof or statement cannot be checked at all.
    fn verify(&self, proof: &BridgeProof, statement: &ProofStatement) -> HdResult<bool>;
}

/// Collapses a verifier outcome to accept/reject, treating errors as rejection.
pub fn verify_fail_closed(
    verifier: &dyn ProofVerifier,
    proof: &BridgeProof,
    statement: &ProofStatement,
) -> bool {
    match verifier.verify(proof, statement) {
        Ok(accepted) => accepted,
        Err(e) => {
            tracing::warn!(
                proof_system = %proof.proof_system,
                error = %e,
                "Proof verification errored, treating as rejected"
            );
            false
        }
    }
}

//! Dispatch to a verifier by proof system id.

use std::collections::HashMap;
use std::sync::Arc;

use hyperdrive_common::{HdResult, HyperDriveError};

use crate::proof::BridgeProof;
use crate::statement::ProofStatement;
use crate::ProofVerifier;

/// Routes each proof to the verifier registered for its `proof_system`.
///
/// Proofs from unknown systems are rejected.
#[derive(Default, Clone)]
pub struct VerifierRegistry {
    verifiers: HashMap<String, Arc<dyn ProofVerifier>>,
}

impl VerifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn ProofVerifier>) -> Self {
        self.register(verifier);
        self
    }

    pub fn register(&mut self, verifier: Arc<dyn ProofVerifier>) {
        self.verifiers
            .insert(verifier.proof_system().to_string(), verifier);
    }

    pub fn systems(&self) -> Vec<&str> {
        let mut systems: Vec<&str> = self.verifiers.keys().map(String::as_str).collect();
        systems.sort_unstable();
        systems
    }
}

impl ProofVerifier for VerifierRegistry {
    fn proof_system(&self) -> &str {
        "registry"
    }

    fn verify(&self, proof: &BridgeProof, statement: &ProofStatement) -> HdResult<bool> {
        let verifier = self.verifiers.get(&proof.proof_system).ok_or_else(|| {
            HyperDriveError::proof_rejected(format!(
                "no verifier registered for '{}'",
                proof.proof_system
            ))
        })?;
        verifier.verify(proof, statement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::{CommitmentProver, CommitmentVerifier};
    use crate::statement::{address_commitment, ClaimedInputs, ClaimedOutputs};
    use hyperdrive_common::{Amount, ErrorKind};
    use uuid::Uuid;

    fn statement() -> ProofStatement {
        ProofStatement::new(
            ClaimedInputs {
                order_id: Uuid::new_v4(),
                lock_tx_ref: "eth-0x01".into(),
                token: "ETH".into(),
                amount: Amount::new(3),
                source_commitment: address_commitment("0xabc"),
            },
            ClaimedOutputs {
                token: "ZEC".into(),
                amount: Amount::new(3),
                destination_commitment: address_commitment("zs1dest"),
            },
        )
    }

    #[test]
    fn test_dispatches_by_system() {
        let registry =
            VerifierRegistry::new().with_verifier(Arc::new(CommitmentVerifier::new([9; 32])));
        assert_eq!(registry.systems(), vec!["hyperdrive-commitment-v1"]);

        let statement = statement();
        let proof = CommitmentProver::new([9; 32]).prove(&statement).unwrap();
        assert!(registry.verify(&proof, &statement).unwrap());
    }

    #[test]
    fn test_unknown_system_fails_closed() {
        let registry = VerifierRegistry::new();
        let proof = BridgeProof::new("groth16", vec![0; 32]);
        let err = registry.verify(&proof, &statement()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProofRejected);
        assert!(!crate::verify_fail_closed(&registry, &proof, &statement()));
    }
}

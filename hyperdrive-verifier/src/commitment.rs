//! Reference keyed-commitment proof system.
//!
//! A proof is `SHA-256(domain || key || statement digest)`. The prover and
//! verifier share the key, so this stands in for an external proving system
//! in tests and single-operator deployments; it attests that the lock
//! evidence and the claimed destination were bound together by the key
//! holder.

use sha2::{Digest, Sha256};

use hyperdrive_common::{HdResult, HyperDriveError};

use crate::proof::BridgeProof;
use crate::statement::ProofStatement;
use crate::ProofVerifier;

pub const COMMITMENT_PROOF_SYSTEM: &str = "hyperdrive-commitment-v1";

const DOMAIN: &[u8] = b"hyperdrive_commitment_proof_v1";

fn commit(key: &[u8; 32], statement: &ProofStatement) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN);
    hasher.update(key);
    hasher.update(statement.digest());
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

/// Produces commitment proofs for statements.
#[derive(Clone)]
pub struct CommitmentProver {
    key: [u8; 32],
}

impl CommitmentProver {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn prove(&self, statement: &ProofStatement) -> HdResult<BridgeProof> {
        statement.validate()?;
        Ok(BridgeProof::new(
            COMMITMENT_PROOF_SYSTEM,
            commit(&self.key, statement).to_vec(),
        ))
    }
}

/// Verifies commitment proofs.
#[derive(Clone)]
pub struct CommitmentVerifier {
    key: [u8; 32],
}

impl CommitmentVerifier {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }
}

impl ProofVerifier for CommitmentVerifier {
    fn proof_system(&self) -> &str {
        COMMITMENT_PROOF_SYSTEM
    }

    fn verify(&self, proof: &BridgeProof, statement: &ProofStatement) -> HdResult<bool> {
        if proof.proof_system != COMMITMENT_PROOF_SYSTEM {
            return Err(HyperDriveError::proof_rejected(format!(
                "unsupported proof system '{}'",
                proof.proof_system
            )));
        }
        statement.validate()?;

        let bytes = proof.bytes()?;
        if bytes.len() != 32 {
            return Err(HyperDriveError::validation(format!(
                "commitment proof must be 32 bytes, got {}",
                bytes.len()
            )));
        }

        let expected = commit(&self.key, statement);
        // Fold the comparison so its cost does not depend on the first mismatch.
        let diff = expected
            .iter()
            .zip(bytes.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        Ok(diff == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::{address_commitment, ClaimedInputs, ClaimedOutputs};
    use hyperdrive_common::{Amount, ErrorKind};
    use uuid::Uuid;

    const KEY: [u8; 32] = [7u8; 32];

    fn statement() -> ProofStatement {
        ProofStatement::new(
            ClaimedInputs {
                order_id: Uuid::new_v4(),
                lock_tx_ref: "tx-lock".into(),
                token: "SOL".into(),
                amount: Amount::new(10),
                source_commitment: address_commitment("alice"),
            },
            ClaimedOutputs {
                token: "XRD".into(),
                amount: Amount::new(10),
                destination_commitment: address_commitment("bob"),
            },
        )
    }

    #[test]
    fn test_valid_proof_accepted() {
        let statement = statement();
        let proof = CommitmentProver::new(KEY).prove(&statement).unwrap();
        assert!(CommitmentVerifier::new(KEY).verify(&proof, &statement).unwrap());
    }

    #[test]
    fn test_deterministic() {
        let statement = statement();
        let proof = CommitmentProver::new(KEY).prove(&statement).unwrap();
        let verifier = CommitmentVerifier::new(KEY);
        assert_eq!(
            verifier.verify(&proof, &statement).unwrap(),
            verifier.verify(&proof, &statement).unwrap()
        );
    }

    #[test]
    fn test_redirected_destination_rejected() {
        let statement = statement();
        let proof = CommitmentProver::new(KEY).prove(&statement).unwrap();

        let mut redirected = statement.clone();
        redirected.claimed_outputs.destination_commitment = address_commitment("mallory");
        assert!(!CommitmentVerifier::new(KEY).verify(&proof, &redirected).unwrap());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let statement = statement();
        let proof = CommitmentProver::new([1u8; 32]).prove(&statement).unwrap();
        assert!(!CommitmentVerifier::new(KEY).verify(&proof, &statement).unwrap());
    }

    #[test]
    fn test_malformed_proof_is_an_error() {
        let statement = statement();
        let proof = BridgeProof::new(COMMITMENT_PROOF_SYSTEM, vec![1, 2, 3]);
        let err = CommitmentVerifier::new(KEY).verify(&proof, &statement).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        let foreign = BridgeProof::new("stark-v2", vec![0; 32]);
        let err = CommitmentVerifier::new(KEY).verify(&foreign, &statement).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProofRejected);
    }
}

//! The public statement a bridge proof attests to.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use hyperdrive_common::{Amount, HdResult, HyperDriveError};

/// Lock evidence on the source chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedInputs {
    pub order_id: Uuid,
    pub lock_tx_ref: String,
    pub token: String,
    pub amount: Amount,
    /// Hex SHA-256 of the source address; the address itself stays off the statement.
    pub source_commitment: String,
}

/// Claimed destination of the locked value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedOutputs {
    pub token: String,
    pub amount: Amount,
    /// Hex SHA-256 of the destination address.
    pub destination_commitment: String,
}

/// Statement checked by a [`crate::ProofVerifier`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStatement {
    pub claimed_inputs: ClaimedInputs,
    pub claimed_outputs: ClaimedOutputs,
}

impl ProofStatement {
    pub fn new(claimed_inputs: ClaimedInputs, claimed_outputs: ClaimedOutputs) -> Self {
        Self {
            claimed_inputs,
            claimed_outputs,
        }
    }

    /// Structural checks every verifier applies before looking at the proof.
    pub fn validate(&self) -> HdResult<()> {
        let inputs = &self.claimed_inputs;
        let outputs = &self.claimed_outputs;
        if inputs.amount.is_zero() || outputs.amount.is_zero() {
            return Err(HyperDriveError::validation("statement amounts must be positive"));
        }
        if inputs.lock_tx_ref.trim().is_empty() {
            return Err(HyperDriveError::validation("statement has no lock transaction"));
        }
        if inputs.token.is_empty() || outputs.token.is_empty() {
            return Err(HyperDriveError::validation("statement tokens must be set"));
        }
        for commitment in [&inputs.source_commitment, &outputs.destination_commitment] {
            let bytes = hex::decode(commitment).map_err(|e| {
                HyperDriveError::validation(format!("address commitment is not hex: {e}"))
            })?;
            if bytes.len() != 32 {
                return Err(HyperDriveError::validation(
                    "address commitment must be 32 bytes",
                ));
            }
        }
        Ok(())
    }

    /// Digest of the statement fields in a fixed order.
    pub fn digest(&self) -> [u8; 32] {
        let inputs = &self.claimed_inputs;
        let outputs = &self.claimed_outputs;

        let mut hasher = Sha256::new();
        hasher.update(b"hyperdrive_bridge_statement_v1");
        hasher.update(inputs.order_id.as_bytes());
        update_str(&mut hasher, &inputs.lock_tx_ref);
        update_str(&mut hasher, &inputs.token);
        hasher.update(inputs.amount.units().to_be_bytes());
        update_str(&mut hasher, &inputs.source_commitment);
        update_str(&mut hasher, &outputs.token);
        hasher.update(outputs.amount.units().to_be_bytes());
        update_str(&mut hasher, &outputs.destination_commitment);

        let result = hasher.finalize();
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&result);
        digest
    }
}

// Length prefix keeps adjacent strings from colliding.
fn update_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

/// Hex SHA-256 commitment to an address.
pub fn address_commitment(address: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"hyperdrive_address_v1");
    hasher.update(address.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProofStatement {
        ProofStatement::new(
            ClaimedInputs {
                order_id: Uuid::nil(),
                lock_tx_ref: "sol-tx-1".into(),
                token: "SOL".into(),
                amount: Amount::new(10),
                source_commitment: address_commitment("alice"),
            },
            ClaimedOutputs {
                token: "XRD".into(),
                amount: Amount::new(20),
                destination_commitment: address_commitment("account_tdx_bob"),
            },
        )
    }

    #[test]
    fn test_valid_statement() {
        sample().validate().unwrap();
    }

    #[test]
    fn test_zero_amount_rejected() {
        let mut statement = sample();
        statement.claimed_outputs.amount = Amount::ZERO;
        assert!(statement.validate().is_err());
    }

    #[test]
    fn test_bad_commitment_rejected() {
        let mut statement = sample();
        statement.claimed_inputs.source_commitment = "zz".into();
        assert!(statement.validate().is_err());
        statement.claimed_inputs.source_commitment = "abcd".into();
        assert!(statement.validate().is_err());
    }

    #[test]
    fn test_digest_binds_every_field() {
        let base = sample().digest();
        let mut changed = sample();
        changed.claimed_outputs.destination_commitment = address_commitment("mallory");
        assert_ne!(base, changed.digest());

        let mut changed = sample();
        changed.claimed_inputs.amount = Amount::new(11);
        assert_ne!(base, changed.digest());

        assert_eq!(base, sample().digest());
    }
}

//! Proof material attached to a bridge order.

use serde::{Deserialize, Serialize};

use hyperdrive_common::{HdResult, HyperDriveError};

/// An opaque proof tagged with the system that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeProof {
    /// Proof system identifier used to pick a verifier.
    pub proof_system: String,
    /// Hex-encoded proof bytes.
    pub proof_hex: String,
}

impl BridgeProof {
    pub fn new(proof_system: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            proof_system: proof_system.into(),
            proof_hex: hex::encode(bytes),
        }
    }

    /// Decoded proof bytes.
    pub fn bytes(&self) -> HdResult<Vec<u8>> {
        hex::decode(&self.proof_hex)
            .map_err(|e| HyperDriveError::validation(format!("proof is not valid hex: {e}")))
    }
}

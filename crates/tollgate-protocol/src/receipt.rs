use alloy::primitives::Address;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A payment the facilitator has confirmed. Only ever built from a
/// facilitator answer, never straight from request input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentProof {
    pub payer: Address,
    /// `None` when the facilitator confirmed payment without naming a
    /// transaction; such calls cannot be correlated in the ledger.
    pub transaction: Option<String>,
    pub network: String,
    pub amount_micro_units: u64,
}

/// Payload of the receipt header returned on paid responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction: Option<String>,
    pub payer: Address,
    pub network: String,
}

impl Receipt {
    /// Base64 JSON, ready for the receipt header.
    pub fn encode(&self) -> String {
        let json = serde_json::json!({
            "transaction": self.transaction,
            "payer": format!("{:#x}", self.payer),
            "network": self.network,
        });
        base64::engine::general_purpose::STANDARD.encode(json.to_string())
    }

    pub fn decode(header: &str) -> Result<Self, ProtocolError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(header.trim())
            .map_err(|_| ProtocolError::InvalidReceipt("not base64".to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ProtocolError::InvalidReceipt(format!("not valid JSON: {e}")))
    }
}

impl From<&PaymentProof> for Receipt {
    fn from(proof: &PaymentProof) -> Self {
        Self {
            transaction: proof.transaction.clone(),
            payer: proof.payer,
            network: proof.network.clone(),
        }
    }
}

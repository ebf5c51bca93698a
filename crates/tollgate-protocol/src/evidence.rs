use alloy::primitives::Address;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Caller-supplied claim that a transfer was broadcast. Untrusted until a
/// facilitator has verified it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvidence {
    pub transaction: String,
    pub payer: Address,
    /// Decimal amount as quoted ("1.5").
    pub amount: String,
    pub network: String,
}

impl PaymentEvidence {
    /// Decode a base64 JSON token. Both the standard and the URL-safe
    /// alphabets are accepted since tokens travel in query strings.
    pub fn decode(token: &str) -> Result<Self, ProtocolError> {
        let token = token.trim();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(token)
            .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(token))
            .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(token))
            .map_err(|_| ProtocolError::InvalidEvidence("token is not base64".to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ProtocolError::InvalidEvidence(format!("token is not valid JSON: {e}")))
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        let json = serde_json::to_vec(self)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }
}

//! Payer-side signing for the programmatic (secret-supplied) payment path.
//!
//! The gateway never builds or broadcasts transfers itself. It signs an
//! authorization with the caller's key and hands it to the facilitator,
//! which executes the transfer and the fetch.

use std::fmt;

use alloy::primitives::Address;
use alloy::signers::{local::PrivateKeySigner, Signer};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::requirement::PaymentRequirement;

/// What the payer agrees to: pay `amount` micro-units to `to` on `network`
/// for `resource`, once (`nonce`), before `valid_before`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorization {
    pub from: Address,
    pub to: Address,
    pub amount: String,
    pub network: String,
    pub resource: String,
    pub nonce: String,
    pub valid_before: i64,
}

impl PaymentAuthorization {
    /// Bytes the signature covers: the compact JSON encoding, field order
    /// as declared.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedAuthorization {
    pub authorization: PaymentAuthorization,
    /// 0x-prefixed 65-byte EIP-191 signature over [`PaymentAuthorization::signing_bytes`].
    pub signature: String,
}

/// A settlement account derived from a caller-supplied secret.
pub struct PayerAccount {
    signer: PrivateKeySigner,
}

impl fmt::Debug for PayerAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayerAccount")
            .field("address", &self.signer.address())
            .field("signer", &"[REDACTED]")
            .finish()
    }
}

impl PayerAccount {
    /// Parse a hex private key (with or without `0x`). The error never
    /// echoes the input.
    pub fn from_secret(secret: &str) -> Result<Self, ProtocolError> {
        let signer: PrivateKeySigner = secret
            .trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidSecret)?;
        Ok(Self { signer })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Sign an authorization for exactly the quoted amount, valid for
    /// `ttl_secs` from now.
    pub async fn authorize(
        &self,
        requirement: &PaymentRequirement,
        ttl_secs: i64,
    ) -> Result<SignedAuthorization, ProtocolError> {
        let authorization = PaymentAuthorization {
            from: self.signer.address(),
            to: requirement.recipient,
            amount: requirement.amount_micro_units.to_string(),
            network: requirement.network.clone(),
            resource: requirement.resource.clone(),
            nonce: uuid::Uuid::new_v4().simple().to_string(),
            valid_before: chrono::Utc::now().timestamp() + ttl_secs,
        };

        let message = authorization.signing_bytes()?;
        let signature = self
            .signer
            .sign_message(&message)
            .await
            .map_err(|e| ProtocolError::SignatureError(e.to_string()))?;

        Ok(SignedAuthorization {
            authorization,
            signature: alloy::hex::encode_prefixed(signature.as_bytes()),
        })
    }
}

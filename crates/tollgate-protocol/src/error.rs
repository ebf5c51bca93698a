use thiserror::Error;

/// Errors returned by protocol operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid evidence: {0}")]
    InvalidEvidence(String),

    #[error("invalid receipt: {0}")]
    InvalidReceipt(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("unknown settlement network: {0}")]
    UnknownNetwork(String),

    /// The payer secret could not be turned into a signing key. Never carries
    /// the secret itself.
    #[error("invalid payer secret")]
    InvalidSecret,

    #[error("signature error: {0}")]
    SignatureError(String),

    #[error("facilitator unreachable: {0}")]
    Transport(String),

    #[error("facilitator response invalid: {0}")]
    InvalidResponse(String),

    #[error("facilitator authentication failed")]
    Unauthorized,

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

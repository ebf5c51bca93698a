//! Wire-level pieces of the tollgate pay-per-call protocol.
//!
//! A gateway quotes a [`PaymentRequirement`] for each endpoint call. Callers
//! either resubmit with [`PaymentEvidence`] (a base64 token describing a
//! transfer they broadcast themselves) which the gateway hands to a
//! [`Facilitator`] for verification, or hand the gateway a payer secret so it
//! can sign a [`PaymentAuthorization`] and let the facilitator pay and fetch
//! on their behalf. Verified calls carry a [`Receipt`] back to the caller.
//!
//! The signing and settlement cryptography lives behind the facilitator and
//! `alloy`'s local signer; nothing here touches a chain directly.

pub mod authorization;
pub mod error;
pub mod evidence;
pub mod facilitator;
pub mod network;
pub mod price;
pub mod receipt;
pub mod requirement;

pub use authorization::{PayerAccount, PaymentAuthorization, SignedAuthorization};
pub use error::ProtocolError;
pub use evidence::PaymentEvidence;
pub use facilitator::{
    FetchRequest, FetchedResponse, Facilitator, HttpFacilitator, VerifyResponse,
};
pub use network::SettlementNetwork;
pub use price::{format_micro_units, parse_decimal_amount, MICRO_UNITS_PER_TOKEN};
pub use receipt::{PaymentProof, Receipt};
pub use requirement::{PaymentRequiredBody, PaymentRequirement};

/// Header carrying a base64 payment-evidence token.
pub const EVIDENCE_HEADER: &str = "X-PAYMENT";

/// Header carrying the base64 receipt on a paid response.
pub const RECEIPT_HEADER: &str = "X-PAYMENT-RESPONSE";

//! Client side of the facilitator contract.
//!
//! Two operations, both JSON over HTTP POST:
//!
//! - `/verify`: is this evidence a real transfer matching the requirement?
//! - `/pay-and-fetch`: execute a signed authorization and fetch the origin,
//!   returning the origin's answer as-is.
//!
//! When a shared secret is configured, each request body is signed with
//! HMAC-SHA256 and sent hex-encoded in `X-Facilitator-Auth`.

use alloy::primitives::Address;
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::authorization::SignedAuthorization;
use crate::error::ProtocolError;
use crate::evidence::PaymentEvidence;
use crate::requirement::PaymentRequirement;
use crate::RECEIPT_HEADER;

/// Header carrying the HMAC of the request body.
pub const AUTH_HEADER: &str = "X-Facilitator-Auth";

/// Largest pay-and-fetch body relayed back to the caller (10 MB).
const MAX_FETCHED_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Facilitator answer to `/verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<Address>,
    /// Transaction the facilitator matched, if it reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    pub network: String,
}

/// The request the facilitator should make once payment has gone through.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Whatever the facilitator answered to `/pay-and-fetch`.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    /// Raw receipt header, when the facilitator settled and reported it.
    pub receipt: Option<String>,
    pub body: Bytes,
}

impl FetchedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireFetchRequest<'a> {
    method: &'a str,
    url: &'a str,
    headers: &'a [(String, String)],
    /// base64, empty string for no body
    body: String,
}

/// Operations the gateway needs from a facilitator.
#[async_trait]
pub trait Facilitator: Send + Sync {
    async fn verify(
        &self,
        evidence: &PaymentEvidence,
        requirement: &PaymentRequirement,
    ) -> Result<VerifyResponse, ProtocolError>;

    async fn pay_and_fetch(
        &self,
        authorization: &SignedAuthorization,
        request: &FetchRequest,
    ) -> Result<FetchedResponse, ProtocolError>;
}

/// Facilitator reached over HTTP.
#[derive(Clone)]
pub struct HttpFacilitator {
    client: reqwest::Client,
    base_url: String,
    hmac_secret: Option<Vec<u8>>,
}

impl std::fmt::Debug for HttpFacilitator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFacilitator")
            .field("base_url", &self.base_url)
            .field("hmac_secret", &self.hmac_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl HttpFacilitator {
    pub fn new(client: reqwest::Client, base_url: &str, hmac_secret: Option<Vec<u8>>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            hmac_secret,
        }
    }

    async fn post(&self, path: &str, body: Vec<u8>) -> Result<reqwest::Response, ProtocolError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");

        if let Some(ref secret) = self.hmac_secret {
            request = request.header(AUTH_HEADER, compute_hmac(secret, &body));
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProtocolError::Unauthorized);
        }
        Ok(response)
    }
}

#[async_trait]
impl Facilitator for HttpFacilitator {
    async fn verify(
        &self,
        evidence: &PaymentEvidence,
        requirement: &PaymentRequirement,
    ) -> Result<VerifyResponse, ProtocolError> {
        let body = serde_json::to_vec(&serde_json::json!({
            "evidence": evidence,
            "requirement": requirement,
        }))?;

        let response = self.post("verify", body).await?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProtocolError::Transport(format!("failed to read response: {e}")))?;

        // Facilitators answer rejections either as 200 + isValid=false or as
        // a 4xx carrying the same body; both are decisions, not faults.
        match serde_json::from_str::<VerifyResponse>(&text) {
            Ok(verdict) => Ok(verdict),
            Err(e) => {
                tracing::warn!(status = %status, "facilitator /verify returned an unparseable body");
                Err(ProtocolError::InvalidResponse(format!(
                    "status {status}: {e}"
                )))
            }
        }
    }

    async fn pay_and_fetch(
        &self,
        authorization: &SignedAuthorization,
        request: &FetchRequest,
    ) -> Result<FetchedResponse, ProtocolError> {
        let wire_request = WireFetchRequest {
            method: &request.method,
            url: &request.url,
            headers: &request.headers,
            body: if request.body.is_empty() {
                String::new()
            } else {
                base64::engine::general_purpose::STANDARD.encode(&request.body)
            },
        };
        let body = serde_json::to_vec(&serde_json::json!({
            "authorization": authorization.authorization,
            "signature": authorization.signature,
            "request": wire_request,
        }))?;

        let mut response = self.post("pay-and-fetch", body).await?;
        let status = response.status().as_u16();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        let content_type = header("content-type");
        let receipt = header(RECEIPT_HEADER);

        if let Some(cl) = response.content_length() {
            if cl > MAX_FETCHED_BODY_SIZE as u64 {
                return Err(ProtocolError::InvalidResponse(format!(
                    "response too large: {cl} bytes"
                )));
            }
        }
        let mut buf = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ProtocolError::Transport(format!("failed to read response: {e}")))?
        {
            if buf.len() + chunk.len() > MAX_FETCHED_BODY_SIZE {
                return Err(ProtocolError::InvalidResponse(format!(
                    "response too large (max {MAX_FETCHED_BODY_SIZE} bytes)"
                )));
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(FetchedResponse {
            status,
            content_type,
            receipt,
            body: Bytes::from(buf),
        })
    }
}

/// HMAC-SHA256 over `body`, hex-encoded.
pub fn compute_hmac(secret: &[u8], body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    alloy::hex::encode(mac.finalize().into_bytes())
}

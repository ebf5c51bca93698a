//! Payment gate: nothing reaches an origin until a payment covering the
//! quoted price has been confirmed by the facilitator.
//!
//! Two ways in. Callers holding their own wallet resubmit with evidence of a
//! transfer (`X-PAYMENT` header or `paymentToken` query), which the
//! facilitator verifies. Callers handing over a payer secret get an
//! authorization signed on their behalf and the facilitator pays and fetches
//! in one step. A secret always wins over evidence.

use std::sync::Arc;
use std::time::Duration;

use actix_web::http::header;
use actix_web::HttpRequest;
use tollgate_protocol::{
    Facilitator, FetchRequest, FetchedResponse, PayerAccount, PaymentEvidence, PaymentProof,
    PaymentRequirement, ProtocolError, EVIDENCE_HEADER,
};

use crate::config::GatewayConfig;
use crate::error::{Challenge, GatewayError};
use crate::metrics::{PAYMENTS_REJECTED, PAYMENTS_VERIFIED, PROGRAMMATIC_PAYMENTS};
use crate::resolver::EndpointConfig;

pub const SECRET_HEADER: &str = "X-Payer-Secret";
pub const SECRET_QUERY_PARAM: &str = "payerSecret";
pub const EVIDENCE_QUERY_PARAM: &str = "paymentToken";

/// What the caller brought to pay with.
#[derive(PartialEq, Eq)]
pub enum PaymentInput {
    Secret(String),
    Evidence(String),
    None,
}

impl std::fmt::Debug for PaymentInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentInput::Secret(_) => f.write_str("Secret([REDACTED])"),
            PaymentInput::Evidence(token) => f.debug_tuple("Evidence").field(token).finish(),
            PaymentInput::None => f.write_str("None"),
        }
    }
}

/// Header first, then query parameter; blank values count as absent.
pub fn payment_input(req: &HttpRequest) -> PaymentInput {
    if let Some(secret) =
        header_value(req, SECRET_HEADER).or_else(|| query_value(req, SECRET_QUERY_PARAM))
    {
        return PaymentInput::Secret(secret);
    }
    if let Some(token) =
        header_value(req, EVIDENCE_HEADER).or_else(|| query_value(req, EVIDENCE_QUERY_PARAM))
    {
        return PaymentInput::Evidence(token);
    }
    PaymentInput::None
}

/// Browsers get the wallet paywall page instead of a JSON 402.
pub fn wants_html(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.to_ascii_lowercase().contains("text/html"))
}

fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn query_value(req: &HttpRequest, name: &str) -> Option<String> {
    url::form_urlencoded::parse(req.query_string().as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Quote for one call to `endpoint`.
pub fn challenge(
    config: &GatewayConfig,
    endpoint: &EndpointConfig,
    resource: &str,
    interactive: bool,
) -> Challenge {
    let requirement = PaymentRequirement::new(
        config.network,
        endpoint.price_micro_units,
        endpoint.developer_address,
        resource,
    )
    .with_description(format!(
        "{} / {}",
        endpoint.api_display_name, endpoint.endpoint_display_name
    ));
    Challenge {
        requirement,
        network: config.network,
        interactive,
        api_name: endpoint.api_display_name.clone(),
        endpoint_name: endpoint.endpoint_display_name.clone(),
    }
}

pub(crate) fn reject(stage: &str, reason: impl Into<String>, challenge: &Challenge) -> GatewayError {
    let reason = reason.into();
    PAYMENTS_REJECTED.with_label_values(&[stage]).inc();
    tracing::info!(stage, reason = %reason, "payment rejected");
    GatewayError::PaymentRejected {
        reason,
        challenge: Box::new(Challenge {
            interactive: false,
            ..challenge.clone()
        }),
    }
}

/// Decode and check the evidence, then ask the facilitator. The facilitator
/// call runs on its own task so a dropped request does not cut it short.
pub async fn verify_evidence(
    facilitator: Arc<dyn Facilitator>,
    token: &str,
    challenge: &Challenge,
    require_transaction_ref: bool,
    timeout: Duration,
) -> Result<PaymentProof, GatewayError> {
    let evidence = PaymentEvidence::decode(token)
        .map_err(|e| reject("decode", e.to_string(), challenge))?;
    let requirement = &challenge.requirement;
    requirement
        .check_evidence(&evidence)
        .map_err(|e| reject("mismatch", e.to_string(), challenge))?;

    let task = {
        let evidence = evidence.clone();
        let requirement = requirement.clone();
        tokio::spawn(async move {
            tokio::time::timeout(timeout, facilitator.verify(&evidence, &requirement)).await
        })
    };

    let verified = match task.await {
        Ok(Ok(Ok(resp))) => resp,
        Ok(Ok(Err(e))) => {
            return Err(GatewayError::Internal(format!("payment verification failed: {e}")));
        }
        Ok(Err(_)) => return Err(reject("timeout", "payment verification timed out", challenge)),
        Err(e) => {
            return Err(GatewayError::Internal(format!("verification task failed: {e}")));
        }
    };

    if !verified.is_valid {
        let reason = verified
            .invalid_reason
            .unwrap_or_else(|| "payment is not valid".to_string());
        return Err(reject("facilitator", reason, challenge));
    }
    if verified.network != requirement.network {
        return Err(reject(
            "facilitator",
            format!("payment settled on '{}', expected '{}'", verified.network, requirement.network),
            challenge,
        ));
    }
    // The payer must come from the facilitator, never from the token alone
    let payer = match verified.payer {
        Some(payer) if payer == evidence.payer => payer,
        Some(payer) => {
            return Err(reject(
                "facilitator",
                format!("payment made by {payer:#x}, not the claimed payer"),
                challenge,
            ));
        }
        None => {
            return Err(reject(
                "facilitator",
                "facilitator did not confirm the payer",
                challenge,
            ));
        }
    };
    let transaction = verified.transaction.filter(|t| !t.trim().is_empty());
    if transaction.is_none() && require_transaction_ref {
        return Err(reject(
            "no_transaction",
            "facilitator did not confirm a transaction",
            challenge,
        ));
    }

    PAYMENTS_VERIFIED.inc();
    let proof = PaymentProof {
        payer,
        transaction,
        network: verified.network,
        amount_micro_units: requirement.amount_micro_units,
    };
    tracing::info!(
        payer = %proof.payer,
        transaction = proof.transaction.as_deref().unwrap_or("-"),
        amount = requirement.amount_micro_units,
        "payment verified"
    );
    Ok(proof)
}

/// Sign an authorization with the caller's secret and let the facilitator
/// pay and fetch. A non-success facilitator answer is passed through as-is.
pub async fn pay_and_fetch(
    facilitator: Arc<dyn Facilitator>,
    secret: &str,
    challenge: &Challenge,
    request: FetchRequest,
    timeout: Duration,
) -> Result<FetchedResponse, GatewayError> {
    let account = PayerAccount::from_secret(secret)
        .map_err(|_| reject("secret", "invalid payer secret", challenge))?;

    let requirement = &challenge.requirement;
    let signed = account
        .authorize(requirement, requirement.max_timeout_seconds as i64)
        .await
        .map_err(|e| GatewayError::Internal(format!("failed to sign authorization: {e}")))?;
    tracing::debug!(payer = %account.address(), "signed programmatic payment authorization");

    let task = tokio::spawn(async move {
        tokio::time::timeout(timeout, facilitator.pay_and_fetch(&signed, &request)).await
    });

    match task.await {
        Ok(Ok(Ok(resp))) if resp.is_success() => {
            PROGRAMMATIC_PAYMENTS.with_label_values(&["success"]).inc();
            Ok(resp)
        }
        Ok(Ok(Ok(resp))) => {
            PROGRAMMATIC_PAYMENTS.with_label_values(&["refused"]).inc();
            tracing::info!(status = resp.status, "facilitator refused pay-and-fetch");
            Err(GatewayError::Facilitator {
                status: resp.status,
                content_type: resp.content_type,
                body: resp.body,
            })
        }
        Ok(Ok(Err(e))) => {
            PROGRAMMATIC_PAYMENTS.with_label_values(&["error"]).inc();
            Err(GatewayError::Internal(match e {
                ProtocolError::Unauthorized => "facilitator rejected gateway credentials".to_string(),
                other => format!("pay-and-fetch failed: {other}"),
            }))
        }
        Ok(Err(_)) => {
            PROGRAMMATIC_PAYMENTS.with_label_values(&["timeout"]).inc();
            Err(GatewayError::Internal("pay-and-fetch timed out".to_string()))
        }
        Err(e) => Err(GatewayError::Internal(format!("pay-and-fetch task failed: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;
    use alloy::primitives::{address, Address};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tollgate_protocol::{SettlementNetwork, SignedAuthorization, VerifyResponse};

    const PAYER: Address = address!("0x00000000000000000000000000000000000000bb");

    struct StubFacilitator {
        verify: VerifyResponse,
        fetched: FetchedResponse,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl StubFacilitator {
        fn valid(transaction: Option<&str>) -> Self {
            Self {
                verify: VerifyResponse {
                    is_valid: true,
                    invalid_reason: None,
                    payer: Some(PAYER),
                    transaction: transaction.map(str::to_string),
                    network: "base-sepolia".into(),
                },
                fetched: FetchedResponse {
                    status: 200,
                    content_type: Some("application/json".into()),
                    receipt: None,
                    body: Bytes::from_static(b"{\"ok\":true}"),
                },
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Facilitator for StubFacilitator {
        async fn verify(
            &self,
            _evidence: &PaymentEvidence,
            _requirement: &PaymentRequirement,
        ) -> Result<VerifyResponse, ProtocolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.verify.clone())
        }

        async fn pay_and_fetch(
            &self,
            _authorization: &SignedAuthorization,
            _request: &FetchRequest,
        ) -> Result<FetchedResponse, ProtocolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.fetched.clone())
        }
    }

    fn test_challenge() -> Challenge {
        Challenge {
            requirement: PaymentRequirement::new(
                SettlementNetwork::BaseSepolia,
                1_500_000,
                address!("0x00000000000000000000000000000000000000aa"),
                "https://gw.example.com/alice/weather/today",
            ),
            network: SettlementNetwork::BaseSepolia,
            interactive: false,
            api_name: "Weather".into(),
            endpoint_name: "Today".into(),
        }
    }

    fn token(amount: &str, network: &str) -> String {
        PaymentEvidence {
            transaction: "0xabc".into(),
            payer: PAYER,
            amount: amount.into(),
            network: network.into(),
        }
        .encode()
        .unwrap()
    }

    fn fetch_request() -> FetchRequest {
        FetchRequest {
            method: "GET".into(),
            url: "https://origin.example.com/weather".into(),
            headers: vec![],
            body: Bytes::new(),
        }
    }

    #[test]
    fn test_secret_wins_over_evidence() {
        let req = TestRequest::get()
            .uri("/alice/weather/today?paymentToken=tok")
            .insert_header((SECRET_HEADER, "0xkey"))
            .to_http_request();
        assert_eq!(payment_input(&req), PaymentInput::Secret("0xkey".into()));
    }

    #[test]
    fn test_evidence_header_before_query() {
        let req = TestRequest::get()
            .uri("/alice/weather/today?paymentToken=from-query")
            .insert_header((EVIDENCE_HEADER, "from-header"))
            .to_http_request();
        assert_eq!(payment_input(&req), PaymentInput::Evidence("from-header".into()));

        let req = TestRequest::get()
            .uri("/alice/weather/today?paymentToken=from%2Bquery")
            .to_http_request();
        assert_eq!(payment_input(&req), PaymentInput::Evidence("from+query".into()));
    }

    #[test]
    fn test_blank_values_are_absent() {
        let req = TestRequest::get()
            .uri("/alice/weather/today?payerSecret=&paymentToken=")
            .insert_header((SECRET_HEADER, "  "))
            .to_http_request();
        assert_eq!(payment_input(&req), PaymentInput::None);
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let input = PaymentInput::Secret("0xdeadbeef".into());
        assert!(!format!("{input:?}").contains("deadbeef"));
    }

    #[test]
    fn test_wants_html() {
        let browser = TestRequest::get()
            .insert_header((header::ACCEPT, "text/html,application/xhtml+xml,*/*;q=0.8"))
            .to_http_request();
        assert!(wants_html(&browser));
        let client = TestRequest::get()
            .insert_header((header::ACCEPT, "application/json"))
            .to_http_request();
        assert!(!wants_html(&client));
        assert!(!wants_html(&TestRequest::get().to_http_request()));
    }

    #[tokio::test]
    async fn test_verify_success() {
        let facilitator = Arc::new(StubFacilitator::valid(Some("0xabc")));
        let proof = verify_evidence(
            facilitator.clone(),
            &token("1.5", "base-sepolia"),
            &test_challenge(),
            false,
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(proof.payer, PAYER);
        assert_eq!(proof.transaction.as_deref(), Some("0xabc"));
        assert_eq!(proof.amount_micro_units, 1_500_000);
    }

    #[tokio::test]
    async fn test_garbage_token_never_reaches_facilitator() {
        let facilitator = Arc::new(StubFacilitator::valid(Some("0xabc")));
        let err = verify_evidence(
            facilitator.clone(),
            "%%%not-base64%%%",
            &test_challenge(),
            false,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::PaymentRejected { .. }));
        assert_eq!(facilitator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_underpayment_rejected_locally() {
        let facilitator = Arc::new(StubFacilitator::valid(Some("0xabc")));
        let err = verify_evidence(
            facilitator.clone(),
            &token("1.4", "base-sepolia"),
            &test_challenge(),
            false,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::PaymentRejected { .. }));
        assert_eq!(facilitator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_facilitator_invalid_rejects_with_reason() {
        let mut stub = StubFacilitator::valid(None);
        stub.verify.is_valid = false;
        stub.verify.invalid_reason = Some("transfer not found".into());
        let err = verify_evidence(
            Arc::new(stub),
            &token("1.5", "base-sepolia"),
            &test_challenge(),
            false,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        match err {
            GatewayError::PaymentRejected { reason, .. } => assert_eq!(reason, "transfer not found"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_slow_facilitator_times_out_as_rejection() {
        let mut stub = StubFacilitator::valid(Some("0xabc"));
        stub.delay = Duration::from_secs(60);
        let err = verify_evidence(
            Arc::new(stub),
            &token("1.5", "base-sepolia"),
            &test_challenge(),
            false,
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::PaymentRejected { .. }));
    }

    #[tokio::test]
    async fn test_payer_must_be_confirmed_by_facilitator() {
        let mut unnamed = StubFacilitator::valid(Some("0xabc"));
        unnamed.verify.payer = None;
        let err = verify_evidence(
            Arc::new(unnamed),
            &token("1.5", "base-sepolia"),
            &test_challenge(),
            false,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::PaymentRejected { .. }));

        let mut other = StubFacilitator::valid(Some("0xabc"));
        other.verify.payer = Some(address!("0x000000000000000000000000000000000000dead"));
        let err = verify_evidence(
            Arc::new(other),
            &token("1.5", "base-sepolia"),
            &test_challenge(),
            false,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::PaymentRejected { .. }));
    }

    #[tokio::test]
    async fn test_missing_transaction_policy() {
        let lenient = verify_evidence(
            Arc::new(StubFacilitator::valid(None)),
            &token("1.5", "base-sepolia"),
            &test_challenge(),
            false,
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(lenient.transaction, None);

        let strict = verify_evidence(
            Arc::new(StubFacilitator::valid(None)),
            &token("1.5", "base-sepolia"),
            &test_challenge(),
            true,
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(strict, Err(GatewayError::PaymentRejected { .. })));
    }

    #[tokio::test]
    async fn test_invalid_secret_is_rejected_without_echo() {
        let facilitator = Arc::new(StubFacilitator::valid(None));
        let err = pay_and_fetch(
            facilitator.clone(),
            "not-a-key-supersecret",
            &test_challenge(),
            fetch_request(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(!format!("{err:?}").contains("supersecret"));
        assert!(matches!(err, GatewayError::PaymentRejected { .. }));
        assert_eq!(facilitator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pay_and_fetch_relays_success_and_failure() {
        let key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        let ok = pay_and_fetch(
            Arc::new(StubFacilitator::valid(None)),
            key,
            &test_challenge(),
            fetch_request(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(ok.status, 200);

        let mut refused = StubFacilitator::valid(None);
        refused.fetched.status = 402;
        refused.fetched.body = Bytes::from_static(b"insufficient balance");
        let err = pay_and_fetch(
            Arc::new(refused),
            key,
            &test_challenge(),
            fetch_request(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        match err {
            GatewayError::Facilitator { status, body, .. } => {
                assert_eq!(status, 402);
                assert_eq!(&body[..], b"insufficient balance");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

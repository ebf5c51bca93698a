//! One gateway call, start to finish:
//! resolve → materialize → gate → forward → log.

use std::time::Instant;

use actix_web::http::header::{self, HeaderValue};
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use bytes::Bytes;
use tollgate_protocol::{FetchRequest, FetchedResponse, PaymentProof, Receipt, RECEIPT_HEADER};

use crate::error::{Challenge, GatewayError};
use crate::gate::{self, PaymentInput};
use crate::ledger::{Admission, CallRecord};
use crate::materializer;
use crate::proxy;
use crate::resolver::{self, EndpointConfig};
use crate::state::AppState;
use crate::validation::{self, RouteKey};

pub async fn run(
    state: &AppState,
    req: &HttpRequest,
    body: Bytes,
    key: RouteKey,
) -> Result<HttpResponse, GatewayError> {
    let config = &state.config;
    let timeouts = config.timeouts;

    let endpoint = resolver::resolve(state.registry.as_ref(), &key, timeouts.resolve).await?;
    let endpoint = materializer::materialize(
        state.registry.as_ref(),
        &config.public_base_domain,
        &key,
        endpoint,
        timeouts.materialize,
    )
    .await;

    let resource = endpoint
        .monetized_url
        .clone()
        .unwrap_or_else(|| materializer::monetized_url(&config.public_base_domain, &key));

    match gate::payment_input(req) {
        PaymentInput::None => {
            let interactive = gate::wants_html(req);
            Err(GatewayError::PaymentRequired(Box::new(gate::challenge(
                config,
                &endpoint,
                &resource,
                interactive,
            ))))
        }
        PaymentInput::Evidence(token) => {
            let challenge = gate::challenge(config, &endpoint, &resource, false);
            let proof = gate::verify_evidence(
                state.facilitator.clone(),
                &token,
                &challenge,
                config.require_transaction_ref,
                timeouts.verify,
            )
            .await?;
            forward_verified(state, req, body, &endpoint, &challenge, proof).await
        }
        PaymentInput::Secret(secret) => {
            let challenge = gate::challenge(config, &endpoint, &resource, false);
            // Nobody gets charged for an origin the gateway would not forward to
            let target =
                validation::parse_origin_url(&endpoint.origin_url, config.allow_private_origins)?;
            if !config.allow_private_origins {
                validation::check_resolved_origin(&target).await?;
            }
            let fetch = FetchRequest {
                method: req.method().as_str().to_string(),
                url: endpoint.origin_url.clone(),
                headers: proxy::forwardable_headers(req.headers()),
                body,
            };
            let started = Instant::now();
            let fetched = gate::pay_and_fetch(
                state.facilitator.clone(),
                &secret,
                &challenge,
                fetch,
                timeouts.pay_and_fetch,
            )
            .await?;
            record_programmatic(state, &endpoint, &fetched, started);
            Ok(relay_fetched(fetched))
        }
    }
}

/// Admit, forward, and complete a call whose payment is verified. A
/// transaction that already paid for an earlier call is refused here.
async fn forward_verified(
    state: &AppState,
    req: &HttpRequest,
    body: Bytes,
    endpoint: &EndpointConfig,
    challenge: &Challenge,
    proof: PaymentProof,
) -> Result<HttpResponse, GatewayError> {
    let admission = state
        .ledger
        .admit(
            CallRecord::admitted(endpoint.id, &proof),
            state.config.timeouts.ledger_claim,
        )
        .await;
    if admission == Admission::AlreadyUsed {
        return Err(gate::reject("replay", "transaction already used", challenge));
    }

    let started = Instant::now();
    let result = proxy::forward(
        &state.http_client,
        req,
        body,
        endpoint,
        &proof,
        state.config.allow_private_origins,
        state.config.timeouts.upstream,
    )
    .await;

    match result {
        Ok(forwarded) => {
            state.ledger.record_completion(
                proof.transaction.as_deref(),
                forwarded.status,
                forwarded.latency,
            );
            Ok(forwarded.response)
        }
        Err(e) => {
            state.ledger.record_completion(
                proof.transaction.as_deref(),
                e.status_code().as_u16(),
                started.elapsed(),
            );
            Err(e)
        }
    }
}

/// Ledger a pay-and-fetch call when the facilitator handed back a receipt
/// naming a transaction.
fn record_programmatic(
    state: &AppState,
    endpoint: &EndpointConfig,
    fetched: &FetchedResponse,
    started: Instant,
) {
    let Some(receipt) = fetched.receipt.as_deref() else {
        tracing::debug!(endpoint_id = endpoint.id, "pay-and-fetch returned no receipt");
        return;
    };
    let receipt = match Receipt::decode(receipt) {
        Ok(receipt) => receipt,
        Err(e) => {
            tracing::warn!(endpoint_id = endpoint.id, error = %e, "undecodable pay-and-fetch receipt");
            return;
        }
    };
    if receipt.transaction.is_none() {
        return;
    }

    let proof = PaymentProof {
        payer: receipt.payer,
        transaction: receipt.transaction,
        network: receipt.network,
        amount_micro_units: endpoint.price_micro_units,
    };
    state
        .ledger
        .record_admission(CallRecord::admitted(endpoint.id, &proof));
    state.ledger.record_completion(
        proof.transaction.as_deref(),
        fetched.status,
        started.elapsed(),
    );
}

fn relay_fetched(fetched: FetchedResponse) -> HttpResponse {
    let status = actix_web::http::StatusCode::from_u16(fetched.status)
        .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY);
    let mut builder = HttpResponse::build(status);
    if let Some(ct) = fetched
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        builder.insert_header((header::CONTENT_TYPE, ct));
    }
    if let Some(receipt) = fetched
        .receipt
        .as_deref()
        .and_then(|r| HeaderValue::from_str(r).ok())
    {
        builder.insert_header((RECEIPT_HEADER, receipt));
    }
    builder.body(fetched.body)
}

use actix_web::http::header::{self, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use bytes::Bytes;
use tollgate_protocol::{PaymentRequiredBody, PaymentRequirement, SettlementNetwork};

use crate::paywall;
use crate::registry::RegistryError;

/// Everything needed to ask a caller for payment.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub requirement: PaymentRequirement,
    pub network: SettlementNetwork,
    /// Caller prefers HTML; answer with the wallet paywall page
    pub interactive: bool,
    pub api_name: String,
    pub endpoint_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("endpoint not found: {0}")]
    NotFound(String),

    #[error("payment required")]
    PaymentRequired(Box<Challenge>),

    #[error("payment rejected: {reason}")]
    PaymentRejected {
        reason: String,
        challenge: Box<Challenge>,
    },

    #[error("origin failed: {0}")]
    BadOrigin(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Non-success answer from pay-and-fetch, relayed as-is.
    #[error("facilitator returned {status}")]
    Facilitator {
        status: u16,
        content_type: Option<String>,
        body: Bytes,
    },

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::PaymentRequired(_) | GatewayError::PaymentRejected { .. } => {
                StatusCode::PAYMENT_REQUIRED
            }
            GatewayError::BadOrigin(_) => StatusCode::BAD_GATEWAY,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Facilitator { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::Registry(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            GatewayError::NotFound(route) => HttpResponse::NotFound().json(serde_json::json!({
                "error": "endpoint_not_found",
                "message": format!("No active endpoint at '{}'", route)
            })),
            GatewayError::PaymentRequired(challenge) if challenge.interactive => {
                HttpResponse::PaymentRequired()
                    .content_type("text/html; charset=utf-8")
                    .body(paywall::render(challenge))
            }
            GatewayError::PaymentRequired(challenge) => HttpResponse::PaymentRequired().json(
                PaymentRequiredBody::required(challenge.requirement.clone()),
            ),
            GatewayError::PaymentRejected { reason, challenge } => {
                HttpResponse::PaymentRequired().json(PaymentRequiredBody::rejected(
                    challenge.requirement.clone(),
                    reason.clone(),
                ))
            }
            GatewayError::BadOrigin(detail) => {
                tracing::error!(detail = %detail, "origin request failed");
                HttpResponse::BadGateway().json(serde_json::json!({
                    "error": "bad_origin",
                    "message": "Failed to reach the endpoint's origin server"
                }))
            }
            GatewayError::InvalidRequest(msg) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "invalid_request",
                    "message": msg
                }))
            }
            GatewayError::Facilitator {
                content_type, body, ..
            } => {
                let mut response = HttpResponse::build(self.status_code());
                if let Some(ct) = content_type
                    .as_deref()
                    .and_then(|ct| HeaderValue::from_str(ct).ok())
                {
                    response.insert_header((header::CONTENT_TYPE, ct));
                }
                response.body(body.clone())
            }
            GatewayError::Registry(e) => {
                tracing::error!(error = %e, "registry failure");
                internal_error()
            }
            GatewayError::Internal(msg) => {
                tracing::error!(detail = %msg, "internal error");
                internal_error()
            }
        }
    }
}

fn internal_error() -> HttpResponse {
    HttpResponse::InternalServerError().json(serde_json::json!({
        "error": "internal_error",
        "message": "An internal error occurred"
    }))
}

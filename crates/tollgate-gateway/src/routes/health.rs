use actix_web::{web, HttpRequest, HttpResponse};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::RegistryBackend;
use crate::metrics::REGISTRY;
use crate::state::AppState;

/// GET /health
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let registry = match state.config.registry {
        RegistryBackend::Sqlite { .. } => "sqlite",
        RegistryBackend::Rest { .. } => "rest",
    };
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "tollgate-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "network": state.config.network.id(),
        "registry": registry,
    }))
}

/// Compares SHA-256 digests so neither content nor length leaks through timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let (ha, hb) = (Sha256::digest(a), Sha256::digest(b));
    ha.as_slice().ct_eq(hb.as_slice()).into()
}

/// GET /metrics - Prometheus text format, bearer-gated when METRICS_TOKEN is set
pub async fn metrics(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Some(ref expected_token) = state.config.metrics_token {
        let authorized = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| constant_time_eq(token.as_bytes(), expected_token.as_bytes()));

        if !authorized {
            return HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "unauthorized",
                "message": "Valid Bearer token required for /metrics"
            }));
        }
    }

    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return HttpResponse::InternalServerError().body("Failed to encode metrics");
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics));
}

use actix_web::{web, HttpRequest, HttpResponse};

use crate::error::GatewayError;
use crate::metrics::CALLS_TOTAL;
use crate::pipeline;
use crate::state::AppState;
use crate::validation::RouteKey;

fn outcome(result: &Result<HttpResponse, GatewayError>) -> &'static str {
    match result {
        Ok(_) => "served",
        Err(GatewayError::NotFound(_)) => "not_found",
        Err(GatewayError::PaymentRequired(_)) => "payment_required",
        Err(GatewayError::PaymentRejected { .. }) => "payment_rejected",
        Err(GatewayError::BadOrigin(_)) => "bad_origin",
        Err(GatewayError::InvalidRequest(_)) => "invalid_request",
        Err(GatewayError::Facilitator { .. }) => "facilitator_refused",
        Err(GatewayError::Registry(_) | GatewayError::Internal(_)) => "internal_error",
    }
}

/// ANY /{owner}/{api}/{path:.*}
pub async fn gateway_call(
    req: HttpRequest,
    path: web::Path<(String, String, String)>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let (owner, api, endpoint_path) = path.into_inner();
    let key = RouteKey::new(&owner, &api, &endpoint_path)?;

    let result = pipeline::run(&state, &req, body, key).await;
    CALLS_TOTAL.with_label_values(&[outcome(&result)]).inc();
    result
}

/// Catch-all; register after every other route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/{owner}/{api}/{path:.*}").route(web::route().to(gateway_call)),
    );
}

use std::time::{Duration, Instant};

use actix_web::http::header::HeaderMap;
use actix_web::{HttpRequest, HttpResponse};
use bytes::Bytes;
use tollgate_protocol::{PaymentProof, Receipt, RECEIPT_HEADER};

use crate::error::GatewayError;
use crate::metrics::{status_class, PROXY_LATENCY, UPSTREAM_RESPONSES};
use crate::resolver::EndpointConfig;
use crate::validation::{check_resolved_origin, parse_origin_url};

/// Headers never passed on to an origin
const HEADERS_TO_STRIP: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authorization",
    "content-length", // Will be recalculated
    "x-payment",
    "x-payer-secret",
];

/// Prefix of the payment headers the gateway sets itself; inbound copies
/// are dropped so callers cannot spoof them.
const GATEWAY_HEADER_PREFIX: &str = "x-tollgate-";

/// Allowlist of response headers relayed from the origin.
const ALLOWED_RESPONSE_HEADERS: &[&str] = &[
    "content-type",
    "content-encoding",
    "content-language",
    "content-disposition",
    "cache-control",
    "etag",
    "expires",
    "last-modified",
    "date",
    "vary",
    "x-request-id",
    "x-ratelimit-limit",
    "x-ratelimit-remaining",
    "x-ratelimit-reset",
];

/// Maximum origin response body size (10 MB).
const MAX_RESPONSE_BODY_SIZE: usize = 10 * 1024 * 1024;

/// An origin answer, ready to send back.
pub struct Forwarded {
    pub status: u16,
    pub latency: Duration,
    pub response: HttpResponse,
}

fn should_forward(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    !HEADERS_TO_STRIP.contains(&name.as_str()) && !name.starts_with(GATEWAY_HEADER_PREFIX)
}

/// Inbound headers that may travel to the origin, as (name, value) pairs.
pub fn forwardable_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| should_forward(name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// Send the verified call to the endpoint's origin URL (exactly that URL,
/// the gateway path and query are not appended) and relay the answer with
/// the payment receipt attached.
pub async fn forward(
    client: &reqwest::Client,
    req: &HttpRequest,
    body: Bytes,
    endpoint: &EndpointConfig,
    proof: &PaymentProof,
    allow_private_origins: bool,
    timeout: Duration,
) -> Result<Forwarded, GatewayError> {
    let target = parse_origin_url(&endpoint.origin_url, allow_private_origins)?;
    if !allow_private_origins {
        check_resolved_origin(&target).await?;
    }

    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .map_err(|_| GatewayError::InvalidRequest("unsupported HTTP method".to_string()))?;

    let mut request_builder = client.request(method, target).timeout(timeout);
    for (name, value) in forwardable_headers(req.headers()) {
        request_builder = request_builder.header(name, value);
    }

    request_builder = request_builder
        .header("X-Tollgate-Payer", format!("{:#x}", proof.payer))
        .header("X-Tollgate-Network", &proof.network);
    if let Some(ref tx) = proof.transaction {
        request_builder = request_builder.header("X-Tollgate-Transaction", tx);
    }

    if !body.is_empty() {
        request_builder = request_builder.body(body);
    }

    let started = Instant::now();
    let mut response = request_builder.send().await.map_err(|e| {
        GatewayError::BadOrigin(format!("origin request to endpoint {} failed: {e}", endpoint.id))
    })?;

    let status = response.status();
    let headers = response.headers().clone();

    if let Some(cl) = response.content_length() {
        if cl > MAX_RESPONSE_BODY_SIZE as u64 {
            return Err(GatewayError::BadOrigin(format!(
                "origin response too large: {} bytes (max {})",
                cl, MAX_RESPONSE_BODY_SIZE
            )));
        }
    }

    // Enforce the cap while streaming; chunked bodies carry no length
    let mut body_buf = Vec::with_capacity(
        response
            .content_length()
            .map(|cl| cl as usize)
            .unwrap_or(8192)
            .min(MAX_RESPONSE_BODY_SIZE),
    );
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| GatewayError::BadOrigin(format!("failed to read origin response: {e}")))?
    {
        if body_buf.len() + chunk.len() > MAX_RESPONSE_BODY_SIZE {
            return Err(GatewayError::BadOrigin(format!(
                "origin response too large (max {} bytes)",
                MAX_RESPONSE_BODY_SIZE
            )));
        }
        body_buf.extend_from_slice(&chunk);
    }
    let latency = started.elapsed();

    PROXY_LATENCY.observe(latency.as_secs_f64());
    UPSTREAM_RESPONSES
        .with_label_values(&[status_class(status.as_u16())])
        .inc();

    let mut builder = HttpResponse::build(
        actix_web::http::StatusCode::from_u16(status.as_u16())
            .map_err(|_| GatewayError::BadOrigin(format!("origin sent status {status}")))?,
    );
    for (name, value) in headers.iter() {
        let name_lower = name.as_str().to_ascii_lowercase();
        if ALLOWED_RESPONSE_HEADERS.contains(&name_lower.as_str()) {
            if let Ok(value_str) = value.to_str() {
                builder.append_header((name.as_str(), value_str));
            }
        }
    }
    builder.insert_header((RECEIPT_HEADER, Receipt::from(proof).encode()));

    tracing::debug!(
        endpoint_id = endpoint.id,
        status = status.as_u16(),
        latency_ms = latency.as_millis() as u64,
        "origin responded"
    );

    Ok(Forwarded {
        status: status.as_u16(),
        latency,
        response: builder.body(Bytes::from(body_buf)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_headers_to_strip() {
        assert!(HEADERS_TO_STRIP.contains(&"host"));
        assert!(HEADERS_TO_STRIP.contains(&"x-payment"));
        assert!(HEADERS_TO_STRIP.contains(&"x-payer-secret"));
        assert!(!HEADERS_TO_STRIP.contains(&"content-type"));
    }

    #[test]
    fn test_allowed_response_headers() {
        assert!(ALLOWED_RESPONSE_HEADERS.contains(&"content-type"));
        assert!(ALLOWED_RESPONSE_HEADERS.contains(&"cache-control"));
        assert!(!ALLOWED_RESPONSE_HEADERS.contains(&"server"));
        assert!(!ALLOWED_RESPONSE_HEADERS.contains(&"set-cookie"));
        assert!(!ALLOWED_RESPONSE_HEADERS.contains(&"access-control-allow-origin"));
    }

    #[test]
    fn test_forwardable_headers_filtering() {
        let req = TestRequest::get()
            .insert_header(("Host", "gw.example.com"))
            .insert_header(("Authorization", "Bearer origin-token"))
            .insert_header(("Content-Type", "application/json"))
            .insert_header(("X-Payment", "evidence"))
            .insert_header(("X-Payer-Secret", "0xsecret"))
            .insert_header(("X-Tollgate-Payer", "0xspoofed"))
            .insert_header(("Connection", "keep-alive"))
            .to_http_request();
        let headers = forwardable_headers(req.headers());
        let names: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"authorization"));
        assert!(names.contains(&"content-type"));
        assert!(!names.contains(&"host"));
        assert!(!names.contains(&"x-payment"));
        assert!(!names.contains(&"x-payer-secret"));
        assert!(!names.contains(&"x-tollgate-payer"));
        assert!(!names.contains(&"connection"));
    }
}

//! Tracing setup and access-log redaction.

use actix_web::dev::ServiceRequest;
use actix_web::middleware::Logger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::gate::{EVIDENCE_QUERY_PARAM, SECRET_QUERY_PARAM};

/// Query parameters whose values never reach a log line.
const REDACTED_PARAMS: &[&str] = &[SECRET_QUERY_PARAM, EVIDENCE_QUERY_PARAM];

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Replace the values of payment query parameters with `[REDACTED]`.
/// Everything else in the query is kept as sent.
pub fn redact_query(query: &str) -> String {
    query
        .split('&')
        .map(|pair| {
            let name = pair.split_once('=').map_or(pair, |(name, _)| name);
            let decoded = urlencoding::decode(name).unwrap_or(std::borrow::Cow::Borrowed(name));
            if REDACTED_PARAMS.contains(&decoded.as_ref()) {
                format!("{name}=[REDACTED]")
            } else {
                pair.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// `METHOD /path?query HTTP/x` with payment parameters redacted.
fn redacted_request_line(req: &ServiceRequest) -> String {
    let query = req.query_string();
    let target = if query.is_empty() {
        req.path().to_string()
    } else {
        format!("{}?{}", req.path(), redact_query(query))
    };
    format!("{} {} {:?}", req.method(), target, req.version())
}

/// Access log in the default format, minus payment secrets and tokens.
pub fn access_logger() -> Logger {
    Logger::new(r#"%a "%{request_line}xi" %s %b "%{Referer}i" "%{User-Agent}i" %T"#)
        .custom_request_replace("request_line", redacted_request_line)
}

//! First-resolution write of an endpoint's public monetized URL.

use std::time::Duration;

use crate::metrics::MONETIZED_URLS;
use crate::registry::Registry;
use crate::resolver::EndpointConfig;
use crate::validation::RouteKey;

/// Canonical public URL for a route. Deterministic, so racing writers
/// always store the same bytes.
pub fn monetized_url(base_domain: &str, key: &RouteKey) -> String {
    format!(
        "{}/{}/{}/{}",
        base_domain.trim_end_matches('/'),
        key.owner,
        key.api_slug,
        key.path
    )
}

/// Fill in `monetized_url` if the endpoint has none yet. Never fails the
/// call: on error or timeout the config comes back unchanged and the next
/// call tries again.
pub async fn materialize(
    registry: &dyn Registry,
    base_domain: &str,
    key: &RouteKey,
    endpoint: EndpointConfig,
    timeout: Duration,
) -> EndpointConfig {
    if endpoint.monetized_url.is_some() {
        return endpoint;
    }

    let url = monetized_url(base_domain, key);
    let write = registry.set_monetized_url(endpoint.id, &url);
    match tokio::time::timeout(timeout, write).await {
        Ok(Ok(())) => {
            MONETIZED_URLS.with_label_values(&["written"]).inc();
            tracing::info!(endpoint_id = endpoint.id, url = %url, "monetized URL materialized");
            EndpointConfig {
                monetized_url: Some(url),
                ..endpoint
            }
        }
        Ok(Err(e)) => {
            MONETIZED_URLS.with_label_values(&["failed"]).inc();
            tracing::warn!(endpoint_id = endpoint.id, error = %e, "failed to store monetized URL");
            endpoint
        }
        Err(_) => {
            MONETIZED_URLS.with_label_values(&["timeout"]).inc();
            tracing::warn!(
                endpoint_id = endpoint.id,
                timeout_ms = timeout.as_millis() as u64,
                "timed out storing monetized URL"
            );
            endpoint
        }
    }
}

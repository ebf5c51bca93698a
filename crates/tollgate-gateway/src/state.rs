use std::sync::Arc;

use tollgate_protocol::Facilitator;

use crate::config::GatewayConfig;
use crate::ledger::Ledger;
use crate::registry::Registry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub registry: Arc<dyn Registry>,
    pub facilitator: Arc<dyn Facilitator>,
    pub ledger: Ledger,
    /// Client for origin calls. Redirects are never followed.
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        registry: Arc<dyn Registry>,
        facilitator: Arc<dyn Facilitator>,
        ledger: Ledger,
    ) -> Result<Self, reqwest::Error> {
        let http_client = build_http_client(config.timeouts.upstream)?;
        Ok(Self {
            config: Arc::new(config),
            registry,
            facilitator,
            ledger,
            http_client,
        })
    }
}

/// Outbound client shared by origin, facilitator and registry calls.
pub fn build_http_client(timeout: std::time::Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

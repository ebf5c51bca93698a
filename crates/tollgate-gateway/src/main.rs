use std::sync::Arc;

use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{web, App, HttpServer};

use tollgate_gateway::{
    config::{GatewayConfig, RegistryBackend},
    cors::build_cors,
    ledger::{Ledger, LedgerStore},
    logging,
    metrics::register_metrics,
    registry::{Registry, RestRegistry, SqliteRegistry},
    routes,
    state::{build_http_client, AppState},
};
use tollgate_protocol::{Facilitator, HttpFacilitator};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    let config = GatewayConfig::from_env().map_err(|e| {
        tracing::error!(error = %e, "invalid configuration");
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
    })?;
    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();
    let rate_limit_rpm = config.rate_limit_rpm;

    tracing::info!("Starting tollgate-gateway on port {}", port);
    tracing::info!(
        network = %config.network,
        facilitator = %config.facilitator_url,
        base_domain = %config.public_base_domain,
        "gateway configured"
    );
    tracing::info!(
        "HMAC auth: {}",
        if config.hmac_secret.is_some() {
            "enabled"
        } else {
            "disabled (dev mode)"
        }
    );
    if config.allow_private_origins {
        tracing::warn!("ALLOW_PRIVATE_ORIGINS is set; origin SSRF checks are off");
    }

    let http_client =
        build_http_client(config.timeouts.pay_and_fetch).map_err(std::io::Error::other)?;

    let (registry, ledger_store): (Arc<dyn Registry>, Arc<dyn LedgerStore>) =
        match &config.registry {
            RegistryBackend::Sqlite { path } => {
                let db = Arc::new(SqliteRegistry::open(path).map_err(std::io::Error::other)?);
                tracing::info!("Registry database opened at: {}", path);
                let registry: Arc<dyn Registry> = db.clone();
                let store: Arc<dyn LedgerStore> = db;
                (registry, store)
            }
            RegistryBackend::Rest { url, api_key } => {
                let rest = Arc::new(RestRegistry::new(http_client.clone(), url, api_key));
                tracing::info!("Using REST registry at: {}", url);
                let registry: Arc<dyn Registry> = rest.clone();
                let store: Arc<dyn LedgerStore> = rest;
                (registry, store)
            }
        };

    let facilitator: Arc<dyn Facilitator> = Arc::new(HttpFacilitator::new(
        http_client,
        &config.facilitator_url,
        config.hmac_secret.clone(),
    ));

    register_metrics();

    let (ledger, ledger_worker) = Ledger::spawn(ledger_store, config.ledger_queue_capacity);

    let state = AppState::new(config, registry, facilitator, ledger.clone())
        .map_err(std::io::Error::other)?;
    let state_data = web::Data::new(state);

    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(rate_limit_rpm as u64)
        .finish()
        .ok_or_else(|| std::io::Error::other("invalid rate limiter configuration"))?;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state_data.clone())
            .app_data(web::PayloadConfig::new(10 * 1024 * 1024)) // 10MB body limit
            .wrap(logging::access_logger())
            .wrap(build_cors(&allowed_origins))
            .wrap(Governor::new(&governor_conf))
            .configure(routes::health::configure)
            .configure(routes::gateway::configure)
    })
    .bind(("0.0.0.0", port))?
    .run();

    let result = server.await;

    // Apply whatever the ledger still has queued before exiting
    ledger.flush().await;
    drop(ledger);
    ledger_worker.abort();
    tracing::info!("gateway stopped");
    result
}

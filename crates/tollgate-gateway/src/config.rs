use std::env;
use std::time::Duration;

use tollgate_protocol::SettlementNetwork;
use url::Url;

const DEFAULT_FACILITATOR_URL: &str = "https://x402.org/facilitator";
const DEFAULT_PORT: u16 = 4080;
const DEFAULT_DB_PATH: &str = "./tollgate.db";
const DEFAULT_RATE_LIMIT_RPM: u32 = 120;
const DEFAULT_LEDGER_QUEUE_CAPACITY: usize = 1024;

/// Where endpoint records and the call ledger live.
#[derive(Clone)]
pub enum RegistryBackend {
    /// Local SQLite file shared with the management service.
    Sqlite { path: String },
    /// PostgREST-style HTTP API (`/rest/v1/...`) with an API key.
    Rest { url: String, api_key: String },
}

impl std::fmt::Debug for RegistryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryBackend::Sqlite { path } => {
                f.debug_struct("Sqlite").field("path", path).finish()
            }
            RegistryBackend::Rest { url, .. } => f
                .debug_struct("Rest")
                .field("url", url)
                .field("api_key", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Upper bounds on every external call the gateway makes.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub resolve: Duration,
    pub materialize: Duration,
    pub verify: Duration,
    pub pay_and_fetch: Duration,
    pub upstream: Duration,
    /// Awaited transaction claim in the ledger before forwarding
    pub ledger_claim: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            resolve: Duration::from_secs(5),
            materialize: Duration::from_secs(3),
            verify: Duration::from_secs(10),
            pay_and_fetch: Duration::from_secs(30),
            upstream: Duration::from_secs(30),
            ledger_claim: Duration::from_secs(3),
        }
    }
}

/// Process-wide configuration, built once at startup and shared read-only.
#[derive(Clone)]
pub struct GatewayConfig {
    /// Network prices are quoted and settled on
    pub network: SettlementNetwork,
    /// Facilitator base URL for verification and pay-and-fetch
    pub facilitator_url: String,
    /// HMAC shared secret for facilitator requests (None = unsigned)
    pub hmac_secret: Option<Vec<u8>>,
    /// Base of every monetized URL, e.g. "https://gw.example.com"
    pub public_base_domain: String,
    pub registry: RegistryBackend,
    pub port: u16,
    /// CORS allowed origins
    pub allowed_origins: Vec<String>,
    /// Rate limit requests per minute
    pub rate_limit_rpm: u32,
    /// Bearer token required for /metrics endpoint (None = public)
    pub metrics_token: Option<String>,
    /// Let origins resolve to private/loopback addresses (local dev only)
    pub allow_private_origins: bool,
    /// Reject verifications that do not name a transaction
    pub require_transaction_ref: bool,
    pub timeouts: Timeouts,
    pub ledger_queue_capacity: usize,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("network", &self.network)
            .field("facilitator_url", &self.facilitator_url)
            .field(
                "hmac_secret",
                &self.hmac_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("public_base_domain", &self.public_base_domain)
            .field("registry", &self.registry)
            .field("port", &self.port)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("allow_private_origins", &self.allow_private_origins)
            .field("require_transaction_ref", &self.require_transaction_ref)
            .field("timeouts", &self.timeouts)
            .field("ledger_queue_capacity", &self.ledger_queue_capacity)
            .finish()
    }
}

impl GatewayConfig {
    /// Defaults for everything except the two values that have none.
    pub fn new(public_base_domain: &str, facilitator_url: &str) -> Self {
        Self {
            network: SettlementNetwork::BaseSepolia,
            facilitator_url: facilitator_url.trim_end_matches('/').to_string(),
            hmac_secret: None,
            public_base_domain: public_base_domain.trim_end_matches('/').to_string(),
            registry: RegistryBackend::Sqlite {
                path: DEFAULT_DB_PATH.to_string(),
            },
            port: DEFAULT_PORT,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
            rate_limit_rpm: DEFAULT_RATE_LIMIT_RPM,
            metrics_token: None,
            allow_private_origins: false,
            require_transaction_ref: false,
            timeouts: Timeouts::default(),
            ledger_queue_capacity: DEFAULT_LEDGER_QUEUE_CAPACITY,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        // Required: public base domain
        let public_base_domain = env::var("PUBLIC_BASE_DOMAIN")
            .map_err(|_| ConfigError::MissingRequired("PUBLIC_BASE_DOMAIN"))?;
        validate_url(&public_base_domain)?;

        let facilitator_url =
            env::var("FACILITATOR_URL").unwrap_or_else(|_| DEFAULT_FACILITATOR_URL.to_string());
        validate_url(&facilitator_url)?;

        let mut config = Self::new(&public_base_domain, &facilitator_url);

        if let Some(network) = non_empty("SETTLEMENT_NETWORK") {
            config.network = network
                .parse()
                .map_err(|_| ConfigError::InvalidNetwork(network))?;
        }

        config.hmac_secret = non_empty("FACILITATOR_SHARED_SECRET").map(|s| s.into_bytes());
        if let Some(ref secret) = config.hmac_secret {
            if secret.len() < 32 {
                tracing::warn!(
                    "FACILITATOR_SHARED_SECRET is short ({} bytes, 32+ recommended)",
                    secret.len()
                );
            }
        } else {
            tracing::warn!("FACILITATOR_SHARED_SECRET not set; facilitator requests are unsigned");
        }

        config.registry = match (non_empty("REGISTRY_URL"), non_empty("REGISTRY_API_KEY")) {
            (Some(url), Some(api_key)) => {
                validate_url(&url)?;
                RegistryBackend::Rest { url, api_key }
            }
            (Some(_), None) => return Err(ConfigError::MissingRequired("REGISTRY_API_KEY")),
            (None, _) => RegistryBackend::Sqlite {
                path: env::var("DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string()),
            },
        };

        config.port = parse_or("PORT", DEFAULT_PORT)?;

        if let Ok(origins) = env::var("ALLOWED_ORIGINS") {
            config.allowed_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        config.rate_limit_rpm = parse_or("RATE_LIMIT_RPM", DEFAULT_RATE_LIMIT_RPM)?;
        config.metrics_token = non_empty("METRICS_TOKEN");
        config.allow_private_origins = flag("ALLOW_PRIVATE_ORIGINS");
        config.require_transaction_ref = flag("REQUIRE_TRANSACTION_REF");
        config.ledger_queue_capacity =
            parse_or("LEDGER_QUEUE_CAPACITY", DEFAULT_LEDGER_QUEUE_CAPACITY)?.max(1);

        let defaults = Timeouts::default();
        config.timeouts = Timeouts {
            resolve: secs_or("RESOLVE_TIMEOUT_SECS", defaults.resolve)?,
            materialize: secs_or("MATERIALIZE_TIMEOUT_SECS", defaults.materialize)?,
            verify: secs_or("VERIFY_TIMEOUT_SECS", defaults.verify)?,
            pay_and_fetch: secs_or("PAY_AND_FETCH_TIMEOUT_SECS", defaults.pay_and_fetch)?,
            upstream: secs_or("UPSTREAM_TIMEOUT_SECS", defaults.upstream)?,
            ledger_claim: secs_or("LEDGER_CLAIM_TIMEOUT_SECS", defaults.ledger_claim)?,
        };

        if config.allow_private_origins {
            tracing::warn!("ALLOW_PRIVATE_ORIGINS=true; origins may resolve to private addresses");
        }
        if config.metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set; /metrics endpoint is publicly accessible");
        }

        Ok(config)
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn flag(key: &str) -> bool {
    env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

fn parse_or<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match non_empty(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber(key, raw.clone())),
        None => Ok(default),
    }
}

fn secs_or(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    parse_or(key, default.as_secs()).map(Duration::from_secs)
}

fn validate_url(raw: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(raw).map_err(|_| ConfigError::InvalidUrl(raw.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(ConfigError::InvalidUrl(raw.to_string())),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unknown settlement network: {0}")]
    InvalidNetwork(String),

    #[error("invalid number for {0}: {1}")]
    InvalidNumber(&'static str, String),
}

//! Pay-per-call reverse proxy.
//!
//! A call to `/{owner}/{api}/{path}` is resolved to a published endpoint,
//! held until a payment covering the endpoint's price is verified, forwarded
//! to the endpoint's origin, and written to the call ledger.

pub mod config;
pub mod cors;
pub mod error;
pub mod gate;
pub mod ledger;
pub mod logging;
pub mod materializer;
pub mod metrics;
pub mod paywall;
pub mod pipeline;
pub mod proxy;
pub mod registry;
pub mod resolver;
pub mod routes;
pub mod state;
pub mod validation;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use state::AppState;

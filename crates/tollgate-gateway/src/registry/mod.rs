//! Read side of the endpoint registry plus the one write the gateway owns
//! there (the materialized monetized URL).
//!
//! Two backends: a SQLite file shared with the management service, and a
//! PostgREST-style HTTP API. Both also implement [`crate::ledger::LedgerStore`].

pub mod rest;
pub mod sqlite;

use async_trait::async_trait;

pub use rest::RestRegistry;
pub use sqlite::SqliteRegistry;

/// Endpoint joined with its API and owner, as stored.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EndpointRecord {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub origin_url: String,
    /// Price in integer micro-units of the settlement asset
    pub price_micro_units: i64,
    pub active: bool,
    pub monetized_url: Option<String>,
    pub api_slug: String,
    pub api_name: String,
    pub owner_username: String,
    /// Owner's settlement address, as stored (not yet validated)
    pub owner_wallet: String,
}

#[async_trait]
pub trait Registry: Send + Sync {
    /// The active endpoint at (owner, api slug, path), if any. Matching is
    /// exact and case-sensitive.
    async fn find_endpoint(
        &self,
        owner: &str,
        api_slug: &str,
        path: &str,
    ) -> Result<Option<EndpointRecord>, RegistryError>;

    /// Store the monetized URL unless a different one is already set.
    /// Writing the value that is already there is a no-op success.
    async fn set_monetized_url(&self, endpoint_id: i64, url: &str) -> Result<(), RegistryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    Poisoned,

    #[error("blocking task failed: {0}")]
    Join(String),

    #[error("registry request failed: {0}")]
    Http(String),

    #[error("registry returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected registry response: {0}")]
    Decode(String),
}

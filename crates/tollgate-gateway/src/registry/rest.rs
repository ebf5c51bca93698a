use async_trait::async_trait;
use serde::Deserialize;

use super::{EndpointRecord, Registry, RegistryError};
use crate::ledger::{CallRecord, LedgerStore};

/// Registry and ledger reached through a PostgREST-style API
/// (`{url}/rest/v1/<table>`), authenticated with an API key.
#[derive(Clone)]
pub struct RestRegistry {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for RestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestRegistry")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct EndpointRow {
    id: i64,
    path: String,
    name: String,
    origin_url: String,
    price_micro: i64,
    active: bool,
    monetized_url: Option<String>,
    apis: ApiRow,
}

#[derive(Debug, Deserialize)]
struct ApiRow {
    slug: String,
    name: String,
    users: UserRow,
}

#[derive(Debug, Deserialize)]
struct UserRow {
    username: String,
    wallet_address: String,
}

impl From<EndpointRow> for EndpointRecord {
    fn from(row: EndpointRow) -> Self {
        Self {
            id: row.id,
            path: row.path,
            name: row.name,
            origin_url: row.origin_url,
            price_micro_units: row.price_micro,
            active: row.active,
            monetized_url: row.monetized_url,
            api_slug: row.apis.slug,
            api_name: row.apis.name,
            owner_username: row.apis.users.username,
            owner_wallet: row.apis.users.wallet_address,
        }
    }
}

const ENDPOINT_SELECT: &str = "id,path,name,origin_url,price_micro,active,monetized_url,\
     apis!inner(slug,name,users!inner(username,wallet_address))";

impl RestRegistry {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn table(&self, name: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, name)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, RegistryError> {
        let response = self
            .authed(builder)
            .send()
            .await
            .map_err(|e| RegistryError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Registry for RestRegistry {
    async fn find_endpoint(
        &self,
        owner: &str,
        api_slug: &str,
        path: &str,
    ) -> Result<Option<EndpointRecord>, RegistryError> {
        let request = self.client.get(self.table("endpoints")).query(&[
            ("select", ENDPOINT_SELECT.to_string()),
            ("path", format!("eq.{path}")),
            ("active", "eq.true".to_string()),
            ("apis.slug", format!("eq.{api_slug}")),
            ("apis.users.username", format!("eq.{owner}")),
            ("limit", "1".to_string()),
        ]);

        let rows: Vec<EndpointRow> = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| RegistryError::Decode(e.to_string()))?;

        Ok(rows.into_iter().next().map(EndpointRecord::from))
    }

    async fn set_monetized_url(&self, endpoint_id: i64, url: &str) -> Result<(), RegistryError> {
        // Only fill an empty slot; racing writers send identical values anyway.
        let request = self
            .client
            .patch(self.table("endpoints"))
            .query(&[
                ("id", format!("eq.{endpoint_id}")),
                ("or", "(monetized_url.is.null,monetized_url.eq.)".to_string()),
            ])
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({ "monetized_url": url }));

        self.send(request).await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for RestRegistry {
    async fn insert_call(&self, record: &CallRecord) -> Result<(), RegistryError> {
        let request = self
            .client
            .post(self.table("api_calls"))
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({
                "endpoint_id": record.endpoint_id,
                "caller_address": record.caller_address,
                "transaction_hash": record.transaction,
                "amount_micro": record.amount_micro_units,
                "status_code": null,
                "latency_ms": null,
            }));

        self.send(request).await?;
        Ok(())
    }

    async fn claim_transaction(&self, record: &CallRecord) -> Result<bool, RegistryError> {
        match self.insert_call(record).await {
            Ok(()) => Ok(true),
            // unique violation on transaction_hash
            Err(RegistryError::Status { status: 409, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn complete_call(
        &self,
        transaction: &str,
        status_code: u16,
        latency_ms: u64,
    ) -> Result<bool, RegistryError> {
        let request = self
            .client
            .patch(self.table("api_calls"))
            .query(&[
                ("transaction_hash", format!("eq.{transaction}")),
                ("status_code", "is.null".to_string()),
            ])
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({
                "status_code": status_code,
                "latency_ms": latency_ms,
                "completed_at": chrono::Utc::now().to_rfc3339(),
            }));

        let updated: Vec<serde_json::Value> = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| RegistryError::Decode(e.to_string()))?;
        Ok(!updated.is_empty())
    }
}

//! Route → endpoint configuration.

use std::time::Duration;

use alloy::primitives::Address;

use crate::error::GatewayError;
use crate::registry::{EndpointRecord, Registry};
use crate::validation::RouteKey;

/// Immutable view of a published endpoint, as the rest of the pipeline sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub id: i64,
    pub price_micro_units: u64,
    pub developer_address: Address,
    pub origin_url: String,
    pub monetized_url: Option<String>,
    pub api_display_name: String,
    pub endpoint_display_name: String,
}

impl TryFrom<EndpointRecord> for EndpointConfig {
    type Error = GatewayError;

    fn try_from(record: EndpointRecord) -> Result<Self, Self::Error> {
        let developer_address: Address = record.owner_wallet.trim().parse().map_err(|_| {
            GatewayError::Internal(format!(
                "endpoint {} has an invalid owner wallet address",
                record.id
            ))
        })?;
        let price_micro_units = u64::try_from(record.price_micro_units).map_err(|_| {
            GatewayError::Internal(format!("endpoint {} has a negative price", record.id))
        })?;
        Ok(Self {
            id: record.id,
            price_micro_units,
            developer_address,
            origin_url: record.origin_url,
            monetized_url: record.monetized_url.filter(|u| !u.is_empty()),
            api_display_name: record.api_name,
            endpoint_display_name: record.name,
        })
    }
}

/// Look up the active endpoint for `key`. Unknown and inactive endpoints are
/// both `NotFound`; a slow or failing registry is `Internal`.
pub async fn resolve(
    registry: &dyn Registry,
    key: &RouteKey,
    timeout: Duration,
) -> Result<EndpointConfig, GatewayError> {
    let lookup = registry.find_endpoint(&key.owner, &key.api_slug, &key.path);
    let record = tokio::time::timeout(timeout, lookup)
        .await
        .map_err(|_| GatewayError::Internal(format!("registry lookup for {key} timed out")))??;

    match record {
        Some(record) if record.active => EndpointConfig::try_from(record),
        _ => Err(GatewayError::NotFound(key.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryError;
    use async_trait::async_trait;

    struct FixedRegistry(Option<EndpointRecord>);

    #[async_trait]
    impl Registry for FixedRegistry {
        async fn find_endpoint(
            &self,
            _owner: &str,
            _api_slug: &str,
            _path: &str,
        ) -> Result<Option<EndpointRecord>, RegistryError> {
            Ok(self.0.clone())
        }

        async fn set_monetized_url(&self, _id: i64, _url: &str) -> Result<(), RegistryError> {
            Ok(())
        }
    }

    struct SlowRegistry;

    #[async_trait]
    impl Registry for SlowRegistry {
        async fn find_endpoint(
            &self,
            _owner: &str,
            _api_slug: &str,
            _path: &str,
        ) -> Result<Option<EndpointRecord>, RegistryError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }

        async fn set_monetized_url(&self, _id: i64, _url: &str) -> Result<(), RegistryError> {
            Ok(())
        }
    }

    fn record() -> EndpointRecord {
        EndpointRecord {
            id: 7,
            path: "today".into(),
            name: "Today".into(),
            origin_url: "https://origin.example.com/weather".into(),
            price_micro_units: 1_500_000,
            active: true,
            monetized_url: Some(String::new()),
            api_slug: "weather".into(),
            api_name: "Weather".into(),
            owner_username: "alice".into(),
            owner_wallet: "0x00000000000000000000000000000000000000aa".into(),
        }
    }

    fn key() -> RouteKey {
        RouteKey::new("alice", "weather", "today").unwrap()
    }

    #[tokio::test]
    async fn test_resolves_active_endpoint() {
        let registry = FixedRegistry(Some(record()));
        let config = resolve(&registry, &key(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(config.id, 7);
        assert_eq!(config.price_micro_units, 1_500_000);
        assert_eq!(config.api_display_name, "Weather");
        // Empty string counts as not materialized
        assert_eq!(config.monetized_url, None);
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_are_not_found() {
        let missing = FixedRegistry(None);
        let err = resolve(&missing, &key(), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));

        let mut inactive = record();
        inactive.active = false;
        let inactive = FixedRegistry(Some(inactive));
        let err = resolve(&inactive, &key(), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_bad_wallet_is_internal() {
        let mut bad = record();
        bad.owner_wallet = "not-an-address".into();
        let err = resolve(&FixedRegistry(Some(bad)), &key(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Internal(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_internal() {
        let err = resolve(&SlowRegistry, &key(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Internal(_)));
    }
}

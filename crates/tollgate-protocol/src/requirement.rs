use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::evidence::PaymentEvidence;
use crate::network::SettlementNetwork;
use crate::price::{format_micro_units, parse_decimal_amount};

/// What a caller has to pay for one call to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    /// Decimal amount, trailing zeros trimmed ("1.5").
    pub amount: String,
    pub amount_micro_units: u64,
    pub recipient: Address,
    pub network: String,
    pub asset: Address,
    /// Public URL of the resource being paid for.
    pub resource: String,
    pub max_timeout_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PaymentRequirement {
    pub fn new(
        network: SettlementNetwork,
        price_micro_units: u64,
        recipient: Address,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            amount: format_micro_units(price_micro_units),
            amount_micro_units: price_micro_units,
            recipient,
            network: network.id().to_string(),
            asset: network.asset(),
            resource: resource.into(),
            max_timeout_seconds: 60,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Cheap local checks run before the facilitator is asked anything:
    /// the evidence must name this network and cover the quoted amount.
    pub fn check_evidence(&self, evidence: &PaymentEvidence) -> Result<(), ProtocolError> {
        if evidence.network != self.network {
            return Err(ProtocolError::InvalidEvidence(format!(
                "evidence is for network '{}', expected '{}'",
                evidence.network, self.network
            )));
        }
        let paid = parse_decimal_amount(&evidence.amount)?;
        if paid < self.amount_micro_units {
            return Err(ProtocolError::InvalidEvidence(format!(
                "paid {} but {} is required",
                format_micro_units(paid),
                self.amount
            )));
        }
        if evidence.transaction.trim().is_empty() {
            return Err(ProtocolError::InvalidEvidence(
                "missing transaction reference".to_string(),
            ));
        }
        Ok(())
    }
}

/// Body of a 402 response for non-interactive callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub accepts: Vec<PaymentRequirement>,
}

impl PaymentRequiredBody {
    pub fn required(requirement: PaymentRequirement) -> Self {
        Self {
            error: "payment_required".to_string(),
            message: Some("Payment required to access this resource".to_string()),
            accepts: vec![requirement],
        }
    }

    pub fn rejected(requirement: PaymentRequirement, reason: impl Into<String>) -> Self {
        Self {
            error: "payment_rejected".to_string(),
            message: Some(reason.into()),
            accepts: vec![requirement],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> Address {
        "0xabcdef1234567890abcdef1234567890abcdef12".parse().unwrap()
    }

    fn evidence(amount: &str, network: &str) -> PaymentEvidence {
        PaymentEvidence {
            transaction: "0xfeed".to_string(),
            payer: Address::ZERO,
            amount: amount.to_string(),
            network: network.to_string(),
        }
    }

    #[test]
    fn test_requirement_renders_decimal_amount() {
        let req = PaymentRequirement::new(
            SettlementNetwork::BaseSepolia,
            1_500_000,
            recipient(),
            "https://gw.example/alice/weather/today",
        );
        assert_eq!(req.amount, "1.5");
        assert_eq!(req.amount_micro_units, 1_500_000);
        assert_eq!(req.network, "base-sepolia");
        assert_eq!(req.asset, SettlementNetwork::BaseSepolia.asset());

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["amount"], "1.5");
        assert_eq!(json["amountMicroUnits"], 1_500_000);
        assert!(json.get("description").is_none());
    }

    #[test]
    fn test_check_evidence() {
        let req = PaymentRequirement::new(SettlementNetwork::Base, 10_000, recipient(), "r");
        assert!(req.check_evidence(&evidence("0.01", "base")).is_ok());
        assert!(req.check_evidence(&evidence("0.02", "base")).is_ok());
        assert!(req.check_evidence(&evidence("0.009", "base")).is_err());
        assert!(req.check_evidence(&evidence("0.01", "base-sepolia")).is_err());
        assert!(req.check_evidence(&evidence("lots", "base")).is_err());

        let mut blank = evidence("0.01", "base");
        blank.transaction = " ".to_string();
        assert!(req.check_evidence(&blank).is_err());
    }

    #[test]
    fn test_payment_required_body_shape() {
        let req = PaymentRequirement::new(SettlementNetwork::Base, 1, recipient(), "r")
            .with_description("Weather API");
        let body = serde_json::to_value(PaymentRequiredBody::rejected(req, "expired")).unwrap();
        assert_eq!(body["error"], "payment_rejected");
        assert_eq!(body["message"], "expired");
        assert_eq!(body["accepts"][0]["amount"], "0.000001");
        assert_eq!(body["accepts"][0]["description"], "Weather API");
    }
}

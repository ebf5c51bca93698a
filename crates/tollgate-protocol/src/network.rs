//! Settlement networks the gateway can quote prices on.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{address, Address};

use crate::error::ProtocolError;

/// Every supported settlement asset uses 6 decimal places, which is what
/// lets prices be stored as integer micro-units.
pub const ASSET_DECIMALS: u32 = 6;

/// A chain plus the stablecoin the gateway settles in on that chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettlementNetwork {
    Base,
    BaseSepolia,
    TempoModerato,
}

impl SettlementNetwork {
    /// Network tag used in requirements, evidence and receipts.
    pub fn id(&self) -> &'static str {
        match self {
            SettlementNetwork::Base => "base",
            SettlementNetwork::BaseSepolia => "base-sepolia",
            SettlementNetwork::TempoModerato => "tempo-moderato",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SettlementNetwork::Base => "Base",
            SettlementNetwork::BaseSepolia => "Base Sepolia",
            SettlementNetwork::TempoModerato => "Tempo Moderato",
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            SettlementNetwork::Base => 8453,
            SettlementNetwork::BaseSepolia => 84532,
            SettlementNetwork::TempoModerato => 42431,
        }
    }

    /// CAIP-2 identifier (`eip155:<chain id>`).
    pub fn caip2(&self) -> String {
        format!("eip155:{}", self.chain_id())
    }

    /// Token contract the transfer must be made in.
    pub fn asset(&self) -> Address {
        match self {
            SettlementNetwork::Base => address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
            SettlementNetwork::BaseSepolia => address!("036CbD53842c5426634e7929541eC2318f3dCF7e"),
            SettlementNetwork::TempoModerato => address!("20c0000000000000000000000000000000000000"),
        }
    }

    pub fn asset_symbol(&self) -> &'static str {
        match self {
            SettlementNetwork::Base | SettlementNetwork::BaseSepolia => "USDC",
            SettlementNetwork::TempoModerato => "pathUSD",
        }
    }

    pub fn rpc_url(&self) -> &'static str {
        match self {
            SettlementNetwork::Base => "https://mainnet.base.org",
            SettlementNetwork::BaseSepolia => "https://sepolia.base.org",
            SettlementNetwork::TempoModerato => "https://rpc.moderato.tempo.xyz",
        }
    }

    pub fn explorer_base(&self) -> &'static str {
        match self {
            SettlementNetwork::Base => "https://basescan.org",
            SettlementNetwork::BaseSepolia => "https://sepolia.basescan.org",
            SettlementNetwork::TempoModerato => "https://explore.moderato.tempo.xyz",
        }
    }

    pub fn is_testnet(&self) -> bool {
        !matches!(self, SettlementNetwork::Base)
    }
}

impl fmt::Display for SettlementNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for SettlementNetwork {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base" | "base-mainnet" | "eip155:8453" => Ok(SettlementNetwork::Base),
            "base-sepolia" | "eip155:84532" => Ok(SettlementNetwork::BaseSepolia),
            "tempo-moderato" | "tempo" | "eip155:42431" => Ok(SettlementNetwork::TempoModerato),
            other => Err(ProtocolError::UnknownNetwork(other.to_string())),
        }
    }
}

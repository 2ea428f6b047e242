//! Supported networks and their USDC deployments.

use alloy::primitives::{Address, address};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    #[serde(rename = "base-mainnet")]
    BaseMainnet,
    #[serde(rename = "base-sepolia")]
    BaseSepolia,
}

impl Network {
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::BaseMainnet => 8453,
            Network::BaseSepolia => 84532,
        }
    }

    pub fn variants() -> &'static [Network] {
        &[Network::BaseMainnet, Network::BaseSepolia]
    }

    /// The canonical USDC contract address for this network.
    pub fn usdc_contract(&self) -> Address {
        match self {
            Network::BaseMainnet => address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
            Network::BaseSepolia => address!("036CbD53842c5426634e7929541eC2318f3dCF7e"),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Network::BaseMainnet => "base-mainnet",
            Network::BaseSepolia => "base-sepolia",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported network {0}")]
pub struct UnsupportedNetworkError(String);

impl FromStr for Network {
    type Err = UnsupportedNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base-mainnet" => Ok(Network::BaseMainnet),
            "base-sepolia" => Ok(Network::BaseSepolia),
            other => Err(UnsupportedNetworkError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_ids_match_base() {
        assert_eq!(Network::BaseMainnet.chain_id(), 8453);
        assert_eq!(Network::BaseSepolia.chain_id(), 84532);
    }

    #[test]
    fn round_trips_through_string() {
        assert_eq!(Network::from_str("base-sepolia").unwrap(), Network::BaseSepolia);
        assert!(Network::from_str("ethereum-mainnet").is_err());
    }
}

//! Deployment configuration, threaded explicitly through every entry point.
//!
//! There is deliberately no process-global network selection: two
//! aggregations with different networks can run in the same process without
//! interfering.

use alloy::primitives::{address, Address};
use eyre::Context as _;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::PoolscopeError;

pub const MAINNET_CHAIN_ID: u64 = 314;
pub const CALIBNET_CHAIN_ID: u64 = 314_159;
pub const LOCALNET_CHAIN_ID: u64 = 31_415_926;

/// Upper bound on concurrently in-flight sub-queries per aggregation run.
pub const DEFAULT_FANOUT_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    #[default]
    Mainnet,
    Calibnet,
    Localnet,
}

impl NetworkMode {
    pub const fn chain_id(self) -> u64 {
        match self {
            Self::Mainnet => MAINNET_CHAIN_ID,
            Self::Calibnet => CALIBNET_CHAIN_ID,
            Self::Localnet => LOCALNET_CHAIN_ID,
        }
    }

    pub const fn from_chain_id(id: u64) -> Result<Self, PoolscopeError> {
        match id {
            MAINNET_CHAIN_ID => Ok(Self::Mainnet),
            CALIBNET_CHAIN_ID => Ok(Self::Calibnet),
            LOCALNET_CHAIN_ID => Ok(Self::Localnet),
            other => Err(PoolscopeError::UnsupportedNetwork(other)),
        }
    }

    /// Actor-address prefix used on this network (`f01234` vs `t01234`).
    pub const fn address_prefix(self) -> &'static str {
        match self {
            Self::Mainnet => "f",
            Self::Calibnet | Self::Localnet => "t",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Primary node endpoint (serves both `Filecoin.*` and `eth_*` methods).
    pub rpc_url: String,
    /// Additional endpoints to try when the primary fails.
    pub fallback_rpc_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Event index listing registered agents (`{base}/agent/list`).
    pub agent_index_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    pub pool: Address,
    pub agent_factory: Address,
    pub miner_registry: Address,
    pub rate_module: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub network: NetworkMode,
    pub rpc: RpcConfig,
    pub http: HttpConfig,
    pub contracts: ContractsConfig,
    pub fanout_limit: usize,
}

/// Optional TOML overlay; every field falls back to the network defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigOverrides {
    rpc_url: Option<String>,
    fallback_rpc_urls: Option<Vec<String>>,
    agent_index_base_url: Option<String>,
    pool: Option<Address>,
    agent_factory: Option<Address>,
    miner_registry: Option<Address>,
    rate_module: Option<Address>,
    fanout_limit: Option<usize>,
}

impl Config {
    pub fn for_network(network: NetworkMode) -> Self {
        let (rpc_url, fallback_rpc_urls, agent_index_base_url) = match network {
            NetworkMode::Mainnet => (
                "https://api.node.glif.io/rpc/v1".to_owned(),
                vec!["https://filecoin.chainup.net/rpc/v1".to_owned()],
                "https://events.glif.link".to_owned(),
            ),
            NetworkMode::Calibnet => (
                "https://api.calibration.node.glif.io/rpc/v1".to_owned(),
                Vec::new(),
                "https://events.calibration.glif.link".to_owned(),
            ),
            NetworkMode::Localnet => (
                "http://127.0.0.1:1234/rpc/v1".to_owned(),
                Vec::new(),
                "http://127.0.0.1:8090".to_owned(),
            ),
        };

        let contracts = match network {
            NetworkMode::Mainnet => ContractsConfig {
                pool: address!("43dae5624445e7679d16a63211c5ff368681500c"),
                agent_factory: address!("0bd6b59b1a5b8f6e8a5a0bd0c8585e8b4b08d862"),
                miner_registry: address!("3c1e8d6c09fcda7cbd3988b5d6976d47ea7cb08a"),
                rate_module: address!("77a5cbbb4b1c77e1f44b8a0b5e6ac2bbe3c2ab75"),
            },
            NetworkMode::Calibnet | NetworkMode::Localnet => ContractsConfig {
                pool: address!("25d7b1c027ee6ea5a725e99722da3d1fbfa12323"),
                agent_factory: address!("0077a9b3c7c36c3fb278dc0d63dfa1cb4b9cf004"),
                miner_registry: address!("9497e4bbd6b10d7cb50b1f5a0ad0caf0e6e11806"),
                rate_module: address!("8c6f67ab0e1ee5b0c724de097a38ae8e0870b2a8"),
            },
        };

        Self {
            network,
            rpc: RpcConfig {
                rpc_url,
                fallback_rpc_urls,
            },
            http: HttpConfig {
                agent_index_base_url,
            },
            contracts,
            fanout_limit: DEFAULT_FANOUT_LIMIT,
        }
    }

    /// Network defaults, overlaid with an optional TOML file.
    pub fn load(network: NetworkMode, file: Option<&Path>) -> eyre::Result<Self> {
        let mut cfg = Self::for_network(network);
        let Some(path) = file else {
            return Ok(cfg);
        };

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let overrides: ConfigOverrides = toml::from_str(&raw)
            .with_context(|| format!("parse config file {}", path.display()))?;

        if let Some(v) = overrides.rpc_url {
            cfg.rpc.rpc_url = v;
        }
        if let Some(v) = overrides.fallback_rpc_urls {
            cfg.rpc.fallback_rpc_urls = v;
        }
        if let Some(v) = overrides.agent_index_base_url {
            cfg.http.agent_index_base_url = v;
        }
        if let Some(v) = overrides.pool {
            cfg.contracts.pool = v;
        }
        if let Some(v) = overrides.agent_factory {
            cfg.contracts.agent_factory = v;
        }
        if let Some(v) = overrides.miner_registry {
            cfg.contracts.miner_registry = v;
        }
        if let Some(v) = overrides.rate_module {
            cfg.contracts.rate_module = v;
        }
        if let Some(v) = overrides.fanout_limit {
            cfg.fanout_limit = v.max(1);
        }
        Ok(cfg)
    }
}

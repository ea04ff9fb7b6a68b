//! FEVM contract client for the lending protocol: agent factory, miner
//! registry, per-agent contracts, the pool itself, and the rate module.

use alloy::{
    eips::BlockId,
    primitives::{Address, U256},
    providers::RootProvider,
    sol,
};
use async_trait::async_trait;
use eyre::Context as _;
use reqwest::Client;
use rust_decimal::Decimal;
use std::time::Duration;

use crate::amount;
use crate::config::Config;
use crate::errors::PoolscopeError;
use crate::query::{BorrowCredential, ChainSnapshot, MinerAddress, PoolReader};
use crate::retry::{try_endpoints, RetryPolicy};

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

sol! {
    #[sol(rpc)]
    contract IAgentFactory {
        function agentCount() external view returns (uint256);
    }

    #[sol(rpc)]
    contract IMinerRegistry {
        function getMinersList(uint256 agentId) external view returns (uint64[] memory);
    }

    #[sol(rpc)]
    contract IAgent {
        function liquidAssets() external view returns (uint256);
    }

    #[sol(rpc)]
    contract IInfinityPool {
        function totalAssets() external view returns (uint256);
        function totalBorrowed() external view returns (uint256);
        function borrowableLiquidity() external view returns (uint256);
        function exitReserve() external view returns (uint256);
        function apy() external view returns (uint256);
    }

    #[sol(rpc)]
    contract IRateModule {
        struct AgentData {
            uint256 agentValue;
            uint256 collateralValue;
            uint256 expectedDailyFaultPenalties;
            uint256 expectedDailyRewards;
            uint256 gcred;
            uint256 qaPower;
            uint256 principal;
            uint256 faultySectors;
            uint256 liveSectors;
            uint256 greenScore;
        }

        function getRate(AgentData memory agent) external view returns (uint256);
    }
}

fn pin(snapshot: &ChainSnapshot) -> Option<BlockId> {
    snapshot.height.map(BlockId::number)
}

fn provider_for_url(url: &str) -> eyre::Result<RootProvider> {
    let u: reqwest::Url = url
        .parse()
        .with_context(|| format!("invalid rpc url: {url}"))?;
    let client = Client::builder()
        .timeout(DEFAULT_RPC_TIMEOUT)
        .connect_timeout(DEFAULT_RPC_CONNECT_TIMEOUT)
        .build()
        .context("build rpc http client")?;
    let http = alloy::transports::http::Http::with_client(client, u);
    let rpc_client = alloy::rpc::client::RpcClient::new(http, false);
    Ok(RootProvider::new(rpc_client))
}

#[derive(Debug, Clone)]
pub struct PoolContracts {
    providers: Vec<RootProvider>,
    policy: RetryPolicy,
    pool: Address,
    agent_factory: Address,
    miner_registry: Address,
    rate_module: Address,
    address_prefix: &'static str,
}

impl PoolContracts {
    pub fn new(cfg: &Config) -> eyre::Result<Self> {
        let mut providers = Vec::with_capacity(1 + cfg.rpc.fallback_rpc_urls.len());
        let mut seen: Vec<&str> = Vec::new();
        for url in std::iter::once(&cfg.rpc.rpc_url).chain(&cfg.rpc.fallback_rpc_urls) {
            let t = url.trim();
            if t.is_empty() || seen.contains(&t) {
                continue;
            }
            seen.push(t);
            providers.push(provider_for_url(t)?);
        }

        Ok(Self {
            providers,
            policy: RetryPolicy::default(),
            pool: cfg.contracts.pool,
            agent_factory: cfg.contracts.agent_factory,
            miner_registry: cfg.contracts.miner_registry,
            rate_module: cfg.contracts.rate_module,
            address_prefix: cfg.network.address_prefix(),
        })
    }

    async fn with_providers<T, Fut>(
        &self,
        label: &'static str,
        f: impl Fn(RootProvider) -> Fut,
    ) -> eyre::Result<T>
    where
        Fut: std::future::Future<Output = eyre::Result<T>>,
    {
        try_endpoints(&self.providers, &self.policy, |p| f(p.clone()), label).await
    }
}

#[async_trait]
impl PoolReader for PoolContracts {
    async fn agent_count(&self, snapshot: &ChainSnapshot) -> eyre::Result<u64> {
        let factory = self.agent_factory;
        let block = pin(snapshot);
        let count = self
            .with_providers("agent count", move |p| async move {
                let c = IAgentFactory::new(factory, &p);
                let mut call = c.agentCount();
                if let Some(b) = block {
                    call = call.block(b);
                }
                call.call().await.context("agentCount call")
            })
            .await?;
        u64::try_from(count).map_err(|_| {
            PoolscopeError::Conversion(format!("agent count out of range: {count}")).into()
        })
    }

    async fn agent_miners(
        &self,
        agent_id: u64,
        snapshot: &ChainSnapshot,
    ) -> eyre::Result<Vec<MinerAddress>> {
        let registry = self.miner_registry;
        let block = pin(snapshot);
        let ids = self
            .with_providers("agent miner list", move |p| async move {
                let c = IMinerRegistry::new(registry, &p);
                let mut call = c.getMinersList(U256::from(agent_id));
                if let Some(b) = block {
                    call = call.block(b);
                }
                call.call().await.context("getMinersList call")
            })
            .await?;
        Ok(ids
            .into_iter()
            .map(|id| MinerAddress::from_actor_id(self.address_prefix, id))
            .collect())
    }

    async fn agent_liquid_assets(
        &self,
        agent: Address,
        snapshot: &ChainSnapshot,
    ) -> eyre::Result<U256> {
        let block = pin(snapshot);
        self.with_providers("agent liquid assets", move |p| async move {
            let c = IAgent::new(agent, &p);
            let mut call = c.liquidAssets();
            if let Some(b) = block {
                call = call.block(b);
            }
            call.call().await.context("liquidAssets call")
        })
        .await
    }

    async fn total_assets(&self, snapshot: &ChainSnapshot) -> eyre::Result<Decimal> {
        let pool = self.pool;
        let block = pin(snapshot);
        let atto = self
            .with_providers("pool total assets", move |p| async move {
                let c = IInfinityPool::new(pool, &p);
                let mut call = c.totalAssets();
                if let Some(b) = block {
                    call = call.block(b);
                }
                call.call().await.context("totalAssets call")
            })
            .await?;
        amount::atto_to_fil(atto)
    }

    async fn total_borrowed(&self, snapshot: &ChainSnapshot) -> eyre::Result<Decimal> {
        let pool = self.pool;
        let block = pin(snapshot);
        let atto = self
            .with_providers("pool total borrowed", move |p| async move {
                let c = IInfinityPool::new(pool, &p);
                let mut call = c.totalBorrowed();
                if let Some(b) = block {
                    call = call.block(b);
                }
                call.call().await.context("totalBorrowed call")
            })
            .await?;
        amount::atto_to_fil(atto)
    }

    async fn borrowable_liquidity(&self, snapshot: &ChainSnapshot) -> eyre::Result<Decimal> {
        let pool = self.pool;
        let block = pin(snapshot);
        let atto = self
            .with_providers("pool borrowable liquidity", move |p| async move {
                let c = IInfinityPool::new(pool, &p);
                let mut call = c.borrowableLiquidity();
                if let Some(b) = block {
                    call = call.block(b);
                }
                call.call().await.context("borrowableLiquidity call")
            })
            .await?;
        amount::atto_to_fil(atto)
    }

    async fn exit_reserve(&self, snapshot: &ChainSnapshot) -> eyre::Result<U256> {
        let pool = self.pool;
        let block = pin(snapshot);
        self.with_providers("pool exit reserve", move |p| async move {
            let c = IInfinityPool::new(pool, &p);
            let mut call = c.exitReserve();
            if let Some(b) = block {
                call = call.block(b);
            }
            call.call().await.context("exitReserve call")
        })
        .await
    }

    async fn apy(&self, snapshot: &ChainSnapshot) -> eyre::Result<U256> {
        let pool = self.pool;
        let block = pin(snapshot);
        self.with_providers("pool apy", move |p| async move {
            let c = IInfinityPool::new(pool, &p);
            let mut call = c.apy();
            if let Some(b) = block {
                call = call.block(b);
            }
            call.call().await.context("apy call")
        })
        .await
    }

    async fn rate_from_credential(&self, credential: &BorrowCredential) -> eyre::Result<U256> {
        let module = self.rate_module;
        let data = IRateModule::AgentData {
            agentValue: credential.agent_value,
            collateralValue: credential.collateral_value,
            expectedDailyFaultPenalties: credential.expected_daily_fault_penalties,
            expectedDailyRewards: credential.expected_daily_rewards,
            gcred: credential.gcred,
            qaPower: credential.qa_power,
            principal: credential.principal,
            faultySectors: credential.faulty_sectors,
            liveSectors: credential.live_sectors,
            greenScore: credential.green_score,
        };
        self.with_providers("rate quote", move |p| {
            let data = data.clone();
            async move {
                let c = IRateModule::new(module, &p);
                c.getRate(data).call().await.context("getRate call")
            }
        })
        .await
    }
}

//! Collaborator seams and the chain-snapshot type shared by every
//! aggregation run.
//!
//! The engine is generic over three read-only collaborators: the chain node
//! (`ChainReader`), the lending-protocol contracts (`PoolReader`), and the
//! external event index listing registered agents (`AgentIndex`). Concrete
//! implementations live under `chains/`.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use eyre::WrapErr as _;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::PoolscopeError;

/// A storage-provider actor address in its canonical string form
/// (e.g. `f01234` on mainnet, `t01234` on calibnet).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MinerAddress(String);

impl MinerAddress {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Build an address from a bare actor id and the network prefix.
    pub fn from_actor_id(prefix: &str, id: u64) -> Self {
        Self::new(format!("{prefix}0{id}"))
    }

    /// Light shape check; full address parsing belongs to the chain node.
    pub fn parse(s: &str) -> eyre::Result<Self> {
        let t = s.trim();
        if t.len() < 2 || !(t.starts_with('f') || t.starts_with('t')) {
            eyre::bail!("not a miner address: {s:?}");
        }
        Ok(Self(t.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MinerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A CID in its JSON-RPC wire form (`{"/": "bafy..."}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidRef {
    #[serde(rename = "/")]
    pub cid: String,
}

/// The block-header CIDs identifying one tipset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TipSetKey(pub Vec<CidRef>);

/// A stable reference to chain state for one aggregation run.
///
/// With a pinned height the tipset key is resolved exactly once and reused by
/// every chain read in the run; pool-contract reads pin by block number.
/// Without one, every read floats on the collaborator's own "latest", so
/// concurrent sub-queries may observe different heights if the chain
/// advances mid-request. That relaxation matches the protocol's own
/// unpinned read path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainSnapshot {
    pub height: Option<u64>,
    pub tipset: Option<TipSetKey>,
}

impl ChainSnapshot {
    pub const fn latest() -> Self {
        Self {
            height: None,
            tipset: None,
        }
    }

    pub const fn is_pinned(&self) -> bool {
        self.height.is_some()
    }
}

/// Resolve an optional caller-supplied height into the snapshot used by a
/// whole aggregation run.
pub async fn resolve_snapshot<C>(chain: &C, height: Option<u64>) -> eyre::Result<ChainSnapshot>
where
    C: ChainReader + ?Sized,
{
    let Some(h) = height else {
        return Ok(ChainSnapshot::latest());
    };
    let tipset = chain
        .tipset_at_height(h)
        .await
        .wrap_err_with(|| PoolscopeError::ChainResolution(h))?;
    Ok(ChainSnapshot {
        height: Some(h),
        tipset: Some(tipset),
    })
}

/// Storage power of one miner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MinerPower {
    pub raw_byte: U256,
    pub quality_adj: U256,
}

/// Sector counts of one miner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectorCount {
    pub live: u64,
    pub faulty: u64,
}

/// One registered agent as reported by the event index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub tx_hash: String,
    pub id: String,
    pub address: Address,
    pub height: Option<u64>,
}

/// The credential-shaped record submitted to the rate module.
///
/// Fields the capacity calculator cannot observe stay at zero; the G-score
/// placeholder is fixed at 100.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BorrowCredential {
    pub agent_value: U256,
    pub collateral_value: U256,
    pub expected_daily_fault_penalties: U256,
    pub expected_daily_rewards: U256,
    pub gcred: U256,
    pub qa_power: U256,
    pub principal: U256,
    pub faulty_sectors: U256,
    pub live_sectors: U256,
    pub green_score: U256,
}

/// Read-only chain node access.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Canonical tipset key at `height`; the basis of snapshot pinning.
    async fn tipset_at_height(&self, height: u64) -> eyre::Result<TipSetKey>;

    /// On-chain actor balance in attoFIL.
    async fn actor_balance(
        &self,
        miner: &MinerAddress,
        snapshot: &ChainSnapshot,
    ) -> eyre::Result<U256>;

    async fn miner_power(
        &self,
        miner: &MinerAddress,
        snapshot: &ChainSnapshot,
    ) -> eyre::Result<MinerPower>;

    async fn miner_sector_count(
        &self,
        miner: &MinerAddress,
        snapshot: &ChainSnapshot,
    ) -> eyre::Result<SectorCount>;

    /// Spendable wallet balance (head state).
    async fn wallet_balance(&self, addr: &MinerAddress) -> eyre::Result<U256>;

    /// Funds still vesting toward the miner.
    async fn miner_locked_funds(
        &self,
        miner: &MinerAddress,
        snapshot: &ChainSnapshot,
    ) -> eyre::Result<U256>;

    /// Protocol estimate of the miner's expected daily block rewards.
    async fn expected_daily_rewards(
        &self,
        miner: &MinerAddress,
        snapshot: &ChainSnapshot,
    ) -> eyre::Result<U256>;
}

/// Read-only lending-protocol contract access.
///
/// The FIL-denominated scalars come back as exact decimals the way the pool
/// SDK reports them; the metrics calculator converts to attoFIL at a single
/// boundary (`amount::fil_to_atto`).
#[async_trait]
pub trait PoolReader: Send + Sync {
    async fn agent_count(&self, snapshot: &ChainSnapshot) -> eyre::Result<u64>;

    /// Miners pledged by the agent with the given 1-based registry id.
    async fn agent_miners(
        &self,
        agent_id: u64,
        snapshot: &ChainSnapshot,
    ) -> eyre::Result<Vec<MinerAddress>>;

    /// Liquid assets held on an agent contract, in attoFIL.
    async fn agent_liquid_assets(
        &self,
        agent: Address,
        snapshot: &ChainSnapshot,
    ) -> eyre::Result<U256>;

    async fn total_assets(&self, snapshot: &ChainSnapshot) -> eyre::Result<Decimal>;

    async fn total_borrowed(&self, snapshot: &ChainSnapshot) -> eyre::Result<Decimal>;

    async fn borrowable_liquidity(&self, snapshot: &ChainSnapshot) -> eyre::Result<Decimal>;

    /// Exit reserve, already in attoFIL.
    async fn exit_reserve(&self, snapshot: &ChainSnapshot) -> eyre::Result<U256>;

    /// WAD-scaled yearly yield.
    async fn apy(&self, snapshot: &ChainSnapshot) -> eyre::Result<U256>;

    /// WAD-scaled per-epoch lending rate for a credential. Head-only: the
    /// rate module exposes no historical queries.
    async fn rate_from_credential(&self, credential: &BorrowCredential) -> eyre::Result<U256>;
}

/// The external index of registered agents. Fetched once per aggregation
/// run and not snapshot-parameterized (accepted staleness).
#[async_trait]
pub trait AgentIndex: Send + Sync {
    async fn fetch_agents(&self) -> eyre::Result<Vec<AgentRecord>>;
}

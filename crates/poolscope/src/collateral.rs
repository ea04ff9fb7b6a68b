//! Collateral and power aggregation across the enumerated miner set.

use alloy::primitives::{I256, U256};
use eyre::WrapErr as _;
use tracing::debug;

use crate::amount;
use crate::errors::PoolscopeError;
use crate::fanout::multiread;
use crate::query::{AgentIndex, ChainReader, ChainSnapshot, MinerAddress, PoolReader};
use crate::registry;

/// Per-snapshot collateral totals.
///
/// `total_miner_collaterals` is signed: outstanding debt larger than the
/// summed balances plus liquid assets yields a negative figure, and it is
/// deliberately not clamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollateralAggregate {
    pub agent_count: u64,
    pub miner_count: u64,
    /// Σ miner balances before the debt/liquid-asset adjustment.
    pub balances: U256,
    pub total_miner_collaterals: I256,
    pub total_miner_sectors: U256,
    pub total_miner_qap: U256,
    pub total_miner_rbp: U256,
}

fn to_signed(v: U256, what: &str) -> eyre::Result<I256> {
    I256::try_from(v)
        .map_err(|_| PoolscopeError::Conversion(format!("{what} beyond signed range: {v}")).into())
}

fn sum(values: impl IntoIterator<Item = U256>, what: &str) -> eyre::Result<U256> {
    let mut total = U256::ZERO;
    for v in values {
        total = total
            .checked_add(v)
            .ok_or_else(|| PoolscopeError::Conversion(format!("{what} sum overflow")))?;
    }
    Ok(total)
}

/// Sum the liquid assets held on every registered agent.
///
/// The registered-agent list comes from the external event index (one fetch
/// per aggregation run, not snapshot-parameterized); the per-agent asset
/// reads are pinned like every other sub-query.
pub async fn agents_liquid_assets<P, I>(
    pool: &P,
    index: &I,
    snapshot: &ChainSnapshot,
    fanout_limit: usize,
) -> eyre::Result<U256>
where
    P: PoolReader,
    I: AgentIndex,
{
    let agents = index.fetch_agents().await.wrap_err("agent index")?;
    debug!(agent_count = agents.len(), "summing agent liquid assets");

    let tasks: Vec<_> = agents
        .iter()
        .map(|a| pool.agent_liquid_assets(a.address, snapshot))
        .collect();
    let assets = multiread(tasks, fanout_limit).await?;
    sum(assets, "agent liquid assets")
}

/// Aggregate miner collateral and storage power for one snapshot.
///
/// Three fan-out phases (balances, power, liquid assets), then the
/// adjustment in this exact order:
/// `Σbalances − totalBorrowed + Σliquid`.
pub async fn miner_collaterals<C, P, I>(
    chain: &C,
    pool: &P,
    index: &I,
    snapshot: &ChainSnapshot,
    fanout_limit: usize,
) -> eyre::Result<CollateralAggregate>
where
    C: ChainReader,
    P: PoolReader,
    I: AgentIndex,
{
    let enumeration = registry::all_miners(pool, snapshot, fanout_limit).await?;
    let miners: &[MinerAddress] = &enumeration.miners;

    let balance_tasks: Vec<_> = miners
        .iter()
        .map(|m| chain.actor_balance(m, snapshot))
        .collect();
    let balances = sum(
        multiread(balance_tasks, fanout_limit).await?,
        "miner balances",
    )?;

    let power_tasks: Vec<_> = miners
        .iter()
        .map(|m| async move {
            let power = chain.miner_power(m, snapshot).await?;
            let sectors = chain.miner_sector_count(m, snapshot).await?;
            Ok((power, sectors))
        })
        .collect();
    let mut total_miner_sectors = U256::ZERO;
    let mut total_miner_qap = U256::ZERO;
    let mut total_miner_rbp = U256::ZERO;
    let mut faulty_sectors: u64 = 0;
    for (power, sectors) in multiread(power_tasks, fanout_limit).await? {
        faulty_sectors = faulty_sectors.saturating_add(sectors.faulty);
        total_miner_sectors = total_miner_sectors
            .checked_add(U256::from(sectors.live))
            .ok_or_else(|| PoolscopeError::Conversion("sector sum overflow".into()))?;
        total_miner_qap = total_miner_qap
            .checked_add(power.quality_adj)
            .ok_or_else(|| PoolscopeError::Conversion("QAP sum overflow".into()))?;
        total_miner_rbp = total_miner_rbp
            .checked_add(power.raw_byte)
            .ok_or_else(|| PoolscopeError::Conversion("RBP sum overflow".into()))?;
    }

    let borrowed_fil = pool
        .total_borrowed(snapshot)
        .await
        .wrap_err("pool total borrowed")?;
    let issued_debt = amount::fil_to_atto(&borrowed_fil)?;

    let liquid = agents_liquid_assets(pool, index, snapshot, fanout_limit).await?;

    let balances_signed = to_signed(balances, "miner balances")?;
    let debt_signed = to_signed(issued_debt, "issued debt")?;
    let liquid_signed = to_signed(liquid, "liquid assets")?;
    let total_miner_collaterals = balances_signed
        .checked_sub(debt_signed)
        .and_then(|v| v.checked_add(liquid_signed))
        .ok_or_else(|| PoolscopeError::Conversion("collateral adjustment overflow".into()))?;

    debug!(
        agent_count = enumeration.agent_count,
        miner_count = miners.len(),
        faulty_sectors,
        %balances,
        %total_miner_collaterals,
        "collateral aggregation complete"
    );

    Ok(CollateralAggregate {
        agent_count: enumeration.agent_count,
        miner_count: miners.len() as u64,
        balances,
        total_miner_collaterals,
        total_miner_sectors,
        total_miner_qap,
        total_miner_rbp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::fixtures::{FakeChain, FakeIndex, FakePool};
    use crate::query::{MinerPower, SectorCount};
    use alloy::primitives::Address;
    use rust_decimal::Decimal;

    fn m(s: &str) -> MinerAddress {
        MinerAddress::new(s)
    }

    fn agent(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    /// Two agents, three miners, debt and liquid assets as per the reference
    /// scenario: (100 + 50 + 25) − 30 + (10 + 5) = 160.
    fn scenario() -> (FakeChain, FakePool, FakeIndex) {
        let mut chain = FakeChain::default();
        chain.balances.insert(m("f01000"), U256::from(100_u64));
        chain.balances.insert(m("f02000"), U256::from(50_u64));
        chain.balances.insert(m("f02001"), U256::from(25_u64));

        let mut pool = FakePool::default();
        pool.agents.insert(1, vec![m("f01000")]);
        pool.agents.insert(2, vec![m("f02000"), m("f02001")]);
        // 30 attoFIL of issued debt, expressed as the FIL-denominated decimal
        // the pool SDK reports.
        pool.total_borrowed = Decimal::new(30, 18);
        pool.liquid.insert(agent(1), U256::from(10_u64));
        pool.liquid.insert(agent(2), U256::from(5_u64));

        let index = FakeIndex::with_addresses(&[agent(1), agent(2)]);
        (chain, pool, index)
    }

    #[tokio::test]
    async fn reference_scenario_adds_up_to_160() -> eyre::Result<()> {
        let (chain, pool, index) = scenario();
        let agg =
            miner_collaterals(&chain, &pool, &index, &ChainSnapshot::latest(), 8).await?;

        assert_eq!(agg.agent_count, 2);
        assert_eq!(agg.miner_count, 3);
        assert_eq!(agg.balances, U256::from(175_u64));
        assert_eq!(agg.total_miner_collaterals, I256::try_from(160_i64)?);
        Ok(())
    }

    #[tokio::test]
    async fn debt_above_collateral_goes_negative_unclamped() -> eyre::Result<()> {
        let (chain, mut pool, index) = scenario();
        pool.total_borrowed = Decimal::new(500, 18);

        let agg =
            miner_collaterals(&chain, &pool, &index, &ChainSnapshot::latest(), 8).await?;
        // 175 − 500 + 15 = −310
        assert_eq!(agg.total_miner_collaterals, I256::try_from(-310_i64)?);
        Ok(())
    }

    #[tokio::test]
    async fn power_phase_sums_qap_rbp_and_live_sectors() -> eyre::Result<()> {
        let (mut chain, pool, index) = scenario();
        for (addr, qap, rbp, live) in [
            ("f01000", 10_u64, 20_u64, 3_u64),
            ("f02000", 1, 2, 1),
            ("f02001", 100, 200, 0),
        ] {
            chain.power.insert(
                m(addr),
                MinerPower {
                    raw_byte: U256::from(rbp),
                    quality_adj: U256::from(qap),
                },
            );
            chain.sectors.insert(m(addr), SectorCount { live, faulty: 0 });
        }

        let agg =
            miner_collaterals(&chain, &pool, &index, &ChainSnapshot::latest(), 8).await?;
        assert_eq!(agg.total_miner_qap, U256::from(111_u64));
        assert_eq!(agg.total_miner_rbp, U256::from(222_u64));
        assert_eq!(agg.total_miner_sectors, U256::from(4_u64));
        Ok(())
    }

    #[tokio::test]
    async fn one_failed_miner_read_fails_the_aggregation() {
        let (mut chain, pool, index) = scenario();
        chain.fail_miner = Some(m("f02000"));

        let got = miner_collaterals(&chain, &pool, &index, &ChainSnapshot::latest(), 8).await;
        assert!(got.is_err(), "single miner failure must abort the snapshot");
    }

    #[tokio::test]
    async fn index_failure_fails_the_aggregation() {
        let (chain, pool, mut index) = scenario();
        index.fail = true;

        let got = miner_collaterals(&chain, &pool, &index, &ChainSnapshot::latest(), 8).await;
        assert!(got.is_err(), "liquid-asset phase failure must abort");
    }

    #[tokio::test]
    async fn every_chain_read_observes_the_pinned_tipset() -> eyre::Result<()> {
        let (mut chain, pool, index) = scenario();
        chain.tipsets.insert(42, FakeChain::tipset("bafy-42"));

        let snapshot = crate::query::resolve_snapshot(&chain, Some(42)).await?;
        miner_collaterals(&chain, &pool, &index, &snapshot, 8).await?;

        let seen = chain
            .seen_tipsets
            .lock()
            .map_err(|e| eyre::eyre!("fixture mutex poisoned: {e}"))?
            .clone();
        assert!(!seen.is_empty(), "expected pinned reads");
        assert!(
            seen.iter()
                .all(|t| t.as_ref() == Some(&FakeChain::tipset("bafy-42"))),
            "all reads must share the resolved tipset: {seen:?}"
        );
        Ok(())
    }
}

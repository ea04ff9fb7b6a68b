//! Top-level metric snapshot and pool yield.

use alloy::primitives::{I256, U256};
use eyre::WrapErr as _;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::amount::{self, serialize_i256_dec, serialize_u256_dec};
use crate::collateral::{self, CollateralAggregate};
use crate::errors::PoolscopeError;
use crate::query::{AgentIndex, ChainReader, ChainSnapshot, PoolReader};

/// One aggregation run's result. Every monetary field is an exact attoFIL
/// integer, serialized as a decimal string.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    #[serde(serialize_with = "serialize_u256_dec")]
    pub pool_total_assets: U256,
    #[serde(serialize_with = "serialize_u256_dec")]
    pub pool_total_borrowed: U256,
    #[serde(serialize_with = "serialize_u256_dec")]
    pub pool_total_borrowable_assets: U256,
    #[serde(serialize_with = "serialize_u256_dec")]
    pub pool_exit_reserve: U256,
    pub total_agent_count: u64,
    #[serde(serialize_with = "serialize_i256_dec")]
    pub total_miner_collaterals: I256,
    pub total_miners_count: u64,
    #[serde(rename = "totalMinersSectors", serialize_with = "serialize_u256_dec")]
    pub total_miners_sectors: U256,
    #[serde(rename = "totalMinerQAP", serialize_with = "serialize_u256_dec")]
    pub total_miner_qap: U256,
    #[serde(rename = "totalMinerRBP", serialize_with = "serialize_u256_dec")]
    pub total_miner_rbp: U256,
    #[serde(serialize_with = "serialize_i256_dec")]
    pub total_value_locked: I256,
}

/// Compute the full metric snapshot for one (optionally pinned) chain state.
///
/// `totalValueLocked = poolTotalAssets + totalMinerCollaterals`; borrowed
/// funds are not subtracted.
pub async fn metric_snapshot<C, P, I>(
    chain: &C,
    pool: &P,
    index: &I,
    snapshot: &ChainSnapshot,
    fanout_limit: usize,
) -> eyre::Result<MetricSnapshot>
where
    C: ChainReader,
    P: PoolReader,
    I: AgentIndex,
{
    let assets_fil = pool
        .total_assets(snapshot)
        .await
        .wrap_err("pool total assets")?;
    let pool_total_assets = amount::fil_to_atto(&assets_fil)?;

    let borrowable_fil = pool
        .borrowable_liquidity(snapshot)
        .await
        .wrap_err("pool borrowable liquidity")?;
    let pool_total_borrowable_assets = amount::fil_to_atto(&borrowable_fil)?;

    let pool_exit_reserve = pool
        .exit_reserve(snapshot)
        .await
        .wrap_err("pool exit reserve")?;

    let borrowed_fil = pool
        .total_borrowed(snapshot)
        .await
        .wrap_err("pool total borrowed")?;
    let pool_total_borrowed = amount::fil_to_atto(&borrowed_fil)?;

    let agg: CollateralAggregate =
        collateral::miner_collaterals(chain, pool, index, snapshot, fanout_limit).await?;

    let assets_signed = I256::try_from(pool_total_assets).map_err(|_| {
        PoolscopeError::Conversion(format!("pool assets beyond signed range: {pool_total_assets}"))
    })?;
    let total_value_locked = assets_signed
        .checked_add(agg.total_miner_collaterals)
        .ok_or_else(|| PoolscopeError::Conversion("total value locked overflow".into()))?;

    debug!(
        height = ?snapshot.height,
        pinned = snapshot.is_pinned(),
        raw_balances = %agg.balances,
        %total_value_locked,
        "metric snapshot complete"
    );

    Ok(MetricSnapshot {
        pool_total_assets,
        pool_total_borrowed,
        pool_total_borrowable_assets,
        pool_exit_reserve,
        total_agent_count: agg.agent_count,
        total_miner_collaterals: agg.total_miner_collaterals,
        total_miners_count: agg.miner_count,
        total_miners_sectors: agg.total_miner_sectors,
        total_miner_qap: agg.total_miner_qap,
        total_miner_rbp: agg.total_miner_rbp,
        total_value_locked,
    })
}

/// The pool's yearly yield as a plain fraction (e.g. `0.04325`).
pub async fn pool_apy<P>(pool: &P, snapshot: &ChainSnapshot) -> eyre::Result<Decimal>
where
    P: PoolReader,
{
    let apy_wad = pool.apy(snapshot).await.wrap_err("pool apy")?;
    amount::atto_to_fil(apy_wad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::fixtures::{FakeChain, FakeIndex, FakePool};
    use crate::query::MinerAddress;
    use alloy::primitives::Address;
    use rust_decimal::Decimal;

    fn m(s: &str) -> MinerAddress {
        MinerAddress::new(s)
    }

    fn fixtures() -> (FakeChain, FakePool, FakeIndex) {
        let mut chain = FakeChain::default();
        chain.balances.insert(m("f01000"), U256::from(100_u64));
        chain.balances.insert(m("f02000"), U256::from(50_u64));
        chain.balances.insert(m("f02001"), U256::from(25_u64));

        let mut pool = FakePool::default();
        pool.agents.insert(1, vec![m("f01000")]);
        pool.agents.insert(2, vec![m("f02000"), m("f02001")]);
        pool.total_assets = Decimal::new(1_000, 18);
        pool.total_borrowed = Decimal::new(30, 18);
        pool.borrowable = Decimal::new(700, 18);
        pool.exit_reserve = U256::from(90_u64);
        pool.liquid.insert(Address::repeat_byte(1), U256::from(10_u64));
        pool.liquid.insert(Address::repeat_byte(2), U256::from(5_u64));

        let index =
            FakeIndex::with_addresses(&[Address::repeat_byte(1), Address::repeat_byte(2)]);
        (chain, pool, index)
    }

    #[tokio::test]
    async fn tvl_is_assets_plus_collaterals_exactly() -> eyre::Result<()> {
        let (chain, pool, index) = fixtures();
        let got = metric_snapshot(&chain, &pool, &index, &ChainSnapshot::latest(), 8).await?;

        assert_eq!(got.pool_total_assets, U256::from(1_000_u64));
        assert_eq!(got.pool_total_borrowed, U256::from(30_u64));
        assert_eq!(got.pool_total_borrowable_assets, U256::from(700_u64));
        assert_eq!(got.pool_exit_reserve, U256::from(90_u64));
        assert_eq!(got.total_agent_count, 2);
        assert_eq!(got.total_miners_count, 3);
        assert_eq!(got.total_miner_collaterals, I256::try_from(160_i64)?);
        assert_eq!(
            got.total_value_locked,
            I256::try_from(1_160_i64)?,
            "tvl must equal assets + collaterals with no rounding"
        );
        Ok(())
    }

    #[tokio::test]
    async fn tvl_holds_when_collaterals_are_negative() -> eyre::Result<()> {
        let (chain, mut pool, index) = fixtures();
        pool.total_borrowed = Decimal::new(2_000, 18);

        let got = metric_snapshot(&chain, &pool, &index, &ChainSnapshot::latest(), 8).await?;
        // 175 − 2000 + 15 = −1810; tvl = 1000 − 1810 = −810
        assert_eq!(got.total_miner_collaterals, I256::try_from(-1_810_i64)?);
        assert_eq!(got.total_value_locked, I256::try_from(-810_i64)?);
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_serializes_with_the_wire_field_names() -> eyre::Result<()> {
        let (chain, pool, index) = fixtures();
        let got = metric_snapshot(&chain, &pool, &index, &ChainSnapshot::latest(), 8).await?;

        let v = serde_json::to_value(&got)?;
        assert_eq!(v["poolTotalAssets"], "1000");
        assert_eq!(v["totalMinerCollaterals"], "160");
        assert_eq!(v["totalValueLocked"], "1160");
        assert!(v.get("totalMinerQAP").is_some(), "QAP keeps its acronym");
        assert!(v.get("totalMinerRBP").is_some(), "RBP keeps its acronym");
        Ok(())
    }

    #[tokio::test]
    async fn apy_read_is_a_plain_fraction() -> eyre::Result<()> {
        let (_, mut pool, _) = fixtures();
        pool.apy_wad = U256::from(43_250_000_000_000_000_u64);

        let apy = pool_apy(&pool, &ChainSnapshot::latest()).await?;
        assert_eq!(crate::amount::format_percent(apy)?, "4.325%");
        Ok(())
    }
}

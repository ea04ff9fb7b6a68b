//! Borrowing capacity for a single miner.

use alloy::primitives::{uint, U256};
use eyre::WrapErr as _;
use tracing::debug;

use crate::amount::EPOCHS_IN_DAY;
use crate::errors::PoolscopeError;
use crate::query::{BorrowCredential, ChainReader, ChainSnapshot, MinerAddress, PoolReader};

/// Share of expected daily rewards the pool allows a borrower's projected
/// daily fee to consume (WAD-scaled, 25%).
const MAX_DTI_WAD: U256 = uint!(250_000_000_000_000_000_U256);

/// Days over which vesting funds are prorated into the daily-reward figure.
const VESTING_HORIZON_DAYS: u64 = 180;

/// G-score placeholder submitted with every credential.
const GCRED_PLACEHOLDER: u64 = 100;

/// How the daily-reward figure is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardBasis {
    /// Block rewards only.
    Rewards,
    /// Block rewards plus vesting funds prorated over 180 days.
    RewardsAndVesting,
}

/// Point-in-time borrowing capacity of one miner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowCapacity {
    /// Maximum principal the pool would extend.
    pub max_borrow: U256,
    /// The miner's spendable wallet value.
    pub agent_value: U256,
    pub expected_daily_rewards: U256,
    /// WAD-scaled per-epoch lending rate quoted for the credential.
    pub rate_per_epoch: U256,
}

/// Maximum principal whose projected daily fee stays inside the
/// debt-to-income cap: `edr × MAX_DTI / (rate × EPOCHS_IN_DAY)`.
pub fn max_borrow_from_credential(
    credential: &BorrowCredential,
    rate_per_epoch: U256,
) -> eyre::Result<U256> {
    if rate_per_epoch.is_zero() {
        return Err(
            PoolscopeError::Conversion("zero per-epoch rate; capacity undefined".into()).into(),
        );
    }
    let fee_budget = credential
        .expected_daily_rewards
        .checked_mul(MAX_DTI_WAD)
        .ok_or_else(|| PoolscopeError::Conversion("daily fee budget overflow".into()))?;
    let daily_rate = rate_per_epoch
        .checked_mul(U256::from(EPOCHS_IN_DAY))
        .ok_or_else(|| PoolscopeError::Conversion("daily rate overflow".into()))?;
    Ok(fee_budget / daily_rate)
}

/// Compute one miner's borrowing capacity against the given snapshot.
///
/// Fetch order matches the quote flow: expected daily rewards (optionally
/// enriched with prorated vesting funds), wallet value, then the rate quote
/// for the assembled credential. Any failed fetch fails the whole
/// computation.
pub async fn borrow_capacity<C, P>(
    chain: &C,
    pool: &P,
    miner: &MinerAddress,
    basis: RewardBasis,
    snapshot: &ChainSnapshot,
) -> eyre::Result<BorrowCapacity>
where
    C: ChainReader,
    P: PoolReader,
{
    let mut expected_daily_rewards = chain
        .expected_daily_rewards(miner, snapshot)
        .await
        .wrap_err("expected daily rewards")?;

    if basis == RewardBasis::RewardsAndVesting {
        let locked = chain
            .miner_locked_funds(miner, snapshot)
            .await
            .wrap_err("vesting funds")?;
        let day_vest = locked / U256::from(VESTING_HORIZON_DAYS);
        expected_daily_rewards = expected_daily_rewards
            .checked_add(day_vest)
            .ok_or_else(|| PoolscopeError::Conversion("daily reward overflow".into()))?;
    }

    let agent_value = chain
        .wallet_balance(miner)
        .await
        .wrap_err("wallet balance")?;

    let credential = BorrowCredential {
        agent_value,
        expected_daily_rewards,
        gcred: U256::from(GCRED_PLACEHOLDER),
        ..BorrowCredential::default()
    };

    let rate_per_epoch = pool
        .rate_from_credential(&credential)
        .await
        .wrap_err("pool rate quote")?;
    let max_borrow = max_borrow_from_credential(&credential, rate_per_epoch)?;

    debug!(%miner, %max_borrow, %rate_per_epoch, "borrow capacity computed");

    Ok(BorrowCapacity {
        max_borrow,
        agent_value,
        expected_daily_rewards,
        rate_per_epoch,
    })
}

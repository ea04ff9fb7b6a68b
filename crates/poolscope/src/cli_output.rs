//! Response shaping for the CLI: denomination selection and the JSON
//! shapes each subcommand writes to stdout.

use eyre::Context as _;
use serde::Serialize;
use std::io::Write as _;

use crate::amount;
use crate::borrow::BorrowCapacity;
use crate::collateral::CollateralAggregate;
use crate::query::MinerAddress;
use crate::registry::Enumeration;

/// How monetary amounts are rendered: exact base-unit integers, or
/// human-scaled FIL with three decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denomination {
    Attofil,
    Fil,
}

impl Denomination {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Attofil => "attofil",
            Self::Fil => "fil",
        }
    }
}

fn render_amount(v: alloy::primitives::U256, denom: Denomination) -> eyre::Result<String> {
    match denom {
        Denomination::Attofil => Ok(v.to_string()),
        Denomination::Fil => amount::format_fil_unsigned(v),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinersResponse {
    pub miners: Vec<MinerAddress>,
    pub count: u64,
}

pub fn encode_miners(enumeration: Enumeration) -> MinersResponse {
    let count = enumeration.miners.len() as u64;
    MinersResponse {
        miners: enumeration.miners,
        count,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollateralsResponse {
    pub total_agent_count: u64,
    pub total_miner_collaterals: String,
    pub total_miners_count: u64,
}

pub fn encode_collaterals(agg: &CollateralAggregate) -> CollateralsResponse {
    CollateralsResponse {
        total_agent_count: agg.agent_count,
        total_miner_collaterals: agg.total_miner_collaterals.to_string(),
        total_miners_count: agg.miner_count,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityResponse {
    pub borrow_start: String,
    pub borrow_cap: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_daily_rewards: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equity: Option<String>,
    pub annual_fee_rate: String,
    pub denom: &'static str,
}

/// Shape a capacity result; `detailed` adds the daily-reward and equity
/// fields of the miner-info variant.
pub fn encode_capacity(
    cap: &BorrowCapacity,
    denom: Denomination,
    detailed: bool,
) -> eyre::Result<CapacityResponse> {
    let annual_fee_rate = amount::format_percent(amount::annualize_rate(cap.rate_per_epoch)?)?;
    let borrow_cap = render_amount(cap.agent_value, denom)?;
    Ok(CapacityResponse {
        borrow_start: render_amount(cap.max_borrow, denom)?,
        equity: detailed.then(|| borrow_cap.clone()),
        borrow_cap,
        expected_daily_rewards: if detailed {
            Some(render_amount(cap.expected_daily_rewards, denom)?)
        } else {
            None
        },
        annual_fee_rate,
        denom: denom.as_str(),
    })
}

#[derive(Debug, Serialize)]
pub struct ApyResponse {
    pub apy: String,
}

/// Write one JSON document to stdout. Logs go to stderr, so stdout stays
/// machine-readable.
pub fn print_json<T: Serialize>(value: &T) -> eyre::Result<()> {
    let s = serde_json::to_string(value).context("serialize response")?;
    writeln!(std::io::stdout().lock(), "{s}").context("write response")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use crate::amount::WAD;

    fn capacity() -> BorrowCapacity {
        BorrowCapacity {
            max_borrow: U256::from(2_u64) * WAD,
            agent_value: WAD,
            expected_daily_rewards: WAD / U256::from(2_u64),
            rate_per_epoch: U256::from(47_541_638_338_u64),
        }
    }

    #[test]
    fn attofil_capacity_is_raw_base_units() -> eyre::Result<()> {
        let res = encode_capacity(&capacity(), Denomination::Attofil, false)?;
        assert_eq!(res.borrow_start, "2000000000000000000");
        assert_eq!(res.borrow_cap, "1000000000000000000");
        assert_eq!(res.denom, "attofil");
        assert_eq!(res.expected_daily_rewards, None);
        assert_eq!(res.equity, None);
        assert_eq!(res.annual_fee_rate, "5.001%");
        Ok(())
    }

    #[test]
    fn fil_capacity_is_three_decimal_fil() -> eyre::Result<()> {
        let res = encode_capacity(&capacity(), Denomination::Fil, true)?;
        assert_eq!(res.borrow_start, "2.000");
        assert_eq!(res.borrow_cap, "1.000");
        assert_eq!(res.equity.as_deref(), Some("1.000"));
        assert_eq!(res.expected_daily_rewards.as_deref(), Some("0.500"));
        assert_eq!(res.denom, "fil");
        Ok(())
    }

    #[test]
    fn detailed_fields_stay_off_the_wire_when_absent() -> eyre::Result<()> {
        let res = encode_capacity(&capacity(), Denomination::Attofil, false)?;
        let v = serde_json::to_value(&res)?;
        assert!(v.get("expectedDailyRewards").is_none());
        assert!(v.get("equity").is_none());
        assert!(v.get("borrowStart").is_some());
        Ok(())
    }

    #[test]
    fn collaterals_keep_the_signed_decimal_string() {
        let agg = CollateralAggregate {
            agent_count: 2,
            miner_count: 3,
            balances: U256::from(175_u64),
            total_miner_collaterals: alloy::primitives::I256::MINUS_ONE,
            total_miner_sectors: U256::ZERO,
            total_miner_qap: U256::ZERO,
            total_miner_rbp: U256::ZERO,
        };
        let res = encode_collaterals(&agg);
        assert_eq!(res.total_miner_collaterals, "-1");
        assert_eq!(res.total_agent_count, 2);
        assert_eq!(res.total_miners_count, 3);
    }
}

//! Lotus JSON-RPC client: every `Filecoin.*` read the engine needs.

use alloy::primitives::U256;
use async_trait::async_trait;
use eyre::Context as _;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::amount::EPOCHS_IN_DAY;
use crate::config::Config;
use crate::errors::PoolscopeError;
use crate::query::{
    ChainReader, ChainSnapshot, CidRef, MinerAddress, MinerPower, SectorCount, TipSetKey,
};
use crate::retry::{try_endpoints, RetryPolicy};

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// The reward actor's well-known id (`f02`/`t02`).
const REWARD_ACTOR_ID: u64 = 2;

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct TipSetResponse {
    #[serde(rename = "Cids")]
    cids: Vec<CidRef>,
}

#[derive(Debug, Deserialize)]
struct ActorStateResponse {
    #[serde(rename = "Balance")]
    balance: String,
    #[serde(rename = "State", default)]
    state: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PowerClaim {
    #[serde(rename = "RawBytePower")]
    raw_byte_power: String,
    #[serde(rename = "QualityAdjPower")]
    quality_adj_power: String,
}

#[derive(Debug, Deserialize)]
struct MinerPowerResponse {
    #[serde(rename = "MinerPower")]
    miner_power: PowerClaim,
    #[serde(rename = "TotalPower")]
    total_power: PowerClaim,
}

#[derive(Debug, Deserialize)]
struct SectorCountResponse {
    #[serde(rename = "Live")]
    live: u64,
    #[serde(rename = "Faulty")]
    faulty: u64,
}

fn parse_big(s: &str, what: &'static str) -> eyre::Result<U256> {
    s.trim()
        .parse()
        .map_err(|e| PoolscopeError::Conversion(format!("{what} {s:?}: {e}")).into())
}

/// The tipset-key parameter shared by snapshot-parameterized calls. An empty
/// key means "current head" to the node.
fn tipset_param(snapshot: &ChainSnapshot) -> eyre::Result<serde_json::Value> {
    match &snapshot.tipset {
        Some(key) => serde_json::to_value(key).context("encode tipset key"),
        None => Ok(serde_json::Value::Array(Vec::new())),
    }
}

#[derive(Debug, Clone)]
pub struct LotusClient {
    endpoints: Vec<String>,
    client: reqwest::Client,
    policy: RetryPolicy,
    address_prefix: &'static str,
}

impl LotusClient {
    pub fn new(cfg: &Config) -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_RPC_TIMEOUT)
            .connect_timeout(DEFAULT_RPC_CONNECT_TIMEOUT)
            .build()
            .context("build rpc http client")?;

        let mut endpoints = Vec::with_capacity(1 + cfg.rpc.fallback_rpc_urls.len());
        for url in std::iter::once(&cfg.rpc.rpc_url).chain(&cfg.rpc.fallback_rpc_urls) {
            let t = url.trim();
            if t.is_empty() || endpoints.iter().any(|e| e == t) {
                continue;
            }
            endpoints.push(t.to_owned());
        }

        Ok(Self {
            endpoints,
            client,
            policy: RetryPolicy::default(),
            address_prefix: cfg.network.address_prefix(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: serde_json::Value,
    ) -> eyre::Result<T> {
        try_endpoints(
            &self.endpoints,
            &self.policy,
            |url| {
                let url = url.clone();
                let params = params.clone();
                async move {
                    let body = serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": 1,
                        "method": method,
                        "params": params,
                    });
                    let envelope: RpcEnvelope<T> = self
                        .client
                        .post(&url)
                        .json(&body)
                        .send()
                        .await
                        .context("rpc send")?
                        .error_for_status()
                        .context("rpc status")?
                        .json()
                        .await
                        .context("rpc decode")?;

                    if let Some(err) = envelope.error {
                        return Err(PoolscopeError::UpstreamQuery(format!(
                            "{method}: {} (code {})",
                            err.message, err.code
                        ))
                        .into());
                    }
                    envelope.result.ok_or_else(|| {
                        PoolscopeError::UpstreamQuery(format!("{method}: empty result")).into()
                    })
                }
            },
            method,
        )
        .await
    }

    async fn read_state(
        &self,
        addr: &MinerAddress,
        snapshot: &ChainSnapshot,
    ) -> eyre::Result<ActorStateResponse> {
        let tsk = tipset_param(snapshot)?;
        self.call(
            "Filecoin.StateReadState",
            serde_json::json!([addr.as_str(), tsk]),
        )
        .await
    }

    async fn state_miner_power(
        &self,
        miner: &MinerAddress,
        snapshot: &ChainSnapshot,
    ) -> eyre::Result<MinerPowerResponse> {
        let tsk = tipset_param(snapshot)?;
        self.call(
            "Filecoin.StateMinerPower",
            serde_json::json!([miner.as_str(), tsk]),
        )
        .await
    }
}

#[async_trait]
impl ChainReader for LotusClient {
    async fn tipset_at_height(&self, height: u64) -> eyre::Result<TipSetKey> {
        let ts: TipSetResponse = self
            .call(
                "Filecoin.ChainGetTipSetByHeight",
                serde_json::json!([height, []]),
            )
            .await?;
        Ok(TipSetKey(ts.cids))
    }

    async fn actor_balance(
        &self,
        miner: &MinerAddress,
        snapshot: &ChainSnapshot,
    ) -> eyre::Result<U256> {
        let state = self.read_state(miner, snapshot).await?;
        parse_big(&state.balance, "actor balance")
    }

    async fn miner_power(
        &self,
        miner: &MinerAddress,
        snapshot: &ChainSnapshot,
    ) -> eyre::Result<MinerPower> {
        let power = self.state_miner_power(miner, snapshot).await?;
        Ok(MinerPower {
            raw_byte: parse_big(&power.miner_power.raw_byte_power, "raw byte power")?,
            quality_adj: parse_big(&power.miner_power.quality_adj_power, "quality adj power")?,
        })
    }

    async fn miner_sector_count(
        &self,
        miner: &MinerAddress,
        snapshot: &ChainSnapshot,
    ) -> eyre::Result<SectorCount> {
        let tsk = tipset_param(snapshot)?;
        let counts: SectorCountResponse = self
            .call(
                "Filecoin.StateMinerSectorCount",
                serde_json::json!([miner.as_str(), tsk]),
            )
            .await?;
        Ok(SectorCount {
            live: counts.live,
            faulty: counts.faulty,
        })
    }

    async fn wallet_balance(&self, addr: &MinerAddress) -> eyre::Result<U256> {
        let bal: String = self
            .call(
                "Filecoin.WalletBalance",
                serde_json::json!([addr.as_str()]),
            )
            .await?;
        parse_big(&bal, "wallet balance")
    }

    async fn miner_locked_funds(
        &self,
        miner: &MinerAddress,
        snapshot: &ChainSnapshot,
    ) -> eyre::Result<U256> {
        let state = self.read_state(miner, snapshot).await?;
        match state.state.get("LockedFunds").and_then(|v| v.as_str()) {
            Some(s) => parse_big(s, "locked funds"),
            None => Ok(U256::ZERO),
        }
    }

    /// Estimate of the miner's expected daily block rewards: the network's
    /// per-epoch reward prorated by the miner's share of quality-adjusted
    /// power, over a day of epochs.
    async fn expected_daily_rewards(
        &self,
        miner: &MinerAddress,
        snapshot: &ChainSnapshot,
    ) -> eyre::Result<U256> {
        let claims = self.state_miner_power(miner, snapshot).await?;
        let miner_qap = parse_big(&claims.miner_power.quality_adj_power, "miner qap")?;
        if miner_qap.is_zero() {
            return Ok(U256::ZERO);
        }
        let total_qap = parse_big(&claims.total_power.quality_adj_power, "network qap")?;
        if total_qap.is_zero() {
            return Ok(U256::ZERO);
        }

        let reward_actor = MinerAddress::from_actor_id(self.address_prefix, REWARD_ACTOR_ID);
        let reward_state = self.read_state(&reward_actor, snapshot).await?;
        let this_epoch_reward = reward_state
            .state
            .get("ThisEpochReward")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                PoolscopeError::UpstreamQuery("reward actor state missing ThisEpochReward".into())
            })?;
        let epoch_reward = parse_big(this_epoch_reward, "epoch reward")?;

        epoch_reward
            .checked_mul(U256::from(EPOCHS_IN_DAY))
            .and_then(|v| v.checked_mul(miner_qap))
            .map(|v| v / total_qap)
            .ok_or_else(|| PoolscopeError::Conversion("daily reward overflow".into()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tipset_param_encodes_pin_or_head() -> eyre::Result<()> {
        let unpinned = tipset_param(&ChainSnapshot::latest())?;
        assert_eq!(unpinned, serde_json::json!([]));

        let pinned = ChainSnapshot {
            height: Some(7),
            tipset: Some(TipSetKey(vec![CidRef {
                cid: "bafy-7".to_owned(),
            }])),
        };
        assert_eq!(tipset_param(&pinned)?, serde_json::json!([{"/": "bafy-7"}]));
        Ok(())
    }

    #[test]
    fn attofil_strings_parse_exactly() -> eyre::Result<()> {
        assert_eq!(
            parse_big("123456789000000000000", "balance")?,
            U256::from(123_456_789_u64) * U256::from(1_000_000_000_000_u64)
        );
        assert!(parse_big("12.5", "balance").is_err(), "no fractions on the wire");
        Ok(())
    }

    #[test]
    fn reward_actor_address_follows_the_network_prefix() {
        assert_eq!(
            MinerAddress::from_actor_id("f", REWARD_ACTOR_ID).as_str(),
            "f02"
        );
        assert_eq!(
            MinerAddress::from_actor_id("t", REWARD_ACTOR_ID).as_str(),
            "t02"
        );
    }
}

//! Enumeration of every miner pledged to the protocol, via the agent
//! registry.

use eyre::WrapErr as _;
use tracing::debug;

use crate::fanout::multiread;
use crate::query::{ChainSnapshot, MinerAddress, PoolReader};

/// The full miner set behind one snapshot, with the agent count that sized
/// the enumeration.
#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    pub agent_count: u64,
    pub miners: Vec<MinerAddress>,
}

/// Walk the agent registry and flatten every agent's miner list.
///
/// Agent registry ids are 1-based and gap-free, so a count of N maps to ids
/// `1..=N`. Per-agent ordering is preserved; the protocol never assigns one
/// miner to two agents, so no dedup is applied.
pub async fn all_miners<P>(
    pool: &P,
    snapshot: &ChainSnapshot,
    fanout_limit: usize,
) -> eyre::Result<Enumeration>
where
    P: PoolReader,
{
    let agent_count = pool
        .agent_count(snapshot)
        .await
        .wrap_err("agent count")?;
    if agent_count == 0 {
        return Ok(Enumeration::default());
    }

    debug!(agent_count, "enumerating agent miner lists");
    let tasks: Vec<_> = (1..=agent_count)
        .map(|id| pool.agent_miners(id, snapshot))
        .collect();
    let per_agent = multiread(tasks, fanout_limit).await?;

    let miners: Vec<MinerAddress> = per_agent.into_iter().flatten().collect();
    debug!(miner_count = miners.len(), "miner enumeration complete");
    Ok(Enumeration {
        agent_count,
        miners,
    })
}

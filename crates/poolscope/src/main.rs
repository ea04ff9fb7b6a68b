#![recursion_limit = "256"]
#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Parser, Subcommand, ValueEnum};
use eyre::Context as _;
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

mod amount;
mod borrow;
mod chains;
mod cli_output;
mod collateral;
mod config;
mod errors;
mod fanout;
mod metrics;
mod query;
mod registry;
mod retry;

use chains::agent_index::AgentIndexClient;
use chains::fevm::PoolContracts;
use chains::lotus::LotusClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliNetwork {
    Mainnet,
    Calibnet,
    Localnet,
}

impl From<CliNetwork> for config::NetworkMode {
    fn from(v: CliNetwork) -> Self {
        match v {
            CliNetwork::Mainnet => Self::Mainnet,
            CliNetwork::Calibnet => Self::Calibnet,
            CliNetwork::Localnet => Self::Localnet,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliDenom {
    Attofil,
    Fil,
}

impl From<CliDenom> for cli_output::Denomination {
    fn from(v: CliDenom) -> Self {
        match v {
            CliDenom::Attofil => Self::Attofil,
            CliDenom::Fil => Self::Fil,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "poolscope", version)]
struct Cli {
    /// Network the queries run against.
    #[arg(long, value_enum, default_value_t = CliNetwork::Mainnet)]
    network: CliNetwork,

    /// Select the network by chain id instead (314, 314159, 31415926).
    #[arg(long, conflicts_with = "network")]
    chain_id: Option<u64>,

    /// Optional TOML file overriding the network defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the node RPC endpoint.
    #[arg(long)]
    rpc_url: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Full metric snapshot: pool scalars, collateral aggregate, TVL.
    Metrics {
        /// Pin every read to this block height (default: chain head).
        #[arg(long)]
        block_number: Option<u64>,
    },

    /// Collateral summary: agent count, miner count, adjusted total.
    Collaterals {
        #[arg(long)]
        block_number: Option<u64>,
    },

    /// Every miner pledged in the protocol.
    Miners {
        #[arg(long)]
        block_number: Option<u64>,
    },

    /// Borrow capacity for one miner, with vesting-enriched daily rewards.
    MinerInfo {
        /// Miner actor address (e.g. f01234).
        #[arg(long)]
        miner: String,

        #[arg(long, value_enum, default_value_t = CliDenom::Attofil)]
        denom: CliDenom,
    },

    /// Plain borrow capacity quote for one miner.
    MaxBorrow {
        /// Miner actor address (e.g. f01234).
        #[arg(long)]
        miner: String,

        #[arg(long, value_enum, default_value_t = CliDenom::Attofil)]
        denom: CliDenom,
    },

    /// The pool's yearly yield as a percentage.
    Apy {
        #[arg(long)]
        block_number: Option<u64>,
    },

    /// Print the resolved configuration.
    Config,
}

fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    tracing_subscriber::registry().with(stderr_layer).init();
}

fn clients(
    cfg: &config::Config,
) -> eyre::Result<(LotusClient, PoolContracts, AgentIndexClient)> {
    let chain = LotusClient::new(cfg).context("chain client")?;
    let pool = PoolContracts::new(cfg).context("pool contract client")?;
    let index = AgentIndexClient::new(&cfg.http).context("agent index client")?;
    Ok((chain, pool, index))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging();

    let network = match cli.chain_id {
        Some(id) => config::NetworkMode::from_chain_id(id)?,
        None => cli.network.into(),
    };
    let mut cfg = config::Config::load(network, cli.config.as_deref())?;
    if let Some(url) = cli.rpc_url {
        cfg.rpc.rpc_url = url;
    }
    tracing::debug!(
        network = ?cfg.network,
        chain_id = cfg.network.chain_id(),
        "configuration resolved"
    );

    match cli.cmd {
        Command::Metrics { block_number } => {
            let (chain, pool, index) = clients(&cfg)?;
            let snapshot = query::resolve_snapshot(&chain, block_number).await?;
            let snap =
                metrics::metric_snapshot(&chain, &pool, &index, &snapshot, cfg.fanout_limit)
                    .await
                    .context("metric snapshot failed")?;
            cli_output::print_json(&snap)
        }
        Command::Collaterals { block_number } => {
            let (chain, pool, index) = clients(&cfg)?;
            let snapshot = query::resolve_snapshot(&chain, block_number).await?;
            let agg = collateral::miner_collaterals(
                &chain,
                &pool,
                &index,
                &snapshot,
                cfg.fanout_limit,
            )
            .await
            .context("collateral aggregation failed")?;
            cli_output::print_json(&cli_output::encode_collaterals(&agg))
        }
        Command::Miners { block_number } => {
            let (chain, pool, _) = clients(&cfg)?;
            let snapshot = query::resolve_snapshot(&chain, block_number).await?;
            let enumeration = registry::all_miners(&pool, &snapshot, cfg.fanout_limit)
                .await
                .context("miner enumeration failed")?;
            cli_output::print_json(&cli_output::encode_miners(enumeration))
        }
        Command::MinerInfo { miner, denom } => {
            let (chain, pool, _) = clients(&cfg)?;
            let miner = query::MinerAddress::parse(&miner)?;
            let snapshot = query::resolve_snapshot(&chain, None).await?;
            let cap = borrow::borrow_capacity(
                &chain,
                &pool,
                &miner,
                borrow::RewardBasis::RewardsAndVesting,
                &snapshot,
            )
            .await
            .context("miner info failed")?;
            cli_output::print_json(&cli_output::encode_capacity(&cap, denom.into(), true)?)
        }
        Command::MaxBorrow { miner, denom } => {
            let (chain, pool, _) = clients(&cfg)?;
            let miner = query::MinerAddress::parse(&miner)?;
            let snapshot = query::resolve_snapshot(&chain, None).await?;
            let cap = borrow::borrow_capacity(
                &chain,
                &pool,
                &miner,
                borrow::RewardBasis::Rewards,
                &snapshot,
            )
            .await
            .context("max borrow failed")?;
            cli_output::print_json(&cli_output::encode_capacity(&cap, denom.into(), false)?)
        }
        Command::Apy { block_number } => {
            let (chain, pool, _) = clients(&cfg)?;
            let snapshot = query::resolve_snapshot(&chain, block_number).await?;
            let apy = metrics::pool_apy(&pool, &snapshot)
                .await
                .context("apy read failed")?;
            cli_output::print_json(&cli_output::ApyResponse {
                apy: amount::format_percent(apy)?,
            })
        }
        Command::Config => cli_output::print_json(&cfg),
    }
}

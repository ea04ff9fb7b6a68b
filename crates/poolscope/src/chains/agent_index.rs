//! Client for the external event index that lists registered agents.

use async_trait::async_trait;
use eyre::Context as _;
use reqwest::Client;
use std::time::Duration;

use crate::config::HttpConfig;
use crate::query::{AgentIndex, AgentRecord};

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(20);

fn is_loopback_http(url: &str) -> bool {
    fn host_prefix_ok(s: &str, prefix: &str) -> bool {
        if !s.starts_with(prefix) {
            return false;
        }
        matches!(s.as_bytes().get(prefix.len()), None | Some(b':' | b'/'))
    }
    let u = url.trim();
    host_prefix_ok(u, "http://127.0.0.1")
        || host_prefix_ok(u, "http://localhost")
        || host_prefix_ok(u, "http://[::1]")
}

#[derive(Debug, Clone)]
pub struct AgentIndexClient {
    base_url: String,
    client: Client,
}

impl AgentIndexClient {
    pub fn new(cfg: &HttpConfig) -> eyre::Result<Self> {
        let base = cfg.agent_index_base_url.trim();
        if !base.starts_with("https://") && !is_loopback_http(base) {
            eyre::bail!("agent_index_base_url must use https (or loopback): {base}");
        }

        let client = Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .context("build index http client")?;
        Ok(Self {
            base_url: base.trim_end_matches('/').to_owned(),
            client,
        })
    }
}

#[async_trait]
impl AgentIndex for AgentIndexClient {
    async fn fetch_agents(&self) -> eyre::Result<Vec<AgentRecord>> {
        let url = format!("{}/agent/list", self.base_url);
        self.client
            .get(&url)
            .send()
            .await
            .context("agent list request")?
            .error_for_status()
            .context("agent list status")?
            .json()
            .await
            .context("agent list json")
    }
}

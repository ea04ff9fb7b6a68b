//! Endpoint fallback for the RPC clients.
//!
//! Retry lives here and only here: the aggregation engine fails fast on the
//! first sub-query error, so any resilience has to come from the client
//! trying its configured endpoints before giving up.

use eyre::WrapErr as _;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Full rounds; each round tries every endpoint once.
    pub rounds: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random jitter (`0..=jitter_max_ms`) added to each inter-round sleep.
    pub jitter_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rounds: 3,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(3),
            jitter_max_ms: 200,
        }
    }
}

impl RetryPolicy {
    fn delay_after_round(&self, round: u32) -> Duration {
        let doubled = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(round.min(16)));
        let capped = doubled.min(self.max_delay);
        let jitter = if self.jitter_max_ms == 0 {
            0
        } else {
            rand::random::<u64>() % (self.jitter_max_ms + 1)
        };
        capped.saturating_add(Duration::from_millis(jitter))
    }
}

/// Run `op` against each endpoint in order until one succeeds, for up to
/// `policy.rounds` rounds, sleeping with capped exponential backoff between
/// rounds. The last failure is returned when everything is exhausted.
pub async fn try_endpoints<E, T, Fut>(
    endpoints: &[E],
    policy: &RetryPolicy,
    mut op: impl FnMut(&E) -> Fut,
    label: &'static str,
) -> eyre::Result<T>
where
    Fut: Future<Output = eyre::Result<T>>,
{
    if endpoints.is_empty() {
        eyre::bail!("no endpoints configured ({label})");
    }

    let rounds = policy.rounds.max(1);
    let mut last_err: Option<eyre::Report> = None;

    for round in 0..rounds {
        for (i, endpoint) in endpoints.iter().enumerate() {
            match op(endpoint).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    debug!(label, endpoint = i, round, error = %format!("{e:#}"), "attempt failed");
                    last_err = Some(e);
                }
            }
        }
        if round + 1 < rounds {
            tokio::time::sleep(policy.delay_after_round(round)).await;
        }
    }

    Err(last_err.unwrap_or_else(|| eyre::eyre!("no attempts ran"))).wrap_err(label)
}

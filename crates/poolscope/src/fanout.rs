//! Ordered, bounded, fail-fast fan-out over independent read-only queries.

use eyre::WrapErr as _;
use futures::stream::{self, TryStreamExt as _};
use std::future::Future;

/// Run `tasks` concurrently, at most `limit` in flight, and collect their
/// results **in submission order** (the i-th result always belongs to the
/// i-th task, regardless of completion order).
///
/// The first failure to complete aborts the whole batch: outstanding
/// futures are dropped and no partial results are surfaced. Dropping the
/// returned future cancels every in-flight task, so an aggregation bound to
/// a timeout or a cancelled request unwinds promptly.
///
/// Retries are not performed here; endpoint fallback lives in the RPC
/// clients.
pub async fn multiread<T, Fut>(tasks: Vec<Fut>, limit: usize) -> eyre::Result<Vec<T>>
where
    Fut: Future<Output = eyre::Result<T>>,
{
    if tasks.is_empty() {
        return Ok(Vec::new());
    }

    let mut slots: Vec<Option<T>> = Vec::new();
    slots.resize_with(tasks.len(), || None);

    // Tag each task with its submission index so completion order doesn't
    // matter, then let the unordered buffer surface the first error as soon
    // as it happens.
    let indexed = tasks
        .into_iter()
        .enumerate()
        .map(|(i, task)| async move { task.await.map(|v| (i, v)) });

    let mut in_flight = stream::iter(indexed.map(Ok)).try_buffer_unordered(limit.max(1));
    while let Some((i, v)) = in_flight.try_next().await.wrap_err("fan-out aborted")? {
        if let Some(slot) = slots.get_mut(i) {
            *slot = Some(v);
        }
    }

    slots
        .into_iter()
        .map(|s| s.ok_or_else(|| eyre::eyre!("fan-out lost a result slot")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn results_keep_submission_order_under_reversed_latency() -> eyre::Result<()> {
        // Later tasks finish first; output order must not care.
        let tasks: Vec<_> = (0_u64..8)
            .map(|i| async move {
                sleep(Duration::from_millis((8 - i) * 10)).await;
                Ok(i)
            })
            .collect();

        let got = multiread(tasks, 8).await?;
        assert_eq!(got, (0_u64..8).collect::<Vec<_>>());
        Ok(())
    }

    #[tokio::test]
    async fn empty_batch_succeeds() -> eyre::Result<()> {
        let tasks: Vec<std::future::Ready<eyre::Result<u64>>> = Vec::new();
        let got = multiread(tasks, 4).await?;
        assert!(got.is_empty(), "expected no results");
        Ok(())
    }

    #[tokio::test]
    async fn single_failure_fails_the_whole_batch() -> eyre::Result<()> {
        let tasks: Vec<_> = (0_u64..5)
            .map(|i| async move {
                if i == 2 {
                    eyre::bail!("miner query exploded")
                }
                Ok(i)
            })
            .collect();

        let got = multiread(tasks, 5).await;
        let Err(err) = got else {
            eyre::bail!("batch with a failing task must not succeed")
        };
        assert!(
            format!("{err:#}").contains("miner query exploded"),
            "error must carry the underlying cause: {err:#}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn failure_aborts_without_waiting_for_slow_tasks() -> eyre::Result<()> {
        enum Step {
            Hang,
            Fail,
        }
        // The hanging task is submitted first; the later failure must still
        // surface without waiting for it.
        let tasks: Vec<_> = [Step::Hang, Step::Fail]
            .into_iter()
            .map(|step| async move {
                match step {
                    Step::Fail => eyre::bail!("fast failure"),
                    Step::Hang => {
                        futures::future::pending::<()>().await;
                        Ok(())
                    }
                }
            })
            .collect();

        let res = tokio::time::timeout(Duration::from_secs(5), multiread(tasks, 2)).await;
        match res {
            Ok(inner) => assert!(inner.is_err(), "expected the fast failure to surface"),
            Err(elapsed) => return Err(eyre::eyre!("fan-out hung on a dead task: {elapsed}")),
        }
        Ok(())
    }

    #[tokio::test]
    async fn cancelling_the_batch_returns_promptly() {
        let tasks: Vec<_> = (0..3)
            .map(|_| async {
                futures::future::pending::<()>().await;
                Ok(())
            })
            .collect();

        let res = tokio::time::timeout(Duration::from_millis(200), multiread(tasks, 3)).await;
        assert!(res.is_err(), "timeout must cancel the whole fan-out");
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_the_ceiling() -> eyre::Result<()> {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let high_water = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let in_flight = Arc::clone(&in_flight);
                let high_water = Arc::clone(&high_water);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    high_water.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                }
            })
            .collect();

        let got = multiread(tasks, 4).await?;
        assert_eq!(got.len(), 20);
        assert!(
            high_water.load(Ordering::SeqCst) <= 4,
            "ceiling breached: {} tasks in flight",
            high_water.load(Ordering::SeqCst)
        );
        Ok(())
    }
}

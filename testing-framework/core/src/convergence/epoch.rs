use std::time::Duration;

use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info};

use super::{ConditionError, RetryPolicy, Unmet, await_condition};
use crate::ledger::LedgerClient;

/// Reads the current epoch on `shard`, retrying failed queries.
pub async fn capture_epoch(
    ledger: &dyn LedgerClient,
    shard: u32,
    policy: RetryPolicy,
) -> Result<u64, Unmet<u64>> {
    await_condition(
        format!("current epoch on shard {shard} readable"),
        policy,
        || ledger.current_epoch(shard),
        |_| true,
    )
    .await
}

/// Polls every `interval` until the epoch on `shard` is strictly greater than
/// `baseline`.
///
/// Query failures are retried without limit. With `ceiling == None` the wait is
/// unbounded; otherwise it fails once `ceiling` has elapsed.
pub async fn await_epoch_after(
    ledger: &dyn LedgerClient,
    shard: u32,
    baseline: u64,
    interval: Duration,
    ceiling: Option<Duration>,
) -> Result<u64, Unmet<u64>> {
    let started = Instant::now();
    let mut last = None;

    let poll = async {
        loop {
            match ledger.current_epoch(shard).await {
                Ok(epoch) if epoch > baseline => return epoch,
                Ok(epoch) => {
                    debug!(shard, epoch, baseline, "waiting for next epoch");
                    last = Some(epoch);
                }
                Err(err) => debug!(shard, %err, "epoch query failed"),
            }
            if !interval.is_zero() {
                sleep(interval).await;
            } else {
                tokio::task::yield_now().await;
            }
        }
    };

    let reached = match ceiling {
        None => Ok::<_, tokio::time::error::Elapsed>(poll.await),
        Some(limit) => timeout(limit, poll).await,
    };

    match reached {
        Ok(epoch) => {
            info!(shard, baseline, epoch, waited = ?started.elapsed(), "epoch advanced");
            Ok(epoch)
        }
        Err(_) => Err(Unmet {
            error: ConditionError::TimedOut {
                expectation: format!("epoch on shard {shard} greater than {baseline}"),
                waited: started.elapsed(),
                observed: last.map(|epoch| epoch.to_string()),
            },
            last,
        }),
    }
}

//! Periodic re-admission of unhealthy resources
//!
//! A resource that fails its cap probe sits in `Unhealthy` with a zero usage
//! count, so the cap path alone would never look at it again. This task probes
//! those resources on an interval and returns the healthy ones to rotation.
//! It also settles cap probes abandoned by a dropped `acquire`. Disabled
//! resources are never probed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::pool::RotatingPool;

/// Spawn a background task that re-probes `Unhealthy` resources every `interval`.
///
/// Returns a `JoinHandle`; abort it when the run ends.
pub fn spawn_recheck_task<P>(
    pool: Arc<RotatingPool<P>>,
    interval: Duration,
) -> tokio::task::JoinHandle<()>
where
    P: Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; nothing has been deactivated yet
        ticker.tick().await;

        loop {
            ticker.tick().await;
            recheck_cycle(&pool, interval).await;
        }
    })
}

/// Run one re-check cycle. Returns how many resources were re-admitted.
///
/// A `Probing` record counts as a candidate once its probe has been in flight
/// for `stale_after`. Probes run without the pool lock held; `readmit`
/// re-validates the status so a resource disabled mid-probe stays disabled.
pub(crate) async fn recheck_cycle<P>(pool: &RotatingPool<P>, stale_after: Duration) -> usize
where
    P: Send + Sync + 'static,
{
    let candidates = pool.unhealthy(stale_after).await;
    if candidates.is_empty() {
        return 0;
    }

    debug!(pool = pool.name(), candidates = candidates.len(), "re-checking unhealthy resources");

    let mut readmitted = 0;
    for (id, payload) in candidates {
        if pool.probe().check(&payload).await && pool.readmit(id).await {
            readmitted += 1;
        }
    }

    if readmitted > 0 {
        info!(pool = pool.name(), readmitted, "re-check cycle complete");
    }
    readmitted
}

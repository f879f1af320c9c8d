//! Worker loop
//!
//! Claim, run, report, repeat. The shutdown token is only observed between
//! stages, never during one.

use super::{Claim, QueueInner};
use std::sync::Arc;
use tracing::debug;

pub(super) async fn run(inner: Arc<QueueInner>, worker_id: usize) {
    debug!(worker_id, "Queue worker started");

    loop {
        if inner.shutdown.is_cancelled() {
            break;
        }

        // Register for wakeups before looking, so an enqueue between the
        // claim and the wait is not missed
        let notified = inner.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match inner.claim().await {
            Claim::Task(task, group) => inner.execute(task, group).await,
            Claim::Wait(Some(gate)) => {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = &mut notified => {},
                    _ = tokio::time::sleep_until(gate) => {},
                }
            },
            Claim::Wait(None) => {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = &mut notified => {},
                }
            },
        }
    }

    debug!(worker_id, "Queue worker stopped");
}

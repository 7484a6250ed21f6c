//! Background mining schedule: a single long-lived task that runs one pass
//! per interval tick, plus any pass requested through the miner's trigger.
//! The miner itself serializes passes; a trigger landing mid-pass is
//! coalesced into the next loop iteration.

use std::sync::Arc;
use std::time::Duration;

use clai_core::miner::Miner;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub fn spawn(miner: Arc<Miner>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    let interval_ms = miner.config().mine_interval_ms.max(1_000);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; that initial pass warms the
        // pattern table from whatever history already exists.
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
                _ = miner.trigger_notified().notified() => {}
            }
            miner.take_pending();
            run_blocking_pass(&miner).await;
            // A trigger that arrived while the pass ran gets one more pass.
            if miner.take_pending() {
                run_blocking_pass(&miner).await;
            }
        }
    })
}

async fn run_blocking_pass(miner: &Arc<Miner>) {
    let miner = Arc::clone(miner);
    let joined = tokio::task::spawn_blocking(move || miner.run_pass(clai_core::now_ms())).await;
    match joined {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!(error = %e, "mining pass failed"),
        Err(e) => warn!(error = %e, "mining task panicked"),
    }
}

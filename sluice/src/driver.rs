use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

use sluice_core::{Engine, ReadyPacket};

/// Warn about timer drift at most once per this many catch-up ticks.
const DRIFT_WARN_EVERY: u64 = 1000;

/// Tick loop: advance the engine at the configured rate and forward shaped
/// packets in per-tick batches.
///
/// Wall-clock drift is absorbed by the engine's tick clock: when the timer
/// fires late, the overdue ticks are run back to back under one lock
/// acquisition. The lock is released before the batch is sent.
pub(crate) async fn run(
    engine: Arc<Mutex<Engine>>,
    interval: Duration,
    tx: mpsc::Sender<Vec<ReadyPacket>>,
) {
    let mut clock = sluice_common::TickClock::new(interval);
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut warned_at = 0;
    loop {
        timer.tick().await;
        if tx.is_closed() {
            debug!("shaped-packet receiver dropped, stopping tick driver");
            return;
        }
        let due = clock.due(Instant::now().into_std());
        if due == 0 {
            continue;
        }
        if due > 1 && clock.adjustments() >= warned_at + DRIFT_WARN_EVERY {
            warned_at = clock.adjustments();
            warn!(
                behind = due - 1,
                total_adjustments = clock.adjustments(),
                "tick timer drifted, catching up"
            );
        }

        let mut batch = Vec::new();
        {
            let mut engine = engine.lock();
            for _ in 0..due {
                let out = engine.tick();
                if !out.is_empty() {
                    batch.extend(out);
                }
            }
        }

        if batch.is_empty() {
            continue;
        }
        if tx.send(batch).await.is_err() {
            debug!("shaped-packet receiver dropped, stopping tick driver");
            return;
        }
    }
}

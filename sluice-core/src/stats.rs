use sluice_common::{FiveTuple, Tick};

use crate::error::DropReason;

/// Engine-wide counters.
///
/// Plain integers: the engine lives behind one lock, so every mutation is
/// already serialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Ticks processed.
    pub ticks: u64,
    /// Packets accepted into a queue.
    pub enqueued: u64,
    /// Packets delivered after shaping.
    pub delivered: u64,
    /// Packets refused because the target pipe or flowset did not exist.
    pub no_target: u64,
    /// Packets lost to the configured random loss rate.
    pub random_loss: u64,
    /// Packets refused by a full queue.
    pub queue_full: u64,
    /// Packets dropped early by RED.
    pub red: u64,
    /// Packets discarded by pipe/flowset deletion or a flush.
    pub purged: u64,
}

impl EngineStats {
    pub(crate) fn record_drop(&mut self, reason: DropReason) {
        match reason {
            DropReason::NoSuchTarget => self.no_target += 1,
            DropReason::RandomLoss => self.random_loss += 1,
            DropReason::QueueFull => self.queue_full += 1,
            DropReason::Red => self.red += 1,
        }
    }

    /// Total packets dropped for any reason.
    pub fn dropped(&self) -> u64 {
        self.no_target + self.random_loss + self.queue_full + self.red + self.purged
    }
}

/// Point-in-time view of one flow queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowQueueSnapshot {
    /// Masked flow identity (all-zero for the shared overflow queue).
    pub id: FiveTuple,
    /// Whether this is the shared overflow queue.
    pub shared: bool,
    pub len: usize,
    pub len_bytes: u64,
    /// Bandwidth credit in bits (fixed-rate path only).
    pub credit: i64,
    /// Whether the flow currently holds scheduler state.
    pub scheduled: bool,
    pub tot_pkts: u64,
    pub tot_bytes: u64,
    pub drops: u64,
}

/// Point-in-time view of one flowset (or a pipe's default set).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSetSnapshot {
    /// Flowset id; `None` for a pipe's default set.
    pub id: Option<u32>,
    pub weight: u64,
    /// Flows currently backlogged on the WF2Q+ path.
    pub backlogged: u64,
    /// Queues ordered by total traffic, busiest first.
    pub queues: Vec<FlowQueueSnapshot>,
}

/// Point-in-time view of one pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeSnapshot {
    pub id: u32,
    /// Bits per tick; 0 means unlimited.
    pub bandwidth: u64,
    /// Propagation delay in ticks.
    pub delay: Tick,
    /// Post-idle burst allowance in bytes.
    pub burst: u64,
    /// Raw virtual time.
    pub v: u64,
    /// Sum of scheduled flow weights.
    pub weight_sum: u64,
    /// Pipe-level bandwidth credit in bits.
    pub credit: i64,
    /// Packets waiting out the propagation delay.
    pub in_flight: usize,
    /// The default set first, then attached flowsets by id.
    pub sets: Vec<FlowSetSnapshot>,
}

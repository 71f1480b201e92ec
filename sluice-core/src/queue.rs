use std::collections::VecDeque;

use sluice_common::{FiveTuple, Packet, Tick};

use crate::{heap::HeapHandle, red::RedState, vtime::VirtualTime};

/// Where a WF2Q+ flow currently sits among its pipe's heaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WfqPosition {
    /// Not linked into any per-pipe heap.
    Unlinked,
    /// Eligible (`S <= V`), in the scheduler heap keyed by F.
    Scheduler(HeapHandle),
    /// Not yet eligible, in the not-eligible heap keyed by S.
    NotEligible(HeapHandle),
    /// Drained, parked in the idle heap keyed by F until V passes F and
    /// the flow's weight can be reclaimed.
    Idle(HeapHandle),
}

/// A per-flow packet FIFO with byte/slot accounting and scheduler state.
///
/// Owned by exactly one [`FlowSet`](crate::flowset::FlowSet); a packet stays
/// here until the scheduler moves it to the owning pipe's delay line.
#[derive(Debug)]
pub(crate) struct FlowQueue {
    /// Masked identity of the flow (all-zero for shared queues).
    pub(crate) id: FiveTuple,
    /// A shared queue aliases every flow that overflowed the hash table.
    pub(crate) shared: bool,
    /// Queued packets with their original (unmasked) tuples, FIFO.
    fifo: VecDeque<(Packet, FiveTuple)>,
    len_bytes: u64,

    /// Bandwidth credit in bits (fixed-rate scheduling). May go negative
    /// through delay-profile extra bits.
    pub(crate) credit: i64,
    /// WF2Q+ start/finish timestamps. `s == sentinel_after(f)` marks a flow
    /// with no live virtual-time state.
    pub(crate) s: VirtualTime,
    pub(crate) f: VirtualTime,

    pub(crate) red: RedState,
    /// Last tick this queue went empty; basis for credit backfill, RED
    /// idle decay and expiration.
    pub(crate) idle_time: Tick,
    /// Last tick credit was accrued up to.
    pub(crate) sched_time: Tick,

    pub(crate) ready_handle: Option<HeapHandle>,
    pub(crate) wfq: WfqPosition,

    pub(crate) tot_pkts: u64,
    pub(crate) tot_bytes: u64,
    pub(crate) drops: u64,
}

impl FlowQueue {
    pub(crate) fn new(id: FiveTuple, shared: bool, now: Tick) -> Self {
        Self {
            id,
            shared,
            fifo: VecDeque::new(),
            len_bytes: 0,
            credit: 0,
            s: VirtualTime::sentinel_after(VirtualTime::ZERO),
            f: VirtualTime::ZERO,
            red: RedState::default(),
            idle_time: now,
            sched_time: now,
            ready_handle: None,
            wfq: WfqPosition::Unlinked,
            tot_pkts: 0,
            tot_bytes: 0,
            drops: 0,
        }
    }

    pub(crate) fn push(&mut self, packet: Packet, flow: FiveTuple) {
        self.len_bytes += packet.len() as u64;
        self.tot_pkts += 1;
        self.tot_bytes += packet.len() as u64;
        self.fifo.push_back((packet, flow));
    }

    pub(crate) fn pop(&mut self) -> Option<(Packet, FiveTuple)> {
        let entry = self.fifo.pop_front()?;
        self.len_bytes -= entry.0.len() as u64;
        Some(entry)
    }

    /// Size of the head packet in bits, if any.
    pub(crate) fn front_bits(&self) -> Option<u64> {
        self.fifo.front().map(|(p, _)| p.len_bits())
    }

    /// Size of the head packet in bytes, if any.
    pub(crate) fn front_len(&self) -> Option<u64> {
        self.fifo.front().map(|(p, _)| p.len() as u64)
    }

    pub(crate) fn len(&self) -> usize {
        self.fifo.len()
    }

    pub(crate) fn len_bytes(&self) -> u64 {
        self.len_bytes
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    /// Whether the flow carries no live virtual-time state.
    pub(crate) fn vt_is_idle(&self) -> bool {
        self.s == VirtualTime::sentinel_after(self.f)
    }

    /// Invalidate the virtual timestamps once the flow's weight has been
    /// reclaimed; a later revival must start from the pipe's current V.
    pub(crate) fn vt_mark_idle(&mut self) {
        self.s = VirtualTime::sentinel_after(self.f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> FlowQueue {
        FlowQueue::new(FiveTuple::zero(), false, 0)
    }

    #[test]
    fn accounting_tracks_contents() {
        let mut q = queue();
        assert!(q.vt_is_idle());

        q.push(Packet::zeroed(100), FiveTuple::zero());
        q.push(Packet::zeroed(250), FiveTuple::zero());
        assert_eq!(q.len(), 2);
        assert_eq!(q.len_bytes(), 350);
        assert_eq!(q.front_bits(), Some(800));

        let (first, _) = q.pop().unwrap();
        assert_eq!(first.len(), 100);
        assert_eq!(q.len(), 1);
        assert_eq!(q.len_bytes(), 250);

        q.pop().unwrap();
        assert!(q.is_empty());
        assert_eq!(q.len_bytes(), 0);
        assert_eq!(q.tot_pkts, 2);
        assert_eq!(q.tot_bytes, 350);
    }

    #[test]
    fn fifo_order_is_preserved() {
        let mut q = queue();
        for len in [10, 20, 30, 40] {
            q.push(Packet::zeroed(len), FiveTuple::zero());
        }
        let out: Vec<usize> = std::iter::from_fn(|| q.pop()).map(|(p, _)| p.len()).collect();
        assert_eq!(out, vec![10, 20, 30, 40]);
    }

    #[test]
    fn sentinel_round_trip() {
        let mut q = queue();
        q.f = VirtualTime::service(1000, 2);
        q.s = q.f;
        assert!(!q.vt_is_idle());
        q.vt_mark_idle();
        assert!(q.vt_is_idle());
    }
}

use rand::{rngs::StdRng, Rng};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use sluice_common::{flow_hash, FiveTuple, FlowMask, Packet, Tick};

use crate::{
    config::QueueLimit,
    error::DropReason,
    queue::{FlowQueue, WfqPosition},
    red::RedParams,
};

/// Tick-converted flowset parameters, shared by attached flowsets and the
/// default set embedded in every pipe.
#[derive(Debug)]
pub(crate) struct SetParams {
    pub(crate) weight: u64,
    pub(crate) mask: FlowMask,
    pub(crate) buckets: usize,
    pub(crate) limit: QueueLimit,
    pub(crate) plr: f64,
    pub(crate) red: Option<RedParams>,
    pub(crate) expire_after: Tick,
    pub(crate) bucket_ratio: usize,
}

/// A group of per-flow queues sharing a fairness/RED policy.
///
/// Flows are classified by masking the 5-tuple and hashing into a bucket
/// table; buckets keep queues in most-recently-used order. When the table
/// is saturated new flows are aliased onto one shared overflow queue: a
/// deliberate fail-open degradation of fairness instead of a drop.
#[derive(Debug)]
pub(crate) struct FlowSet {
    /// Flowset id; `None` for a pipe's embedded default set.
    pub(crate) id: Option<u32>,
    pub(crate) weight: u64,
    pub(crate) mask: FlowMask,
    pub(crate) limit: QueueLimit,
    pub(crate) plr: f64,
    pub(crate) red: Option<RedParams>,
    pub(crate) expire_after: Tick,
    bucket_ratio: usize,

    /// Queue ids per hash bucket, MRU first.
    buckets: Vec<Vec<u32>>,
    queues: FxHashMap<u32, FlowQueue>,
    overflow: Option<u32>,
    next_qid: u32,

    /// Flows currently backlogged (WF2Q+ accounting).
    pub(crate) backlogged: u64,
    warned_overflow: bool,
}

impl FlowSet {
    pub(crate) fn new(id: Option<u32>, params: SetParams) -> Self {
        Self {
            id,
            weight: params.weight,
            mask: params.mask,
            limit: params.limit,
            plr: params.plr,
            red: params.red,
            expire_after: params.expire_after,
            bucket_ratio: params.bucket_ratio,
            buckets: vec![Vec::new(); params.buckets],
            queues: FxHashMap::default(),
            overflow: None,
            next_qid: 0,
            backlogged: 0,
            warned_overflow: false,
        }
    }

    /// Apply new parameters. Queues survive; if the mask or bucket count
    /// changed, the bucket table is rebuilt from the existing identities.
    pub(crate) fn reconfigure(&mut self, params: SetParams) {
        let rehash = params.mask != self.mask || params.buckets != self.buckets.len();
        self.weight = params.weight;
        self.mask = params.mask;
        self.limit = params.limit;
        self.plr = params.plr;
        self.red = params.red;
        self.expire_after = params.expire_after;
        self.bucket_ratio = params.bucket_ratio;
        if rehash {
            self.buckets = vec![Vec::new(); params.buckets];
            self.rehash();
        }
    }

    /// Find or create the queue for a tuple.
    pub(crate) fn find_queue(&mut self, tuple: &FiveTuple, now: Tick) -> u32 {
        let masked = self.mask.apply(tuple);
        let slot = self.slot_of(&masked);

        if let Some(pos) = self.buckets[slot]
            .iter()
            .position(|qid| self.queues.get(qid).is_some_and(|q| q.id == masked))
        {
            // Move the hit to the bucket head.
            let qid = self.buckets[slot].remove(pos);
            self.buckets[slot].insert(0, qid);
            return qid;
        }

        // Miss. Under table pressure, reclaim idle queues first; if the
        // table is still saturated, fail open onto the shared queue.
        let cap = self.buckets.len() * self.bucket_ratio;
        if self.queues.len() >= cap {
            self.expire_queues(now);
            if self.queues.len() >= cap {
                if !self.warned_overflow {
                    warn!(
                        flowset = ?self.id,
                        queues = self.queues.len(),
                        "flow table saturated, aliasing new flows onto the shared overflow queue"
                    );
                    self.warned_overflow = true;
                }
                return self.overflow_queue(now);
            }
        }

        let qid = self.alloc_queue(masked, false, now);
        self.buckets[slot].insert(0, qid);
        qid
    }

    /// Admission decision for one packet: random loss, then the queue
    /// limit, then RED. On acceptance the packet is appended and the
    /// previous idle/busy state is returned.
    pub(crate) fn admit(
        &mut self,
        qid: u32,
        packet: Packet,
        flow: FiveTuple,
        now: Tick,
        rng: &mut StdRng,
    ) -> Result<bool, DropReason> {
        let Some(q) = self.queues.get_mut(&qid) else {
            return Err(DropReason::NoSuchTarget);
        };

        if self.plr > 0.0 && rng.gen::<f64>() < self.plr {
            q.drops += 1;
            return Err(DropReason::RandomLoss);
        }

        let over = match self.limit {
            QueueLimit::Slots(n) => q.len() >= n as usize,
            QueueLimit::Bytes(b) => q.len_bytes() + packet.len() as u64 > u64::from(b),
        };
        if over {
            q.drops += 1;
            return Err(DropReason::QueueFull);
        }

        if let Some(red) = &self.red {
            let q_size = if red.byte_mode { q.len_bytes() } else { q.len() as u64 };
            let idle = q.is_empty().then(|| now.saturating_sub(q.idle_time));
            if red.drops(&mut q.red, q_size, packet.len() as u64, idle, rng) {
                q.drops += 1;
                return Err(DropReason::Red);
            }
        }

        let was_idle = q.is_empty();
        q.push(packet, flow);
        Ok(was_idle)
    }

    /// Reap queues that have been empty and unscheduled for at least
    /// `expire_after` ticks. Returns how many were reclaimed.
    pub(crate) fn expire_queues(&mut self, now: Tick) -> usize {
        let threshold = self.expire_after;
        let dead: Vec<u32> = self
            .queues
            .iter()
            .filter(|(_, q)| {
                !q.shared
                    && q.is_empty()
                    && q.ready_handle.is_none()
                    && q.wfq == WfqPosition::Unlinked
                    && now.saturating_sub(q.idle_time) >= threshold
            })
            .map(|(qid, _)| *qid)
            .collect();
        if dead.is_empty() {
            return 0;
        }
        for qid in &dead {
            self.queues.remove(qid);
        }
        for bucket in &mut self.buckets {
            bucket.retain(|qid| self.queues.contains_key(qid));
        }
        debug!(flowset = ?self.id, expired = dead.len(), "expired idle flow queues");
        dead.len()
    }

    pub(crate) fn queue(&self, qid: u32) -> Option<&FlowQueue> {
        self.queues.get(&qid)
    }

    pub(crate) fn queue_mut(&mut self, qid: u32) -> Option<&mut FlowQueue> {
        self.queues.get_mut(&qid)
    }

    /// Number of flows currently holding scheduler state, and therefore a
    /// weight contribution in the parent pipe's `sum`.
    pub(crate) fn contributing(&self) -> u64 {
        self.queues.values().filter(|q| q.wfq != WfqPosition::Unlinked).count() as u64
    }

    /// Total packets still queued across all flows.
    pub(crate) fn queued_packets(&self) -> u64 {
        self.queues.values().map(|q| q.len() as u64).sum()
    }

    pub(crate) fn iter_queues(&self) -> impl Iterator<Item = &FlowQueue> {
        self.queues.values()
    }

    pub(crate) fn into_queues(self) -> impl Iterator<Item = FlowQueue> {
        self.queues.into_values()
    }

    fn slot_of(&self, masked: &FiveTuple) -> usize {
        if self.mask.is_none() {
            0
        } else {
            flow_hash(masked) as usize & (self.buckets.len() - 1)
        }
    }

    fn alloc_queue(&mut self, id: FiveTuple, shared: bool, now: Tick) -> u32 {
        let qid = self.next_qid;
        self.next_qid += 1;
        self.queues.insert(qid, FlowQueue::new(id, shared, now));
        qid
    }

    fn overflow_queue(&mut self, now: Tick) -> u32 {
        match self.overflow {
            Some(qid) if self.queues.contains_key(&qid) => qid,
            _ => {
                let qid = self.alloc_queue(FiveTuple::zero(), true, now);
                self.overflow = Some(qid);
                qid
            }
        }
    }

    fn rehash(&mut self) {
        let ids: Vec<(u32, FiveTuple)> =
            self.queues.iter().filter(|(_, q)| !q.shared).map(|(qid, q)| (*qid, q.id)).collect();
        for (qid, id) in ids {
            let slot = self.slot_of(&id);
            self.buckets[slot].push(qid);
        }
    }
}

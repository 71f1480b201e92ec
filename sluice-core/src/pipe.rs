use std::collections::VecDeque;

use rand::{rngs::StdRng, Rng};
use rustc_hash::FxHashMap;

use sluice_common::{FiveTuple, Packet, Tick};

use crate::{
    error::InvariantViolation,
    flowset::{FlowSet, SetParams},
    heap::{Heap, HeapHandle, HeapKey},
    queue::WfqPosition,
    vtime::VirtualTime,
};

/// Which of a pipe's flowsets a scheduled flow belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SetRef {
    /// The pipe's embedded default set (fixed-rate path).
    Default,
    /// An attached flowset (WF2Q+ path).
    Id(u32),
}

/// A flow addressed relative to its pipe: flowset plus queue id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LocalFlow {
    pub(crate) set: SetRef,
    pub(crate) queue: u32,
}

/// A packet in flight on a pipe's delay line.
#[derive(Debug)]
pub(crate) struct DelayedPacket {
    pub(crate) due: Tick,
    pub(crate) flow: FiveTuple,
    pub(crate) packet: Packet,
}

/// Result of draining a fixed-rate queue.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct FixedOutcome {
    /// Packets moved onto the delay line.
    pub(crate) moved: usize,
    /// When to run again, if the queue still has a credit deficit.
    pub(crate) reschedule: Option<Tick>,
}

/// Result of a WF2Q+ scheduling round.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct WfqOutcome {
    pub(crate) moved: usize,
    pub(crate) reschedule: Option<Tick>,
}

/// Resolve a set reference against a pipe's default set and attachment map.
///
/// A free function over the two fields, so callers can keep borrowing the
/// pipe's heaps, delay line and counters alongside the returned set.
fn set_mut<'a>(
    default: &'a mut FlowSet,
    sets: &'a mut FxHashMap<u32, FlowSet>,
    r: SetRef,
) -> Result<&'a mut FlowSet, InvariantViolation> {
    match r {
        SetRef::Default => Ok(default),
        SetRef::Id(sid) => {
            sets.get_mut(&sid).ok_or(InvariantViolation("scheduled flow references a missing flowset"))
        }
    }
}

/// A rate/delay-limited conduit.
///
/// Two scheduling paths feed one delay line. Packets addressed to the pipe
/// itself go through the default set, where every flow queue spends its own
/// bandwidth credit. Packets addressed to an attached flowset go through
/// WF2Q+: flows carry start/finish virtual timestamps and the pipe serves
/// the eligible flow with the smallest finish time, spending pipe-level
/// credit. Either way a served packet waits out the propagation delay on
/// the delay line before it is handed back to the caller.
#[derive(Debug)]
pub(crate) struct Pipe {
    pub(crate) id: u32,
    /// Bits per tick; 0 means unlimited.
    pub(crate) bandwidth: u64,
    /// Propagation delay in ticks.
    pub(crate) delay: Tick,
    /// Post-idle burst allowance in bytes.
    pub(crate) burst: u64,
    /// Extra transmission bits charged per idle-to-busy transition.
    pub(crate) profile: Option<Vec<u32>>,

    /// Default set backing the fixed-rate path.
    pub(crate) fs: FlowSet,
    /// Attached flowsets by id (WF2Q+ path).
    pub(crate) sets: FxHashMap<u32, FlowSet>,

    /// Current virtual time.
    pub(crate) v: VirtualTime,
    /// Sum of the weights of all flows holding scheduler state.
    pub(crate) sum: u64,
    /// Pipe-level bandwidth credit in bits; negative while repaying a
    /// packet served on credit.
    pub(crate) credit: i64,
    /// Last tick pipe credit was accrued up to.
    sched_time: Tick,
    /// Tick the WF2Q+ path last went idle; basis for credit backfill.
    idle_time: Tick,

    /// Eligible flows (`S <= V`), keyed by finish time.
    scheduler: Heap<VirtualTime, LocalFlow>,
    /// Backlogged flows not yet eligible, keyed by start time.
    not_eligible: Heap<VirtualTime, LocalFlow>,
    /// Drained flows still holding weight, keyed by finish time.
    idle: Heap<VirtualTime, LocalFlow>,

    pub(crate) delay_line: VecDeque<DelayedPacket>,

    /// Handle into the engine's WF2Q+ wakeup heap, while scheduled.
    pub(crate) wfq_handle: Option<HeapHandle>,
    /// Handle into the engine's delivery heap, while the delay line is
    /// non-empty.
    pub(crate) extract_handle: Option<HeapHandle>,
}

impl Pipe {
    pub(crate) fn new(
        id: u32,
        bandwidth: u64,
        delay: Tick,
        burst: u64,
        profile: Option<Vec<u32>>,
        default_set: SetParams,
    ) -> Self {
        Self {
            id,
            bandwidth,
            delay,
            burst,
            profile,
            fs: FlowSet::new(None, default_set),
            sets: FxHashMap::default(),
            v: VirtualTime::ZERO,
            sum: 0,
            credit: 0,
            sched_time: 0,
            idle_time: 0,
            scheduler: Heap::new(),
            not_eligible: Heap::new(),
            idle: Heap::new(),
            delay_line: VecDeque::new(),
            wfq_handle: None,
            extract_handle: None,
        }
    }

    pub(crate) fn set(&self, r: SetRef) -> Option<&FlowSet> {
        match r {
            SetRef::Default => Some(&self.fs),
            SetRef::Id(sid) => self.sets.get(&sid),
        }
    }

    /// Idle-to-busy credit top-up: idle ticks earn credit on top of
    /// whatever was left from the last busy period, the top-up capped so
    /// the total never grows past `burst` bytes, minus any transmission
    /// overhead sampled from the delay profile.
    fn backfill(&self, credit: i64, idle_since: Tick, now: Tick, rng: &mut StdRng) -> i64 {
        let mut credit = credit;
        if self.bandwidth > 0 {
            let earned = now.saturating_sub(idle_since).saturating_mul(self.bandwidth) as i64;
            let allowance = (self.burst * 8) as i64;
            credit = (credit + earned).min(allowance.max(credit));
        }
        if let Some(samples) = &self.profile {
            credit -= i64::from(samples[rng.gen_range(0..samples.len())]);
        }
        credit
    }

    /// Prime a fixed-rate queue that just went from idle to busy.
    pub(crate) fn activate_fixed(&mut self, qid: u32, now: Tick, rng: &mut StdRng) {
        let (residual, idle_since) =
            self.fs.queue(qid).map_or((0, now), |q| (q.credit, q.idle_time));
        let credit = self.backfill(residual, idle_since, now, rng);
        if let Some(q) = self.fs.queue_mut(qid) {
            q.credit = credit;
            q.sched_time = now;
        }
    }

    /// Drain a fixed-rate queue as far as its credit allows.
    ///
    /// Unlike the WF2Q+ path, a packet is only served once the queue has
    /// earned its full size in credit.
    pub(crate) fn fixed_ready(
        &mut self,
        qid: u32,
        now: Tick,
    ) -> Result<FixedOutcome, InvariantViolation> {
        let bw = self.bandwidth;
        let delay = self.delay;
        let q = self
            .fs
            .queue_mut(qid)
            .ok_or(InvariantViolation("ready event for a missing fixed-rate queue"))?;

        if bw > 0 {
            q.credit += (now.saturating_sub(q.sched_time) * bw) as i64;
        }
        q.sched_time = now;

        let mut moved = 0;
        let mut reschedule = None;
        while let Some(bits) = q.front_bits() {
            if bw > 0 && q.credit < bits as i64 {
                let deficit = (bits as i64 - q.credit) as u64;
                reschedule = Some(now + deficit.div_ceil(bw).max(1));
                break;
            }
            if bw > 0 {
                q.credit -= bits as i64;
            }
            let (packet, flow) =
                q.pop().ok_or(InvariantViolation("fixed-rate queue lost its head packet"))?;
            self.delay_line.push_back(DelayedPacket { due: now + delay, flow, packet });
            moved += 1;
        }
        if q.is_empty() {
            // Residual credit is kept; the next activation tops it up.
            q.idle_time = now;
        }
        Ok(FixedOutcome { moved, reschedule })
    }

    /// Link a WF2Q+ flow that just went from idle to busy into the
    /// scheduling heaps. Returns whether the whole WF2Q+ path was idle, in
    /// which case the caller owes the pipe an immediate scheduling round.
    pub(crate) fn activate_wfq(
        &mut self,
        sid: u32,
        qid: u32,
        now: Tick,
        rng: &mut StdRng,
    ) -> Result<bool, InvariantViolation> {
        let was_idle =
            self.scheduler.is_empty() && self.not_eligible.is_empty() && self.wfq_handle.is_none();
        if was_idle {
            self.credit = self.backfill(self.credit, self.idle_time, now, rng);
            self.sched_time = now;
        }

        let lf = LocalFlow { set: SetRef::Id(sid), queue: qid };
        let set = set_mut(&mut self.fs, &mut self.sets, lf.set)?;
        let weight = set.weight;
        let q = set
            .queue_mut(qid)
            .ok_or(InvariantViolation("activating a missing flow queue"))?;
        let head = q.front_len().ok_or(InvariantViolation("activating an empty flow queue"))?;

        match q.wfq {
            // No live virtual-time state: start at the current V.
            WfqPosition::Unlinked => {
                q.s = self.v;
                self.sum += weight;
            }
            // Parked in the idle heap: the finish time is still binding.
            WfqPosition::Idle(h) => {
                self.idle.remove(h)?;
                q.s = q.f.latest(self.v);
            }
            _ => return Err(InvariantViolation("activating a flow that is already scheduled")),
        }
        q.f = q.s.add(VirtualTime::service(head, weight));
        if q.s.leq(self.v) {
            q.wfq = WfqPosition::Scheduler(self.scheduler.insert(q.f, lf));
        } else {
            q.wfq = WfqPosition::NotEligible(self.not_eligible.insert(q.s, lf));
        }
        set_mut(&mut self.fs, &mut self.sets, lf.set)?.backlogged += 1;
        Ok(was_idle)
    }

    /// One WF2Q+ scheduling round: serve eligible flows in finish-time
    /// order while pipe credit lasts.
    ///
    /// A packet is served whenever credit is non-negative; the pipe may go
    /// into debt for it and repays the debt before serving again.
    pub(crate) fn wfq_run(&mut self, now: Tick) -> Result<WfqOutcome, InvariantViolation> {
        let bw = self.bandwidth;
        if bw > 0 {
            self.credit += (now.saturating_sub(self.sched_time) * bw) as i64;
        }
        self.sched_time = now;

        let mut moved = 0;
        loop {
            if bw > 0 && self.credit < 0 {
                break;
            }
            self.promote()?;
            if self.scheduler.is_empty() {
                match self.not_eligible.peek() {
                    // No eligible flow: jump V forward to the earliest
                    // start time and retry.
                    Some((s, _)) => {
                        self.v = self.v.latest(*s);
                        continue;
                    }
                    None => break,
                }
            }
            let Some((_, lf)) = self.scheduler.pop() else { break };
            self.serve(lf, now)?;
            moved += 1;
        }

        // Stay scheduled while in debt even with nothing backlogged, so a
        // same-tick burst of short-lived flows cannot evade the rate.
        let reschedule = if bw > 0 && self.credit < 0 {
            Some(now + 1 + (-self.credit) as u64 / bw)
        } else {
            debug_assert!(self.scheduler.is_empty() && self.not_eligible.is_empty());
            self.idle_time = now;
            None
        };
        Ok(WfqOutcome { moved, reschedule })
    }

    /// Serve the head packet of one flow and reposition the flow.
    fn serve(&mut self, lf: LocalFlow, now: Tick) -> Result<(), InvariantViolation> {
        let set = set_mut(&mut self.fs, &mut self.sets, lf.set)?;
        let weight = set.weight;
        let q = set
            .queue_mut(lf.queue)
            .ok_or(InvariantViolation("scheduled flow without a queue"))?;
        let (packet, flow) =
            q.pop().ok_or(InvariantViolation("scheduled flow with an empty queue"))?;

        let len = packet.len() as u64;
        if self.bandwidth > 0 {
            self.credit -= packet.len_bits() as i64;
        }
        self.delay_line.push_back(DelayedPacket { due: now + self.delay, flow, packet });

        debug_assert!(self.sum > 0);
        let old_v = self.v;
        self.v = self.v.add(VirtualTime::service(len, self.sum));
        debug_assert!(old_v.leq(self.v));

        if let Some(next) = q.front_len() {
            q.s = q.f;
            q.f = q.s.add(VirtualTime::service(next, weight));
            if q.s.leq(self.v) {
                q.wfq = WfqPosition::Scheduler(self.scheduler.insert(q.f, lf));
            } else {
                q.wfq = WfqPosition::NotEligible(self.not_eligible.insert(q.s, lf));
            }
        } else {
            q.idle_time = now;
            if q.f.leq(self.v) {
                q.wfq = WfqPosition::Unlinked;
                q.vt_mark_idle();
                self.sum -= weight;
            } else {
                // The flow's finish time is still ahead of V: its weight
                // keeps diluting V until V catches up.
                q.wfq = WfqPosition::Idle(self.idle.insert(q.f, lf));
            }
            set_mut(&mut self.fs, &mut self.sets, lf.set)?.backlogged -= 1;
        }
        Ok(())
    }

    /// Move flows whose start time V has reached into the scheduler heap.
    fn promote(&mut self) -> Result<(), InvariantViolation> {
        while let Some((s, _)) = self.not_eligible.peek() {
            if !s.leq(&self.v) {
                break;
            }
            let Some((_, lf)) = self.not_eligible.pop() else { break };
            let set = set_mut(&mut self.fs, &mut self.sets, lf.set)?;
            let q = set
                .queue_mut(lf.queue)
                .ok_or(InvariantViolation("scheduled flow without a queue"))?;
            let f = q.f;
            q.wfq = WfqPosition::Scheduler(self.scheduler.insert(f, lf));
        }
        Ok(())
    }

    /// Release the weight of drained flows whose finish time V has passed.
    pub(crate) fn reclaim_idle(&mut self) -> Result<(), InvariantViolation> {
        while let Some((f, _)) = self.idle.peek() {
            if !f.leq(&self.v) {
                break;
            }
            let Some((_, lf)) = self.idle.pop() else { break };
            let set = set_mut(&mut self.fs, &mut self.sets, lf.set)?;
            let weight = set.weight;
            let q = set
                .queue_mut(lf.queue)
                .ok_or(InvariantViolation("idle-parked flow without a queue"))?;
            q.wfq = WfqPosition::Unlinked;
            q.vt_mark_idle();
            self.sum -= weight;
        }
        Ok(())
    }

    /// Deliver every delay-line packet that is due, returning when the new
    /// head packet (if any) matures.
    pub(crate) fn transmit(&mut self, now: Tick, out: &mut Vec<DelayedPacket>) -> Option<Tick> {
        while let Some(head) = self.delay_line.front() {
            if !head.due.leq(&now) {
                break;
            }
            if let Some(pkt) = self.delay_line.pop_front() {
                out.push(pkt);
            }
        }
        self.delay_line.front().map(|d| d.due)
    }

    /// Detach a flowset: drop its scheduler state and give back the set.
    pub(crate) fn remove_set(&mut self, sid: u32) -> Option<FlowSet> {
        let set = self.sets.remove(&sid)?;
        self.sum -= set.weight * set.contributing();
        let gone = SetRef::Id(sid);
        self.scheduler.retain(|_, lf| lf.set != gone);
        self.not_eligible.retain(|_, lf| lf.set != gone);
        self.idle.retain(|_, lf| lf.set != gone);
        Some(set)
    }

    /// Packets queued across both paths plus the delay line.
    pub(crate) fn queued_packets(&self) -> u64 {
        let in_queues: u64 = self.fs.queued_packets()
            + self.sets.values().map(FlowSet::queued_packets).sum::<u64>();
        in_queues + self.delay_line.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use rand::SeedableRng;
    use sluice_common::FlowMask;

    use super::*;
    use crate::config::QueueLimit;

    fn default_params() -> SetParams {
        SetParams {
            weight: 1,
            mask: FlowMask::NONE,
            buckets: 1,
            limit: QueueLimit::Slots(100),
            plr: 0.0,
            red: None,
            expire_after: 1000,
            bucket_ratio: 16,
        }
    }

    fn wfq_params(weight: u64) -> SetParams {
        SetParams { weight, mask: FlowMask::ALL, buckets: 4, ..default_params() }
    }

    fn tuple(port: u16) -> FiveTuple {
        FiveTuple::v4(17, Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), port, 9)
    }

    /// Queue `n` packets of `len` bytes on a flowset and activate the flow.
    fn feed(pipe: &mut Pipe, sid: u32, port: u16, n: usize, len: usize, rng: &mut StdRng) {
        let set = pipe.sets.get_mut(&sid).unwrap();
        let qid = set.find_queue(&tuple(port), 0);
        let mut was_idle = false;
        for _ in 0..n {
            was_idle |= set.admit(qid, Packet::zeroed(len), tuple(port), 0, rng).unwrap();
        }
        if was_idle {
            pipe.activate_wfq(sid, qid, 0, rng).unwrap();
        }
    }

    #[test]
    fn wfq_serves_by_finish_time() {
        // Unlimited bandwidth: one round drains everything, and the service
        // order exposes the virtual-time bookkeeping.
        let mut pipe = Pipe::new(1, 0, 0, 0, None, default_params());
        pipe.sets.insert(1, FlowSet::new(Some(1), wfq_params(1)));
        pipe.sets.insert(2, FlowSet::new(Some(2), wfq_params(3)));
        let mut rng = StdRng::seed_from_u64(3);

        feed(&mut pipe, 1, 1000, 3, 100, &mut rng); // flow A, weight 1
        feed(&mut pipe, 2, 2000, 3, 100, &mut rng); // flow B, weight 3

        let out = pipe.wfq_run(0).unwrap();
        assert_eq!(out.moved, 6);
        assert_eq!(out.reschedule, None);

        let order: Vec<u16> =
            pipe.delay_line.iter().map(|d| d.flow.src_port).collect();
        assert_eq!(order, vec![2000, 1000, 2000, 2000, 1000, 1000]);
    }

    #[test]
    fn wfq_weight_released_when_drained() {
        let mut pipe = Pipe::new(1, 0, 0, 0, None, default_params());
        pipe.sets.insert(1, FlowSet::new(Some(1), wfq_params(2)));
        let mut rng = StdRng::seed_from_u64(3);

        feed(&mut pipe, 1, 1, 1, 100, &mut rng);
        assert_eq!(pipe.sum, 2);
        pipe.wfq_run(0).unwrap();

        // Single backlogged flow: its finish time never trails V, so the
        // weight is released as soon as the queue drains.
        assert_eq!(pipe.sum, 0);
        let set = pipe.sets.get(&1).unwrap();
        assert_eq!(set.backlogged, 0);
        assert!(set.iter_queues().all(|q| q.wfq == WfqPosition::Unlinked));
    }

    #[test]
    fn idle_flows_release_weight_when_v_catches_up() {
        // Unlimited bandwidth, two flows in one weight-1 set. The short
        // flow drains with its finish time still ahead of V, parks in the
        // idle heap and keeps diluting V until V passes its finish time.
        let mut pipe = Pipe::new(1, 0, 0, 0, None, default_params());
        pipe.sets.insert(1, FlowSet::new(Some(1), wfq_params(1)));
        let mut rng = StdRng::seed_from_u64(3);

        feed(&mut pipe, 1, 1000, 2, 100, &mut rng);
        feed(&mut pipe, 1, 2000, 1, 50, &mut rng);
        let out = pipe.wfq_run(0).unwrap();
        assert_eq!(out.moved, 3);
        assert_eq!(pipe.sum, 2);

        // V ended at 3/2 packet times: past the short flow's finish time,
        // short of the long flow's.
        pipe.reclaim_idle().unwrap();
        assert_eq!(pipe.sum, 1);

        pipe.v = pipe.v.add(VirtualTime::service(100, 1));
        pipe.reclaim_idle().unwrap();
        assert_eq!(pipe.sum, 0);
        let set = pipe.sets.get(&1).unwrap();
        assert!(set.iter_queues().all(|q| q.wfq == WfqPosition::Unlinked));
    }

    #[test]
    fn wfq_goes_into_debt_and_reschedules() {
        // 100 bits per tick, one 100-byte (800-bit) packet: served at once
        // on credit, debt repaid over 8 ticks.
        let mut pipe = Pipe::new(1, 100, 0, 0, None, default_params());
        pipe.sets.insert(1, FlowSet::new(Some(1), wfq_params(1)));
        let mut rng = StdRng::seed_from_u64(3);

        feed(&mut pipe, 1, 1, 2, 100, &mut rng);
        let out = pipe.wfq_run(0).unwrap();
        assert_eq!(out.moved, 1);
        assert_eq!(pipe.credit, -800);
        assert_eq!(out.reschedule, Some(9));

        // The queue drains on tick 9, but the pipe stays scheduled until
        // the remaining debt is repaid.
        let out = pipe.wfq_run(9).unwrap();
        assert_eq!(out.moved, 1);
        assert_eq!(pipe.credit, -700);
        assert_eq!(out.reschedule, Some(17));

        let out = pipe.wfq_run(17).unwrap();
        assert_eq!(out, WfqOutcome { moved: 0, reschedule: None });
    }

    #[test]
    fn fixed_path_waits_for_full_credit() {
        // 800 bits per tick and 100-byte packets: exactly one per tick,
        // starting one tick after activation (no burst allowance).
        let mut pipe = Pipe::new(1, 800, 5, 0, None, default_params());
        let mut rng = StdRng::seed_from_u64(3);
        let qid = pipe.fs.find_queue(&tuple(7), 0);
        for _ in 0..3 {
            pipe.fs.admit(qid, Packet::zeroed(100), tuple(7), 0, &mut rng).unwrap();
        }
        pipe.activate_fixed(qid, 0, &mut rng);

        let out = pipe.fixed_ready(qid, 0).unwrap();
        assert_eq!(out, FixedOutcome { moved: 0, reschedule: Some(1) });
        for now in 1..=3 {
            let out = pipe.fixed_ready(qid, now).unwrap();
            assert_eq!(out.moved, 1, "tick {now}");
        }
        assert_eq!(pipe.fs.queue(qid).unwrap().credit, 0);

        let dues: Vec<Tick> = pipe.delay_line.iter().map(|d| d.due).collect();
        assert_eq!(dues, vec![6, 7, 8]);
    }

    #[test]
    fn burst_backfills_credit_after_idle() {
        // Burst of 200 bytes: after 10 idle ticks the queue restarts with
        // 1600 bits of credit, enough for two packets immediately.
        let mut pipe = Pipe::new(1, 800, 0, 200, None, default_params());
        let mut rng = StdRng::seed_from_u64(3);
        let qid = pipe.fs.find_queue(&tuple(7), 0);

        pipe.fs.admit(qid, Packet::zeroed(100), tuple(7), 0, &mut rng).unwrap();
        pipe.activate_fixed(qid, 0, &mut rng);
        pipe.fixed_ready(qid, 0).unwrap();
        pipe.fixed_ready(qid, 1).unwrap();
        assert_eq!(pipe.fs.queue(qid).unwrap().idle_time, 1);

        for _ in 0..3 {
            pipe.fs.admit(qid, Packet::zeroed(100), tuple(7), 11, &mut rng).unwrap();
        }
        pipe.activate_fixed(qid, 11, &mut rng);
        assert_eq!(pipe.fs.queue(qid).unwrap().credit, 1600);
        let out = pipe.fixed_ready(qid, 11).unwrap();
        assert_eq!(out, FixedOutcome { moved: 2, reschedule: Some(12) });
    }

    #[test]
    fn delay_profile_charges_extra_bits() {
        let profile = Some(vec![400]);
        let mut pipe = Pipe::new(1, 800, 0, 1_000_000, profile, default_params());
        let mut rng = StdRng::seed_from_u64(3);
        let qid = pipe.fs.find_queue(&tuple(7), 0);

        pipe.fs.admit(qid, Packet::zeroed(100), tuple(7), 100, &mut rng).unwrap();
        pipe.activate_fixed(qid, 100, &mut rng);
        // 100 idle ticks earn 80_000 bits, capped by burst, minus the
        // 400-bit profile sample.
        assert_eq!(pipe.fs.queue(qid).unwrap().credit, 80_000 - 400);
    }

    #[test]
    fn transmit_delivers_in_due_order() {
        let mut pipe = Pipe::new(1, 0, 4, 0, None, default_params());
        pipe.sets.insert(1, FlowSet::new(Some(1), wfq_params(1)));
        let mut rng = StdRng::seed_from_u64(3);
        feed(&mut pipe, 1, 1, 2, 50, &mut rng);
        pipe.wfq_run(0).unwrap();

        let mut out = Vec::new();
        assert_eq!(pipe.transmit(3, &mut out), Some(4));
        assert!(out.is_empty());
        assert_eq!(pipe.transmit(4, &mut out), None);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn remove_set_purges_scheduler_state() {
        let mut pipe = Pipe::new(1, 100, 0, 0, None, default_params());
        pipe.sets.insert(1, FlowSet::new(Some(1), wfq_params(5)));
        pipe.sets.insert(2, FlowSet::new(Some(2), wfq_params(1)));
        let mut rng = StdRng::seed_from_u64(3);

        feed(&mut pipe, 1, 1, 4, 100, &mut rng);
        feed(&mut pipe, 2, 2, 4, 100, &mut rng);
        pipe.wfq_run(0).unwrap();
        assert_eq!(pipe.sum, 6);

        let set = pipe.remove_set(1).unwrap();
        assert_eq!(set.id, Some(1));
        assert_eq!(pipe.sum, 1);
        // The survivor still schedules.
        let out = pipe.wfq_run(100).unwrap();
        assert!(out.moved > 0);
    }
}

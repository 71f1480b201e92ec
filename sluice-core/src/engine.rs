use std::time::Duration;

use rand::{rngs::StdRng, SeedableRng};
use rustc_hash::FxHashMap;
use tracing::debug;

use sluice_common::{FiveTuple, Packet, Tick};

use crate::{
    config::{duration_to_ticks, FlowSetConfig, PipeConfig},
    error::{ConfigError, DropReason},
    flowset::{FlowSet, SetParams},
    heap::{Heap, HeapKey},
    pipe::{Pipe, SetRef},
    queue::WfqPosition,
    red::RedParams,
    stats::{EngineStats, FlowQueueSnapshot, FlowSetSnapshot, PipeSnapshot},
};

/// Queues with no traffic for this long are reaped on table pressure.
const DEFAULT_EXPIRE: Duration = Duration::from_secs(5);

/// Where a packet is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A pipe directly: the fixed-rate path through its default set.
    Pipe(u32),
    /// A flowset: the WF2Q+ path of the pipe it is attached to.
    FlowSet(u32),
}

/// Admission outcome for one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Accepted; it will surface from [`Engine::tick`] once shaped.
    Enqueued,
    /// Refused; the packet is gone.
    Dropped(DropReason),
}

/// A packet that finished shaping, handed back by [`Engine::tick`].
#[derive(Debug)]
pub struct ReadyPacket {
    /// The pipe that shaped it.
    pub pipe: u32,
    /// The original (unmasked) 5-tuple it was classified under.
    pub flow: FiveTuple,
    pub packet: Packet,
}

/// A fixed-rate queue addressed globally: pipe plus queue id in the pipe's
/// default set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FlowRef {
    pipe: u32,
    queue: u32,
}

/// Engine construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Ticks per second. Bandwidth and delay granularity both derive from
    /// this.
    pub hz: u32,
    /// RNG seed for loss and RED decisions; random when absent.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { hz: 1000, seed: None }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hz(mut self, hz: u32) -> Self {
        self.hz = hz;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// The traffic-shaping engine: every pipe, flowset and queue, plus the
/// event heaps that drive them.
///
/// The engine is single-threaded and tick-driven. Callers hand packets in
/// through [`Engine::shape`] and advance time with [`Engine::tick`], which
/// returns the packets whose shaping completed that tick. All scheduling
/// work is event-driven: three heaps hold the next wakeup per fixed-rate
/// queue, per WF2Q+ pipe, and per delay line, so idle pipes cost nothing.
#[derive(Debug)]
pub struct Engine {
    hz: u32,
    now: Tick,
    pipes: FxHashMap<u32, Pipe>,
    /// Flowset id to owning pipe id.
    set_index: FxHashMap<u32, u32>,

    /// Fixed-rate queues waiting for credit, keyed by wakeup tick.
    ready: Heap<Tick, FlowRef>,
    /// Pipes with WF2Q+ backlog waiting for credit.
    wfq_ready: Heap<Tick, u32>,
    /// Pipes with a non-empty delay line, keyed by the head packet's due
    /// tick.
    extract: Heap<Tick, u32>,

    rng: StdRng,
    /// Packets finished since the last tick, drained by [`Engine::tick`].
    out: Vec<ReadyPacket>,
    stats: EngineStats,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        assert!(config.hz > 0, "tick rate must be non-zero");
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            hz: config.hz,
            now: 0,
            pipes: FxHashMap::default(),
            set_index: FxHashMap::default(),
            ready: Heap::new(),
            wfq_ready: Heap::new(),
            extract: Heap::new(),
            rng,
            out: Vec::new(),
            stats: EngineStats::default(),
        }
    }

    /// Ticks per second this engine runs at.
    pub fn hz(&self) -> u32 {
        self.hz
    }

    /// The current tick.
    pub fn now(&self) -> Tick {
        self.now
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Submit one packet for shaping.
    pub fn shape(&mut self, target: Target, tuple: FiveTuple, packet: Packet) -> Verdict {
        match target {
            Target::Pipe(pid) => self.shape_fixed(pid, tuple, packet),
            Target::FlowSet(sid) => self.shape_wfq(sid, tuple, packet),
        }
    }

    fn shape_fixed(&mut self, pid: u32, tuple: FiveTuple, packet: Packet) -> Verdict {
        let Some(pipe) = self.pipes.get_mut(&pid) else {
            self.stats.record_drop(DropReason::NoSuchTarget);
            return Verdict::Dropped(DropReason::NoSuchTarget);
        };
        let qid = pipe.fs.find_queue(&tuple, self.now);
        match pipe.fs.admit(qid, packet, tuple, self.now, &mut self.rng) {
            Ok(was_idle) => {
                self.stats.enqueued += 1;
                if was_idle {
                    pipe.activate_fixed(qid, self.now, &mut self.rng);
                    self.run_fixed(pid, qid);
                }
                Verdict::Enqueued
            }
            Err(reason) => {
                self.stats.record_drop(reason);
                Verdict::Dropped(reason)
            }
        }
    }

    fn shape_wfq(&mut self, sid: u32, tuple: FiveTuple, packet: Packet) -> Verdict {
        let Some(pipe) = self.set_index.get(&sid).and_then(|pid| self.pipes.get_mut(pid)) else {
            self.stats.record_drop(DropReason::NoSuchTarget);
            return Verdict::Dropped(DropReason::NoSuchTarget);
        };
        let pid = pipe.id;
        let Some(set) = pipe.sets.get_mut(&sid) else {
            self.stats.record_drop(DropReason::NoSuchTarget);
            return Verdict::Dropped(DropReason::NoSuchTarget);
        };
        let qid = set.find_queue(&tuple, self.now);
        match set.admit(qid, packet, tuple, self.now, &mut self.rng) {
            Ok(was_idle) => {
                self.stats.enqueued += 1;
                if was_idle {
                    let pipe_was_idle = pipe
                        .activate_wfq(sid, qid, self.now, &mut self.rng)
                        .unwrap_or_else(|e| e.abort());
                    if pipe_was_idle {
                        self.run_wfq(pid);
                    }
                }
                Verdict::Enqueued
            }
            Err(reason) => {
                self.stats.record_drop(reason);
                Verdict::Dropped(reason)
            }
        }
    }

    /// Advance time by one tick and return the packets that finished
    /// shaping, in completion order.
    pub fn tick(&mut self) -> Vec<ReadyPacket> {
        self.now += 1;
        self.stats.ticks += 1;
        let now = self.now;

        while self.ready.peek().is_some_and(|(t, _)| t.leq(&now)) {
            let Some((_, fr)) = self.ready.pop() else { break };
            if let Some(q) =
                self.pipes.get_mut(&fr.pipe).and_then(|p| p.fs.queue_mut(fr.queue))
            {
                q.ready_handle = None;
            }
            self.run_fixed(fr.pipe, fr.queue);
        }

        while self.wfq_ready.peek().is_some_and(|(t, _)| t.leq(&now)) {
            let Some((_, pid)) = self.wfq_ready.pop() else { break };
            if let Some(pipe) = self.pipes.get_mut(&pid) {
                pipe.wfq_handle = None;
            }
            self.run_wfq(pid);
        }

        while self.extract.peek().is_some_and(|(t, _)| t.leq(&now)) {
            let Some((_, pid)) = self.extract.pop() else { break };
            if let Some(pipe) = self.pipes.get_mut(&pid) {
                pipe.extract_handle = None;
            }
            self.deliver(pid);
        }

        for pipe in self.pipes.values_mut() {
            pipe.reclaim_idle().unwrap_or_else(|e| e.abort());
        }

        std::mem::take(&mut self.out)
    }

    /// Drain a fixed-rate queue and reschedule it if it still has backlog.
    fn run_fixed(&mut self, pid: u32, qid: u32) {
        let Some(pipe) = self.pipes.get_mut(&pid) else { return };
        let was_empty = pipe.delay_line.is_empty();
        let outcome = pipe.fixed_ready(qid, self.now).unwrap_or_else(|e| e.abort());
        if let Some(at) = outcome.reschedule {
            let handle = self.ready.insert(at, FlowRef { pipe: pid, queue: qid });
            if let Some(q) = pipe.fs.queue_mut(qid) {
                q.ready_handle = Some(handle);
            }
        }
        if outcome.moved > 0 && was_empty {
            self.deliver(pid);
        }
    }

    /// Run one WF2Q+ round on a pipe and reschedule it if it went into
    /// credit debt with backlog remaining.
    fn run_wfq(&mut self, pid: u32) {
        let Some(pipe) = self.pipes.get_mut(&pid) else { return };
        let was_empty = pipe.delay_line.is_empty();
        let outcome = pipe.wfq_run(self.now).unwrap_or_else(|e| e.abort());
        if let Some(at) = outcome.reschedule {
            pipe.wfq_handle = Some(self.wfq_ready.insert(at, pid));
        }
        if outcome.moved > 0 && was_empty {
            self.deliver(pid);
        }
    }

    /// Hand over every due delay-line packet and key the pipe's next
    /// delivery on the new head.
    fn deliver(&mut self, pid: u32) {
        let Some(pipe) = self.pipes.get_mut(&pid) else { return };
        if let Some(handle) = pipe.extract_handle.take() {
            self.extract.remove(handle).unwrap_or_else(|e| e.abort());
        }
        let mut drained = Vec::new();
        let next_due = pipe.transmit(self.now, &mut drained);
        if let Some(due) = next_due {
            pipe.extract_handle = Some(self.extract.insert(due, pid));
        }
        self.stats.delivered += drained.len() as u64;
        self.out.extend(
            drained.into_iter().map(|d| ReadyPacket { pipe: pid, flow: d.flow, packet: d.packet }),
        );
    }

    /// Create a pipe. Rejected if `id` is taken or the config is invalid.
    pub fn create_pipe(&mut self, id: u32, config: PipeConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if self.pipes.contains_key(&id) {
            return Err(ConfigError::DuplicatePipe(id));
        }
        let default_set = self.default_set_params(&config)?;
        let pipe = Pipe::new(
            id,
            self.bits_per_tick(config.bandwidth),
            duration_to_ticks(config.delay, self.hz),
            config.burst,
            config.profile.map(|p| p.samples),
            default_set,
        );
        debug!(pipe = id, bandwidth = config.bandwidth, "created pipe");
        self.pipes.insert(id, pipe);
        Ok(())
    }

    /// Reconfigure a pipe in place. Queued and in-flight packets are kept;
    /// new parameters apply from the next scheduling event.
    pub fn update_pipe(&mut self, id: u32, config: PipeConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let default_set = self.default_set_params(&config)?;
        let bandwidth = self.bits_per_tick(config.bandwidth);
        let delay = duration_to_ticks(config.delay, self.hz);
        let pipe = self.pipes.get_mut(&id).ok_or(ConfigError::UnknownPipe(id))?;
        pipe.bandwidth = bandwidth;
        pipe.delay = delay;
        pipe.burst = config.burst;
        pipe.profile = config.profile.map(|p| p.samples);
        pipe.fs.reconfigure(default_set);
        Ok(())
    }

    /// Delete a pipe together with its flowsets, queues and in-flight
    /// packets. Returns how many packets were discarded.
    pub fn delete_pipe(&mut self, id: u32) -> Result<u64, ConfigError> {
        let pipe = self.pipes.remove(&id).ok_or(ConfigError::UnknownPipe(id))?;
        if let Some(handle) = pipe.wfq_handle {
            self.wfq_ready.remove(handle).unwrap_or_else(|e| e.abort());
        }
        if let Some(handle) = pipe.extract_handle {
            self.extract.remove(handle).unwrap_or_else(|e| e.abort());
        }
        self.ready.retain(|_, fr| fr.pipe != id);
        self.set_index.retain(|_, pid| *pid != id);
        let purged = pipe.queued_packets();
        self.stats.purged += purged;
        debug!(pipe = id, purged, "deleted pipe");
        Ok(purged)
    }

    /// Attach a flowset to a pipe.
    pub fn create_flowset(&mut self, id: u32, config: FlowSetConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if self.set_index.contains_key(&id) {
            return Err(ConfigError::DuplicateFlowSet(id));
        }
        let params = Self::set_params(&config, self.hz)?;
        let pipe =
            self.pipes.get_mut(&config.pipe).ok_or(ConfigError::UnknownPipe(config.pipe))?;
        pipe.sets.insert(id, FlowSet::new(Some(id), params));
        self.set_index.insert(id, config.pipe);
        debug!(flowset = id, pipe = config.pipe, weight = config.weight, "created flowset");
        Ok(())
    }

    /// Reconfigure a flowset in place. Moving it to another pipe is
    /// rejected; delete and recreate instead.
    pub fn update_flowset(&mut self, id: u32, config: FlowSetConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let &pid = self.set_index.get(&id).ok_or(ConfigError::UnknownFlowSet(id))?;
        if pid != config.pipe {
            return Err(ConfigError::Reparent(id));
        }
        let params = Self::set_params(&config, self.hz)?;
        let pipe = self.pipes.get_mut(&pid).ok_or(ConfigError::UnknownPipe(pid))?;
        let Some(set) = pipe.sets.get_mut(&id) else {
            return Err(ConfigError::UnknownFlowSet(id));
        };
        // Scheduled flows keep contributing under the new weight.
        let contributing = set.contributing();
        let old_weight = set.weight;
        set.reconfigure(params);
        let new_weight = set.weight;
        pipe.sum = pipe.sum + contributing * new_weight - contributing * old_weight;
        Ok(())
    }

    /// Detach and delete a flowset, discarding its queued packets. Packets
    /// already on the pipe's delay line are still delivered.
    pub fn delete_flowset(&mut self, id: u32) -> Result<u64, ConfigError> {
        let pid = self.set_index.remove(&id).ok_or(ConfigError::UnknownFlowSet(id))?;
        let Some(pipe) = self.pipes.get_mut(&pid) else {
            return Err(ConfigError::UnknownPipe(pid));
        };
        let Some(set) = pipe.remove_set(id) else {
            return Err(ConfigError::UnknownFlowSet(id));
        };
        let purged = set.queued_packets();
        self.stats.purged += purged;
        debug!(flowset = id, purged, "deleted flowset");
        Ok(purged)
    }

    /// Tear down every pipe and flowset, discarding all queued and
    /// in-flight packets. Returns how many packets were discarded.
    pub fn flush(&mut self) -> u64 {
        let mut purged: u64 = self.pipes.values().map(Pipe::queued_packets).sum();
        purged += self.out.len() as u64;
        self.pipes.clear();
        self.set_index.clear();
        self.ready = Heap::new();
        self.wfq_ready = Heap::new();
        self.extract = Heap::new();
        self.out.clear();
        self.stats.purged += purged;
        debug!(purged, "flushed all configuration");
        purged
    }

    /// Snapshot every pipe, ordered by id.
    pub fn dump(&self) -> Vec<PipeSnapshot> {
        let mut pipes: Vec<&Pipe> = self.pipes.values().collect();
        pipes.sort_by_key(|p| p.id);
        pipes.iter().map(|p| Self::snapshot_pipe(p)).collect()
    }

    fn snapshot_pipe(pipe: &Pipe) -> PipeSnapshot {
        let mut sets = vec![Self::snapshot_set(&pipe.fs)];
        let mut attached: Vec<u32> = pipe.sets.keys().copied().collect();
        attached.sort_unstable();
        sets.extend(attached.iter().filter_map(|sid| pipe.set(SetRef::Id(*sid))).map(Self::snapshot_set));
        PipeSnapshot {
            id: pipe.id,
            bandwidth: pipe.bandwidth,
            delay: pipe.delay,
            burst: pipe.burst,
            v: pipe.v.raw(),
            weight_sum: pipe.sum,
            credit: pipe.credit,
            in_flight: pipe.delay_line.len(),
            sets,
        }
    }

    fn snapshot_set(set: &FlowSet) -> FlowSetSnapshot {
        let mut queues: Vec<FlowQueueSnapshot> = set
            .iter_queues()
            .map(|q| FlowQueueSnapshot {
                id: q.id,
                shared: q.shared,
                len: q.len(),
                len_bytes: q.len_bytes(),
                credit: q.credit,
                scheduled: q.ready_handle.is_some() || q.wfq != WfqPosition::Unlinked,
                tot_pkts: q.tot_pkts,
                tot_bytes: q.tot_bytes,
                drops: q.drops,
            })
            .collect();
        queues.sort_by(|a, b| b.tot_bytes.cmp(&a.tot_bytes));
        FlowSetSnapshot { id: set.id, weight: set.weight, backlogged: set.backlogged, queues }
    }

    /// Bandwidth in bits per tick. A non-zero rate below one bit per tick
    /// rounds up rather than degrading to unlimited.
    fn bits_per_tick(&self, bps: u64) -> u64 {
        if bps == 0 {
            0
        } else {
            (bps / u64::from(self.hz)).max(1)
        }
    }

    fn default_set_params(&self, config: &PipeConfig) -> Result<SetParams, ConfigError> {
        let limit = config.queue.unwrap_or_default();
        let red = match &config.red {
            Some(red) => Some(RedParams::build(red, limit.is_bytes())?),
            None => None,
        };
        Ok(SetParams {
            weight: 1,
            mask: sluice_common::FlowMask::NONE,
            buckets: 1,
            limit,
            plr: config.plr,
            red,
            expire_after: duration_to_ticks(DEFAULT_EXPIRE, self.hz),
            bucket_ratio: 16,
        })
    }

    fn set_params(config: &FlowSetConfig, hz: u32) -> Result<SetParams, ConfigError> {
        let red = match &config.red {
            Some(red) => Some(RedParams::build(red, config.queue.is_bytes())?),
            None => None,
        };
        Ok(SetParams {
            weight: u64::from(config.weight),
            mask: config.mask,
            buckets: config.buckets as usize,
            limit: config.queue,
            plr: config.plr,
            red,
            expire_after: duration_to_ticks(config.expire_after, hz),
            bucket_ratio: config.bucket_ratio as usize,
        })
    }
}

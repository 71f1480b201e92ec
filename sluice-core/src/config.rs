use std::time::Duration;

use sluice_common::{FlowMask, Tick};

use crate::{error::ConfigError, red::RedConfig};

/// Slot- or byte-based queue limit. The limit type also selects whether
/// RED measures the queue in packets or bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueLimit {
    Slots(u32),
    Bytes(u32),
}

impl Default for QueueLimit {
    fn default() -> Self {
        Self::Slots(50)
    }
}

impl QueueLimit {
    pub(crate) fn validate(self) -> Result<(), ConfigError> {
        match self {
            Self::Slots(0) | Self::Bytes(0) => Err(ConfigError::InvalidQueueLimit),
            _ => Ok(()),
        }
    }

    pub(crate) const fn is_bytes(self) -> bool {
        matches!(self, Self::Bytes(_))
    }
}

/// Delay-jitter emulation: extra transmission bits sampled per idle-to-busy
/// transition, modelling variable link airtime (preamble, retries, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayProfile {
    pub samples: Vec<u32>,
}

impl DelayProfile {
    pub fn new(samples: Vec<u32>) -> Self {
        Self { samples }
    }
}

/// Configuration for a pipe: the rate/delay-limited conduit.
///
/// Built in the builder style: `PipeConfig::new().bandwidth(..).delay(..)`.
#[derive(Debug, Clone, Default)]
pub struct PipeConfig {
    /// Bandwidth cap in bits per second. 0 means unlimited.
    pub bandwidth: u64,
    /// Propagation delay.
    pub delay: Duration,
    /// Bytes that may be sent at full speed after an idle period.
    pub burst: u64,
    /// Queue limit of the pipe's own (fixed-rate) queue set.
    pub queue: Option<QueueLimit>,
    /// Random packet loss rate in [0, 1] on the fixed-rate path.
    pub plr: f64,
    /// Optional RED parameters for the fixed-rate path.
    pub red: Option<RedConfig>,
    /// Optional delay-jitter profile.
    pub profile: Option<DelayProfile>,
}

impl PipeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bandwidth cap in bits per second.
    pub fn bandwidth(mut self, bps: u64) -> Self {
        self.bandwidth = bps;
        self
    }

    /// Set the propagation delay.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the post-idle burst allowance in bytes.
    pub fn burst(mut self, bytes: u64) -> Self {
        self.burst = bytes;
        self
    }

    /// Set the queue limit of the fixed-rate path.
    pub fn queue(mut self, limit: QueueLimit) -> Self {
        self.queue = Some(limit);
        self
    }

    /// Set the random packet loss rate on the fixed-rate path.
    pub fn plr(mut self, plr: f64) -> Self {
        self.plr = plr;
        self
    }

    /// Enable RED on the fixed-rate path.
    pub fn red(mut self, red: RedConfig) -> Self {
        self.red = Some(red);
        self
    }

    /// Set a delay-jitter profile.
    pub fn profile(mut self, profile: DelayProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.plr) {
            return Err(ConfigError::InvalidLossRate(self.plr));
        }
        if let Some(limit) = self.queue {
            limit.validate()?;
        }
        if let Some(profile) = &self.profile {
            if profile.samples.is_empty() {
                return Err(ConfigError::EmptyProfile);
            }
        }
        Ok(())
    }
}

/// Configuration for a flowset: a group of per-flow queues sharing a
/// fairness/RED policy, attached to one pipe (WF2Q+ path).
#[derive(Debug, Clone)]
pub struct FlowSetConfig {
    /// Parent pipe id.
    pub pipe: u32,
    /// WF2Q+ weight, 1..=100.
    pub weight: u32,
    /// Which 5-tuple fields distinguish flows.
    pub mask: FlowMask,
    /// Hash bucket count, a power of two in 1..=65536.
    pub buckets: u32,
    /// Per-flow queue limit.
    pub queue: QueueLimit,
    /// Random packet loss rate in [0, 1].
    pub plr: f64,
    /// Optional RED parameters.
    pub red: Option<RedConfig>,
    /// Reap flow queues idle for at least this long.
    pub expire_after: Duration,
    /// Overflow threshold: alias new flows onto the shared queue once the
    /// table holds more than `buckets * bucket_ratio` queues.
    pub bucket_ratio: u32,
}

impl FlowSetConfig {
    pub fn new(pipe: u32) -> Self {
        Self {
            pipe,
            weight: 1,
            mask: FlowMask::ALL,
            buckets: 64,
            queue: QueueLimit::default(),
            plr: 0.0,
            red: None,
            expire_after: Duration::from_secs(5),
            bucket_ratio: 16,
        }
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn mask(mut self, mask: FlowMask) -> Self {
        self.mask = mask;
        self
    }

    pub fn buckets(mut self, buckets: u32) -> Self {
        self.buckets = buckets;
        self
    }

    pub fn queue(mut self, limit: QueueLimit) -> Self {
        self.queue = limit;
        self
    }

    pub fn plr(mut self, plr: f64) -> Self {
        self.plr = plr;
        self
    }

    pub fn red(mut self, red: RedConfig) -> Self {
        self.red = Some(red);
        self
    }

    pub fn expire_after(mut self, after: Duration) -> Self {
        self.expire_after = after;
        self
    }

    pub fn bucket_ratio(mut self, ratio: u32) -> Self {
        self.bucket_ratio = ratio;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.weight == 0 || self.weight > 100 {
            return Err(ConfigError::InvalidWeight(self.weight));
        }
        if !self.buckets.is_power_of_two() || self.buckets > 65536 {
            return Err(ConfigError::InvalidBuckets(self.buckets));
        }
        if self.bucket_ratio == 0 {
            return Err(ConfigError::InvalidBuckets(self.bucket_ratio));
        }
        if !(0.0..=1.0).contains(&self.plr) {
            return Err(ConfigError::InvalidLossRate(self.plr));
        }
        self.queue.validate()
    }
}

/// Convert a wall-clock duration to whole ticks at the given tick rate.
pub(crate) fn duration_to_ticks(d: Duration, hz: u32) -> Tick {
    (d.as_nanos() * u128::from(hz) / 1_000_000_000) as Tick
}

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};

use sluice_common::{FiveTuple, Packet};
use sluice_core::{
    ConfigError, Engine, EngineConfig, EngineStats, FlowSetConfig, PipeConfig, PipeSnapshot,
    ReadyPacket, Target, Verdict,
};

use crate::driver;

/// Shaper construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct ShaperConfig {
    /// Scheduler ticks per second.
    pub hz: u32,
    /// RNG seed for loss and RED decisions; random when absent.
    pub seed: Option<u64>,
    /// Capacity of the shaped-packet channel, in per-tick batches.
    pub channel_capacity: usize,
}

impl Default for ShaperConfig {
    fn default() -> Self {
        Self { hz: 1000, seed: None, channel_capacity: 64 }
    }
}

impl ShaperConfig {
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

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

/// Thread-safe handle to a shaping engine.
///
/// All configuration and data-plane calls take the engine lock briefly;
/// the lock is never held across an await point. Clone the handle freely,
/// every clone drives the same engine.
#[derive(Debug, Clone)]
pub struct Shaper {
    engine: Arc<Mutex<Engine>>,
    interval: Duration,
    channel_capacity: usize,
}

impl Shaper {
    pub fn new(config: ShaperConfig) -> Self {
        let engine = EngineConfig { hz: config.hz, seed: config.seed };
        Self {
            engine: Arc::new(Mutex::new(Engine::new(engine))),
            interval: Duration::from_secs(1) / config.hz,
            channel_capacity: config.channel_capacity,
        }
    }

    /// Start the tick driver.
    ///
    /// Returns the driver task handle and the channel on which shaped
    /// packets arrive in per-tick batches. The driver stops when the
    /// receiver is dropped.
    pub fn run(&self) -> (JoinHandle<()>, mpsc::Receiver<Vec<ReadyPacket>>) {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let handle = tokio::spawn(driver::run(Arc::clone(&self.engine), self.interval, tx));
        (handle, rx)
    }

    /// Submit one packet for shaping.
    pub fn shape(&self, target: Target, tuple: FiveTuple, packet: Packet) -> Verdict {
        self.engine.lock().shape(target, tuple, packet)
    }

    pub fn create_pipe(&self, id: u32, config: PipeConfig) -> Result<(), ConfigError> {
        self.engine.lock().create_pipe(id, config)
    }

    pub fn update_pipe(&self, id: u32, config: PipeConfig) -> Result<(), ConfigError> {
        self.engine.lock().update_pipe(id, config)
    }

    /// Delete a pipe, discarding its backlog. Returns the discard count.
    pub fn delete_pipe(&self, id: u32) -> Result<u64, ConfigError> {
        self.engine.lock().delete_pipe(id)
    }

    pub fn create_flowset(&self, id: u32, config: FlowSetConfig) -> Result<(), ConfigError> {
        self.engine.lock().create_flowset(id, config)
    }

    pub fn update_flowset(&self, id: u32, config: FlowSetConfig) -> Result<(), ConfigError> {
        self.engine.lock().update_flowset(id, config)
    }

    /// Delete a flowset, discarding its backlog. Returns the discard count.
    pub fn delete_flowset(&self, id: u32) -> Result<u64, ConfigError> {
        self.engine.lock().delete_flowset(id)
    }

    /// Tear down all configuration. Returns the discard count.
    pub fn flush(&self) -> u64 {
        self.engine.lock().flush()
    }

    /// Snapshot every pipe, ordered by id.
    pub fn dump(&self) -> Vec<PipeSnapshot> {
        self.engine.lock().dump()
    }

    pub fn stats(&self) -> EngineStats {
        self.engine.lock().stats()
    }
}

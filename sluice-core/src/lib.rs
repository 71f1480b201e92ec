//! Tick-driven traffic shaping: pipes, flowsets and per-flow queues.
//!
//! The [`Engine`] owns every configured object and advances in discrete
//! ticks. Packets enter through [`Engine::shape`] addressed at a pipe (the
//! fixed-rate path) or a flowset (the WF2Q+ weighted fair queuing path),
//! and come back out of [`Engine::tick`] once they have paid for their
//! bandwidth and waited out the propagation delay. Admission control
//! (queue limits, random loss, RED) runs at enqueue time.
//!
//! This crate is the synchronous core; the `sluice` crate wraps it in a
//! lock and a tokio driver task.

#![doc(issue_tracker_base_url = "https://github.com/chainbound/sluice/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod config;
mod engine;
mod error;
mod flowset;
mod heap;
mod pipe;
mod queue;
mod red;
mod stats;
mod vtime;

pub use config::{DelayProfile, FlowSetConfig, PipeConfig, QueueLimit};
pub use engine::{Engine, EngineConfig, ReadyPacket, Target, Verdict};
pub use error::{ConfigError, DropReason, InvariantViolation};
pub use heap::{Heap, HeapHandle, HeapKey};
pub use red::RedConfig;
pub use stats::{EngineStats, FlowQueueSnapshot, FlowSetSnapshot, PipeSnapshot};
pub use vtime::VirtualTime;

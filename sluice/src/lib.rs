//! Async front end for the sluice traffic-shaping engine.
//!
//! A [`Shaper`] owns an [`Engine`](sluice_core::Engine) behind a single
//! lock and runs a background tokio task that advances it at the
//! configured tick rate, with drift correction. Shaped packets are
//! delivered in per-tick batches over an mpsc channel.
//!
//! ```no_run
//! use std::time::Duration;
//! use sluice::{PipeConfig, Shaper, ShaperConfig, Target};
//! use sluice_common::{FiveTuple, Packet};
//!
//! # #[tokio::main] async fn main() {
//! let shaper = Shaper::new(ShaperConfig::default());
//! shaper
//!     .create_pipe(1, PipeConfig::new().bandwidth(1_000_000).delay(Duration::from_millis(20)))
//!     .unwrap();
//!
//! let (_driver, mut shaped) = shaper.run();
//! shaper.shape(Target::Pipe(1), FiveTuple::zero(), Packet::zeroed(1500));
//! let batch = shaped.recv().await.unwrap();
//! println!("{} packet(s) out", batch.len());
//! # }
//! ```

#![doc(issue_tracker_base_url = "https://github.com/chainbound/sluice/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod driver;
mod shaper;

pub use shaper::{Shaper, ShaperConfig};

pub use sluice_core::{
    ConfigError, DelayProfile, DropReason, EngineStats, FlowQueueSnapshot, FlowSetConfig,
    FlowSetSnapshot, PipeConfig, PipeSnapshot, QueueLimit, ReadyPacket, RedConfig, Target,
    Verdict,
};

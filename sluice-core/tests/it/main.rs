//! Integration tests driving the engine through its public API only.

mod fairness;
mod shaping;

use std::net::Ipv4Addr;

use sluice_common::FiveTuple;
use sluice_core::{Engine, EngineConfig};

/// An engine at 1 Hz with a fixed seed: one tick is one second, so rate
/// and delay arithmetic in the tests stays exact.
pub(crate) fn engine() -> Engine {
    let _ = tracing_subscriber::fmt::try_init();
    Engine::new(EngineConfig::new().hz(1).seed(0xBEEF))
}

pub(crate) fn tuple(port: u16) -> FiveTuple {
    FiveTuple::v4(6, Ipv4Addr::new(192, 168, 0, 1), Ipv4Addr::new(192, 168, 0, 2), port, 443)
}

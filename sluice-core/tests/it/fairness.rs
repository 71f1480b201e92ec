use sluice_common::Packet;
use sluice_core::{FlowSetConfig, PipeConfig, Target, Verdict};

use crate::{engine, tuple};

/// Run ticks until `want` packets came out, returning the source ports in
/// delivery order. Panics if the engine stalls.
fn drain_ordered(engine: &mut sluice_core::Engine, want: usize) -> Vec<u16> {
    let mut ports = Vec::new();
    for _ in 0..10 * want {
        ports.extend(engine.tick().iter().map(|pkt| pkt.flow.src_port));
        if ports.len() >= want {
            ports.truncate(want);
            return ports;
        }
    }
    panic!("engine stalled after {}/{want} deliveries", ports.len());
}

#[test]
fn weights_share_bandwidth_three_to_one() {
    // Both flows keep a standing backlog. Once past the first service,
    // every 4-service window carries exactly 3 packets of the weight-3
    // flow and 1 of the weight-1 flow.
    let mut engine = engine();
    engine.create_pipe(1, PipeConfig::new().bandwidth(8000)).unwrap();
    engine.create_flowset(10, FlowSetConfig::new(1).weight(1)).unwrap();
    engine.create_flowset(20, FlowSetConfig::new(1).weight(3)).unwrap();

    for _ in 0..30 {
        assert_eq!(
            engine.shape(Target::FlowSet(10), tuple(1000), Packet::zeroed(1000)),
            Verdict::Enqueued
        );
        assert_eq!(
            engine.shape(Target::FlowSet(20), tuple(2000), Packet::zeroed(1000)),
            Verdict::Enqueued
        );
    }

    let ports = drain_ordered(&mut engine, 41);
    for (i, window) in ports[1..].chunks_exact(4).enumerate() {
        let heavy = window.iter().filter(|p| **p == 2000).count();
        assert_eq!(heavy, 3, "window {i} served {window:?}");
    }
}

#[test]
fn equal_flows_in_one_set_split_evenly() {
    // Two flows classified into the same flowset each carry the set's
    // weight, so a shared bottleneck splits evenly between them.
    let mut engine = engine();
    engine.create_pipe(1, PipeConfig::new().bandwidth(8000)).unwrap();
    engine.create_flowset(10, FlowSetConfig::new(1)).unwrap();

    for _ in 0..20 {
        engine.shape(Target::FlowSet(10), tuple(1), Packet::zeroed(1000));
        engine.shape(Target::FlowSet(10), tuple(2), Packet::zeroed(1000));
    }

    let ports = drain_ordered(&mut engine, 20);
    for port in [1, 2] {
        let n = ports.iter().filter(|p| **p == port).count();
        assert!((9..=11).contains(&n), "flow {port} got {n}/20");
    }
}

#[test]
fn backlogged_heavy_flow_cannot_starve_newcomer() {
    // The heavy flow has been hogging the pipe for a while when a light
    // flow appears; the newcomer must start receiving service promptly
    // instead of waiting out the heavy flow's accumulated virtual time.
    let mut engine = engine();
    engine.create_pipe(1, PipeConfig::new().bandwidth(8000)).unwrap();
    engine.create_flowset(10, FlowSetConfig::new(1).weight(9)).unwrap();
    engine.create_flowset(20, FlowSetConfig::new(1).weight(1)).unwrap();

    for _ in 0..100 {
        engine.shape(Target::FlowSet(10), tuple(1000), Packet::zeroed(1000));
    }
    for _ in 0..20 {
        engine.tick();
    }

    for _ in 0..10 {
        engine.shape(Target::FlowSet(20), tuple(2000), Packet::zeroed(1000));
    }
    let ports = drain_ordered(&mut engine, 40);
    let newcomer = ports.iter().filter(|p| **p == 2000).count();
    assert!(newcomer >= 3, "newcomer served {newcomer}/40 after joining");
}

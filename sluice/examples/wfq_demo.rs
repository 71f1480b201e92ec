//! Two flows sharing a 1 Mbit/s pipe under weighted fair queuing.
//!
//! Run with `cargo run --example wfq_demo`.

use std::{net::Ipv4Addr, time::Duration};

use sluice::{FlowSetConfig, PipeConfig, Shaper, ShaperConfig, Target};
use sluice_common::{constants::Mbit, FiveTuple, Packet};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let shaper = Shaper::new(ShaperConfig::default());
    shaper
        .create_pipe(1, PipeConfig::new().bandwidth(Mbit).delay(Duration::from_millis(10)))
        .unwrap();
    shaper.create_flowset(10, FlowSetConfig::new(1).weight(1)).unwrap();
    shaper.create_flowset(20, FlowSetConfig::new(1).weight(3)).unwrap();

    let (driver, mut shaped) = shaper.run();

    let bulk = FiveTuple::v4(6, Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 5000, 80);
    let voip = FiveTuple::v4(17, Ipv4Addr::new(10, 0, 0, 3), Ipv4Addr::new(10, 0, 0, 4), 4000, 5060);

    // Saturate the pipe from both flows.
    for _ in 0..200 {
        shaper.shape(Target::FlowSet(10), bulk, Packet::zeroed(1000));
        shaper.shape(Target::FlowSet(20), voip, Packet::zeroed(1000));
    }

    let mut per_flow = [0u64; 2];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(1500);
    while let Ok(Some(batch)) = tokio::time::timeout_at(deadline, shaped.recv()).await {
        for pkt in batch {
            if pkt.flow == bulk {
                per_flow[0] += 1;
            } else {
                per_flow[1] += 1;
            }
        }
    }

    println!("weight 1 flow delivered {} packets", per_flow[0]);
    println!("weight 3 flow delivered {} packets", per_flow[1]);
    println!("stats: {:?}", shaper.stats());

    driver.abort();
}

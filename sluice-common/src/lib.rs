#![doc(issue_tracker_base_url = "https://github.com/chainbound/sluice/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod clock;
mod flow;
mod packet;

pub use clock::{Tick, TickClock};
pub use flow::{flow_hash, FiveTuple, FlowMask};
pub use packet::Packet;

#[allow(non_upper_case_globals)]
pub mod constants {
    /// Bits per kilobit.
    pub const Kbit: u64 = 1000;
    /// Bits per megabit.
    pub const Mbit: u64 = 1000 * Kbit;
    /// Bits per gigabit.
    pub const Gbit: u64 = 1000 * Mbit;
}

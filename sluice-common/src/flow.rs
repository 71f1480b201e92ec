use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// The protocol/address/port 5-tuple the classifier attaches to a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiveTuple {
    pub proto: u8,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FiveTuple {
    pub fn new(proto: u8, src: IpAddr, dst: IpAddr, src_port: u16, dst_port: u16) -> Self {
        Self { proto, src, dst, src_port, dst_port }
    }

    /// Shorthand for an IPv4 tuple.
    pub fn v4(proto: u8, src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16) -> Self {
        Self::new(proto, IpAddr::V4(src), IpAddr::V4(dst), src_port, dst_port)
    }

    /// The all-zero tuple. Used as the identity of shared (overflow) queues
    /// and of single-queue flowsets with an empty mask.
    pub fn zero() -> Self {
        Self::v4(0, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, 0, 0)
    }
}

/// Field mask selecting which 5-tuple fields distinguish flows in a flowset.
///
/// Fields are combined bitwise, so partial masks (e.g. a /24 on the source
/// address) group whole prefixes into one flow. An all-zero mask collapses
/// every packet into a single queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowMask {
    pub proto: u8,
    pub src_ip: u32,
    pub dst_ip: u32,
    pub src_ip6: u128,
    pub dst_ip6: u128,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FlowMask {
    /// Match nothing: all packets share one queue.
    pub const NONE: Self = Self {
        proto: 0,
        src_ip: 0,
        dst_ip: 0,
        src_ip6: 0,
        dst_ip6: 0,
        src_port: 0,
        dst_port: 0,
    };

    /// Match everything: one queue per exact 5-tuple.
    pub const ALL: Self = Self {
        proto: u8::MAX,
        src_ip: u32::MAX,
        dst_ip: u32::MAX,
        src_ip6: u128::MAX,
        dst_ip6: u128::MAX,
        src_port: u16::MAX,
        dst_port: u16::MAX,
    };

    /// Whether this mask distinguishes any field at all.
    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    /// Apply the mask, producing the flow identity of `tuple`.
    pub fn apply(&self, tuple: &FiveTuple) -> FiveTuple {
        let src = mask_addr(tuple.src, self.src_ip, self.src_ip6);
        let dst = mask_addr(tuple.dst, self.dst_ip, self.dst_ip6);
        FiveTuple {
            proto: tuple.proto & self.proto,
            src,
            dst,
            src_port: tuple.src_port & self.src_port,
            dst_port: tuple.dst_port & self.dst_port,
        }
    }
}

fn mask_addr(addr: IpAddr, mask4: u32, mask6: u128) -> IpAddr {
    match addr {
        IpAddr::V4(a) => IpAddr::V4(Ipv4Addr::from(u32::from(a) & mask4)),
        IpAddr::V6(a) => IpAddr::V6(Ipv6Addr::from(u128::from(a) & mask6)),
    }
}

/// Fold a (masked) tuple into a bucket hash.
///
/// Separate v4/v6 folds: v4 mixes the halves of both addresses directly,
/// v6 first folds the 128-bit addresses down to 32 bits word by word.
/// Callers reduce the result modulo their bucket count.
pub fn flow_hash(tuple: &FiveTuple) -> u32 {
    match (tuple.src, tuple.dst) {
        (IpAddr::V4(s), IpAddr::V4(d)) => {
            let s = u32::from(s);
            let d = u32::from(d);
            (d & 0xffff)
                ^ (d >> 15)
                ^ (s << 1)
                ^ (s >> 16)
                ^ (u32::from(tuple.dst_port) << 1)
                ^ u32::from(tuple.src_port)
                ^ u32::from(tuple.proto)
        }
        _ => {
            let s = fold_v6(tuple.src);
            let d = fold_v6(tuple.dst);
            (d & 0xffff)
                ^ (d >> 15)
                ^ (s << 1)
                ^ (s >> 16)
                ^ (u32::from(tuple.dst_port) << 1)
                ^ u32::from(tuple.src_port)
                ^ u32::from(tuple.proto)
        }
    }
}

fn fold_v6(addr: IpAddr) -> u32 {
    let bits = match addr {
        IpAddr::V6(a) => u128::from(a),
        IpAddr::V4(a) => u128::from(u32::from(a)),
    };
    let mut acc = 0u32;
    for i in 0..4 {
        acc ^= (bits >> (32 * i)) as u32;
    }
    acc
}

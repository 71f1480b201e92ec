/// Fixed-point virtual time for WF2Q+ ordering.
///
/// Q48.16: the low [`VirtualTime::FRAC_BITS`] bits are fractional. One whole
/// unit corresponds to one byte of service at weight 1, so `len / weight`
/// keeps sub-byte precision for weighted flows. The counter is monotonic but
/// allowed to wrap; all comparisons are wrapping ([`VirtualTime::leq`]), the
/// same discipline the tick heaps use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VirtualTime(u64);

impl VirtualTime {
    /// Number of fractional bits in the fixed-point representation.
    pub const FRAC_BITS: u32 = 16;

    pub const ZERO: Self = Self(0);

    /// Construct from a raw fixed-point value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw fixed-point value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// The virtual-time cost of serving `len_bytes` at the given weight:
    /// `len / weight` in fixed point.
    pub fn service(len_bytes: u64, weight: u64) -> Self {
        debug_assert!(weight > 0);
        Self((len_bytes << Self::FRAC_BITS) / weight)
    }

    /// Wrapping addition.
    #[must_use]
    pub const fn add(self, delta: Self) -> Self {
        Self(self.0.wrapping_add(delta.0))
    }

    /// Wrapping `self <= other`.
    pub const fn leq(self, other: Self) -> bool {
        other.0.wrapping_sub(self.0) as i64 >= 0
    }

    /// Wrapping `self < other`.
    pub const fn lt(self, other: Self) -> bool {
        (other.0.wrapping_sub(self.0) as i64) > 0
    }

    /// The later of the two timestamps, in wrapping order.
    #[must_use]
    pub fn latest(self, other: Self) -> Self {
        if self.leq(other) {
            other
        } else {
            self
        }
    }

    /// The idle sentinel for a flow whose last finish timestamp was `f`:
    /// one raw unit past `f`, an otherwise impossible start time. A flow
    /// carrying this start value holds no stale virtual-time state.
    #[must_use]
    pub const fn sentinel_after(f: Self) -> Self {
        Self(f.0.wrapping_add(1))
    }
}

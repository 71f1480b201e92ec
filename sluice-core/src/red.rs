use rand::{rngs::StdRng, Rng};

use sluice_common::Tick;

use crate::error::ConfigError;

/// Fixed-point scale used by all RED arithmetic (Q16).
pub(crate) const SCALE_BITS: u32 = 16;
pub(crate) const SCALE: u64 = 1 << SCALE_BITS;

/// Entries in the idle-decay lookup table.
const LOOKUP_DEPTH: usize = 256;

#[inline]
fn scale_mul(a: u64, b: u64) -> u64 {
    (a * b) >> SCALE_BITS
}

/// User-facing RED configuration.
///
/// Thresholds are expressed in queue units: slots for a slot-limited queue,
/// bytes for a byte-limited one (byte mode is derived from the owning
/// queue's limit type).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RedConfig {
    /// EWMA weight, in (0, 1].
    pub w_q: f64,
    /// Average-queue threshold below which every packet is accepted.
    pub min_th: u32,
    /// Threshold at which packets are dropped outright (or, in gentle
    /// mode, at which the secondary linear region starts).
    pub max_th: u32,
    /// Maximum drop probability at `max_th`, in (0, 1].
    pub max_p: f64,
    /// Gentle RED: between `max_th` and `2 * max_th` the drop probability
    /// ramps linearly from `max_p` to 1 instead of jumping to a hard drop.
    pub gentle: bool,
    /// Largest expected packet size, used to scale byte-mode probabilities.
    pub max_pkt_size: u32,
    /// Ticks per step of the idle-decay lookup table.
    pub lookup_step: u32,
}

impl RedConfig {
    pub fn new(w_q: f64, min_th: u32, max_th: u32, max_p: f64) -> Self {
        Self { w_q, min_th, max_th, max_p, gentle: false, max_pkt_size: 1500, lookup_step: 1 }
    }

    pub fn gentle(mut self) -> Self {
        self.gentle = true;
        self
    }

    pub fn max_pkt_size(mut self, bytes: u32) -> Self {
        self.max_pkt_size = bytes;
        self
    }

    pub fn lookup_step(mut self, ticks: u32) -> Self {
        self.lookup_step = ticks;
        self
    }
}

/// Precomputed RED constants for one flowset, all in Q16.
#[derive(Debug, Clone)]
pub(crate) struct RedParams {
    w_q: u64,
    min_th: u64,
    max_th: u64,
    /// Slope/offset of the linear region between the thresholds.
    c1: u64,
    c2: u64,
    /// Slope/offset of the gentle region above `max_th` (signed: the offset
    /// is negative for `max_p > 0.5`).
    c3: i64,
    c4: i64,
    gentle: bool,
    pub(crate) byte_mode: bool,
    max_pkt_size: u64,
    /// `lookup[t]` is the decay factor for an idle period of about
    /// `(t + 1) * lookup_step` ticks; beyond the table the average
    /// collapses to zero.
    lookup: Vec<u64>,
    lookup_step: u64,
}

/// Per-queue RED state.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RedState {
    /// EWMA of the queue size, Q16 in queue units.
    pub(crate) avg: u64,
    /// Packets accepted since the last drop (or -1 right after an
    /// under-`min_th` accept).
    pub(crate) count: i64,
    /// Current random threshold, Q16 fraction of one.
    pub(crate) random: u64,
}

impl RedParams {
    pub(crate) fn build(cfg: &RedConfig, byte_mode: bool) -> Result<Self, ConfigError> {
        if !(cfg.w_q > 0.0 && cfg.w_q <= 1.0) {
            return Err(ConfigError::InvalidRed("w_q must be in (0, 1]"));
        }
        if cfg.min_th > cfg.max_th {
            return Err(ConfigError::InvalidRed("min_th must not exceed max_th"));
        }
        if cfg.max_th == 0 {
            return Err(ConfigError::InvalidRed("max_th must be non-zero"));
        }
        if !(cfg.max_p > 0.0 && cfg.max_p <= 1.0) {
            return Err(ConfigError::InvalidRed("max_p must be in (0, 1]"));
        }
        if cfg.max_pkt_size == 0 {
            return Err(ConfigError::InvalidRed("max_pkt_size must be non-zero"));
        }
        if cfg.lookup_step == 0 {
            return Err(ConfigError::InvalidRed("lookup_step must be non-zero"));
        }

        let span = f64::from(cfg.max_th - cfg.min_th);
        let (c1, c2) = if span > 0.0 {
            let c1 = (cfg.max_p / span * SCALE as f64) as u64;
            let c2 = (cfg.max_p * f64::from(cfg.min_th) / span * SCALE as f64) as u64;
            (c1, c2)
        } else {
            (0, 0)
        };
        // Gentle region: probability max_p at max_th rising to 1 at 2*max_th.
        let c3 = ((1.0 - cfg.max_p) / f64::from(cfg.max_th) * SCALE as f64) as i64;
        let c4 = ((1.0 - 2.0 * cfg.max_p) * SCALE as f64) as i64;

        // Decay table for idle periods: (1 - w_q)^((t + 1) * lookup_step),
        // built by repeated fixed-point multiplication like the running
        // average itself, so table and EWMA agree on rounding.
        let step_weight = ((1.0 - cfg.w_q).powi(cfg.lookup_step as i32) * SCALE as f64) as u64;
        let mut lookup = Vec::with_capacity(LOOKUP_DEPTH);
        let mut factor = step_weight;
        for _ in 0..LOOKUP_DEPTH {
            lookup.push(factor);
            factor = scale_mul(factor, step_weight);
            if factor == 0 {
                break;
            }
        }

        Ok(Self {
            w_q: (cfg.w_q * SCALE as f64) as u64,
            min_th: u64::from(cfg.min_th) << SCALE_BITS,
            max_th: u64::from(cfg.max_th) << SCALE_BITS,
            c1,
            c2,
            c3,
            c4,
            gentle: cfg.gentle,
            byte_mode,
            max_pkt_size: u64::from(cfg.max_pkt_size),
            lookup,
            lookup_step: u64::from(cfg.lookup_step),
        })
    }

    /// Drop probability (Q16) at a given average, or `None` for a hard drop.
    ///
    /// Non-decreasing in `avg` over the whole range.
    pub(crate) fn probability(&self, avg: u64) -> Option<u64> {
        if avg < self.min_th {
            return Some(0);
        }
        if avg >= self.max_th {
            if self.gentle && avg < 2 * self.max_th {
                let p = (self.c3.saturating_mul(avg as i64) >> SCALE_BITS) - self.c4;
                return Some(p.clamp(0, SCALE as i64) as u64);
            }
            return None;
        }
        Some(scale_mul(self.c1, avg).saturating_sub(self.c2))
    }

    /// The RED arrival decision for one packet: update the average, then
    /// decide whether to drop. `q_size` is the current queue occupancy in
    /// queue units (packet not yet counted); `idle_ticks` is set when the
    /// queue is currently empty.
    pub(crate) fn drops(
        &self,
        state: &mut RedState,
        q_size: u64,
        pkt_len: u64,
        idle_ticks: Option<Tick>,
        rng: &mut StdRng,
    ) -> bool {
        match idle_ticks {
            // Queue empty: decay the average for the time we were idle.
            Some(idle) => {
                let t = (idle / self.lookup_step) as usize;
                state.avg = match self.lookup.get(t) {
                    Some(&factor) => scale_mul(state.avg, factor),
                    None => 0,
                };
            }
            // Queue busy: avg += w_q * (q_size - avg).
            None => {
                let scaled = q_size << SCALE_BITS;
                let diff = scaled as i64 - state.avg as i64;
                state.avg = (state.avg as i64 + ((diff * self.w_q as i64) >> SCALE_BITS)) as u64;
            }
        }

        if state.avg < self.min_th {
            state.count = -1;
            return false;
        }

        let mut p_b = match self.probability(state.avg) {
            Some(p) => p,
            None => return true,
        };
        if self.byte_mode {
            p_b = p_b * pkt_len / self.max_pkt_size;
        }

        state.count += 1;
        if state.count == 0 {
            // Count wrapped past the under-threshold reset: new threshold.
            state.random = rng.gen_range(0..SCALE);
        } else if state.count as u64 * p_b > state.random {
            state.count = 0;
            state.random = rng.gen_range(0..SCALE);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn params() -> RedParams {
        RedParams::build(&RedConfig::new(0.002, 5, 15, 0.1), false).unwrap()
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(RedParams::build(&RedConfig::new(0.0, 5, 15, 0.1), false).is_err());
        assert!(RedParams::build(&RedConfig::new(1.5, 5, 15, 0.1), false).is_err());
        assert!(RedParams::build(&RedConfig::new(0.1, 20, 15, 0.1), false).is_err());
        assert!(RedParams::build(&RedConfig::new(0.1, 5, 15, 0.0), false).is_err());
        assert!(RedParams::build(&RedConfig::new(0.1, 5, 15, 1.2), false).is_err());
    }

    #[test]
    fn probability_is_monotonic() {
        let red = params();
        let mut prev = 0;
        for units in 0..15 {
            for frac in [0u64, SCALE / 4, SCALE / 2] {
                let avg = (units << SCALE_BITS) + frac;
                let p = red.probability(avg).expect("below max_th");
                assert!(p >= prev, "p dropped from {prev} to {p} at avg {avg}");
                assert!(p <= SCALE);
                prev = p;
            }
        }
        // Hard drop at and beyond max_th in non-gentle mode.
        assert!(red.probability(15 << SCALE_BITS).is_none());
        assert!(red.probability(40 << SCALE_BITS).is_none());
    }

    #[test]
    fn probability_endpoints() {
        let red = params();
        assert_eq!(red.probability(5 << SCALE_BITS), Some(0));
        // Just under max_th the probability approaches max_p = 0.1.
        let p = red.probability((15 << SCALE_BITS) - 1).unwrap();
        let max_p = (0.1 * SCALE as f64) as u64;
        assert!(p <= max_p && p > max_p * 9 / 10, "p = {p}, max_p = {max_p}");
    }

    #[test]
    fn gentle_mode_ramps_to_one() {
        let red = RedParams::build(&RedConfig::new(0.002, 5, 15, 0.1).gentle(), false).unwrap();
        let at_max = red.probability(15 << SCALE_BITS).unwrap();
        let mid = red.probability(22 << SCALE_BITS).unwrap();
        let near_double = red.probability((30 << SCALE_BITS) - 1).unwrap();
        assert!(at_max < mid && mid < near_double);
        assert!(near_double <= SCALE);
        // At 2 * max_th and beyond it is a hard drop.
        assert!(red.probability(30 << SCALE_BITS).is_none());
    }

    #[test]
    fn idle_decay_collapses_to_zero() {
        let red = params();
        let mut rng = StdRng::seed_from_u64(7);
        let mut state = RedState { avg: 10 << SCALE_BITS, count: 0, random: 0 };

        // Short idle period decays but does not zero the average.
        red.drops(&mut state, 0, 100, Some(10), &mut rng);
        assert!(state.avg > 0 && state.avg < 10 << SCALE_BITS);

        // Beyond the lookup table the average collapses outright.
        state.avg = 10 << SCALE_BITS;
        red.drops(&mut state, 0, 100, Some(1 << 20), &mut rng);
        assert_eq!(state.avg, 0);
    }

    #[test]
    fn below_min_th_resets_count() {
        let red = params();
        let mut rng = StdRng::seed_from_u64(7);
        let mut state = RedState { avg: 0, count: 17, random: 0 };
        assert!(!red.drops(&mut state, 1, 100, None, &mut rng));
        assert_eq!(state.count, -1);
    }

    #[test]
    fn sustained_congestion_eventually_drops() {
        let red = params();
        let mut rng = StdRng::seed_from_u64(42);
        let mut state = RedState::default();

        let mut dropped = 0;
        for _ in 0..5_000 {
            if red.drops(&mut state, 12, 100, None, &mut rng) {
                // Every drop resets the spacing counter and redraws the
                // random threshold.
                assert_eq!(state.count, 0);
                dropped += 1;
            }
        }
        assert!(dropped > 0, "no drops under sustained congestion");
        assert!(dropped < 5_000, "early drop must not degrade to tail drop");
    }
}

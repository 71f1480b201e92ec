use std::time::{Duration, Instant};

/// The scheduler's discrete time unit. Nominally one fixed wall-clock
/// interval, but the scheduler itself only ever sees tick counts.
pub type Tick = u64;

/// Drift-corrected mapping from wall-clock time to scheduler ticks.
///
/// Timer events can be coalesced or delayed by the host; instead of letting
/// the scheduler's notion of time silently diverge, [`TickClock::due`]
/// computes how many whole ticks have elapsed since the last call and jumps
/// forward by that amount. Catch-up jumps (more than one tick per call) are
/// recorded in [`TickClock::adjustments`].
#[derive(Debug)]
pub struct TickClock {
    origin: Instant,
    tick: Duration,
    ticks: Tick,
    adjustments: u64,
}

impl TickClock {
    /// A clock with the given tick interval, starting now.
    pub fn new(tick: Duration) -> Self {
        Self::starting_at(Instant::now(), tick)
    }

    /// A clock with an explicit origin, for callers that drive it manually.
    pub fn starting_at(origin: Instant, tick: Duration) -> Self {
        assert!(!tick.is_zero(), "tick interval must be non-zero");
        Self { origin, tick, ticks: 0, adjustments: 0 }
    }

    /// How many ticks are due at `now`.
    ///
    /// Returns 0 if the next tick boundary has not been reached yet. Returns
    /// more than 1 when wall-clock drift has accumulated past a full tick;
    /// the caller is expected to run that many scheduler ticks back to back.
    pub fn due(&mut self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.origin);
        let target = (elapsed.as_nanos() / self.tick.as_nanos()) as u64;
        let n = target.saturating_sub(self.ticks);
        if n > 1 {
            self.adjustments += n - 1;
        }
        self.ticks = target;
        n
    }

    /// Total ticks handed out so far.
    pub fn ticks(&self) -> Tick {
        self.ticks
    }

    /// Total catch-up ticks issued due to drift.
    pub fn adjustments(&self) -> u64 {
        self.adjustments
    }

    /// The configured tick interval.
    pub fn interval(&self) -> Duration {
        self.tick
    }
}

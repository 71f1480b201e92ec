use thiserror::Error;

/// Why admission control refused a packet.
///
/// These are expected data-plane outcomes: they are counted on the affected
/// queue and in the engine totals, and never escalate beyond the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The target pipe or flowset does not exist.
    NoSuchTarget,
    /// The configured random loss rate fired.
    RandomLoss,
    /// The queue's slot or byte limit was exceeded.
    QueueFull,
    /// RED decided on an early drop.
    Red,
}

/// Structured rejection of a configuration call.
///
/// A rejected call leaves all existing pipes, flowsets and queues untouched.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("pipe {0} does not exist")]
    UnknownPipe(u32),
    #[error("flowset {0} does not exist")]
    UnknownFlowSet(u32),
    #[error("pipe {0} already exists")]
    DuplicatePipe(u32),
    #[error("flowset {0} already exists")]
    DuplicateFlowSet(u32),
    #[error("weight {0} out of range (1..=100)")]
    InvalidWeight(u32),
    #[error("bucket count {0} must be a power of two in 1..=65536")]
    InvalidBuckets(u32),
    #[error("queue limit must be non-zero")]
    InvalidQueueLimit,
    #[error("loss rate {0} outside [0.0, 1.0]")]
    InvalidLossRate(f64),
    #[error("invalid RED parameters: {0}")]
    InvalidRed(&'static str),
    #[error("delay profile must contain at least one sample")]
    EmptyProfile,
    #[error("flowset {0} cannot be moved to a different pipe")]
    Reparent(u32),
}

/// Impossible scheduler state: a heap handle that does not match the entry
/// it claims to point at, or a scheduled flow with nothing queued.
///
/// This signals memory-state corruption rather than a data-plane condition,
/// so the only sane continuation is [`InvariantViolation::abort`]. It is a
/// distinct type precisely so the fatal path is distinguishable from
/// ordinary errors in logs and tests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("scheduler invariant violated: {0}")]
pub struct InvariantViolation(pub(crate) &'static str);

impl InvariantViolation {
    /// Log the violation and abort the process.
    pub fn abort(&self) -> ! {
        tracing::error!(error = %self, "aborting: scheduler state is corrupted");
        std::process::abort()
    }
}

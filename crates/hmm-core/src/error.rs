//! Structured error type for the HMM inference core.
//!
//! `HmmBreak` is deliberately not a variant here: per the spec, a break is an
//! expected runtime condition, not a contract violation, and is represented
//! by the `broken` latch on the engines rather than a `Result::Err`.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong driving an engine, other than an HMM break.
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// `next_step` (or an equivalent advance) was called before `start`.
    #[error("engine has not been started")]
    NotStarted,

    /// `start` was called twice on the same engine instance.
    #[error("engine has already been started")]
    AlreadyStarted,

    /// An advance was attempted on an engine whose `broken` latch is set.
    #[error("sequence is broken; construct a new engine to start over")]
    BrokenSequence,

    /// The emission map passed to a step omitted a listed candidate state.
    #[error("missing emission probability for candidate {state}")]
    MissingEmission { state: String },

    /// The initial-probabilities map omitted a listed state.
    #[error("missing initial probability for state {state}")]
    MissingInitialProbability { state: String },

    /// A k-State update carried a timestamp earlier than the last retained one.
    #[error("out-of-order update: observation time {new_time} precedes last retained time {last_time}")]
    OutOfOrderUpdate { last_time: f64, new_time: f64 },

    /// A candidate's predecessor was not present in the previous vector/registry.
    #[error("inconsistent update: candidate's predecessor is not present in the previous vector")]
    InconsistentUpdate,

    /// Message history was queried but the engine was not configured to retain it.
    #[error("message history was not retained; enable it in EstimatorConfig")]
    HistoryUnavailable,
}

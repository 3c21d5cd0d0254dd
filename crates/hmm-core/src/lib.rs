//! Time-inhomogeneous HMM inference core: Viterbi decoding with optional
//! forward-backward smoothing, an online filter plus bounded-history
//! (k-State) memory for streaming map-matching, and the estimator facade
//! that drives either pair.
//!
//! The candidate set, emission probabilities, and transition probabilities
//! are supplied fresh at every step by the caller (or a domain adaptor
//! sitting on top of this crate) rather than assumed stationary; nothing
//! here learns or persists model parameters.

pub mod candidate;
pub mod config;
pub mod error;
pub mod estimator;
pub mod filter;
pub mod forward_backward;
pub mod kstate;
pub mod sequence;
pub mod transition;
pub mod viterbi;

pub use candidate::CandidateNode;
pub use config::EstimatorConfig;
pub use error::{Error, Result};
pub use estimator::{BatchEstimator, StreamingEstimator};
pub use filter::{HmmFilter, StateCandidate, Timestamped};
pub use forward_backward::ForwardBackward;
pub use kstate::KState;
pub use sequence::SequenceState;
pub use transition::TransitionKey;
pub use viterbi::ViterbiEngine;

//! Engine configuration knobs (§4.L, ambient).
//!
//! A plain data struct with a `Default` impl, no global/ambient mutable
//! state — the same shape this toolkit uses for its other engine
//! configuration types, scaled down to the handful of knobs this core
//! actually exposes.

use serde::{Deserialize, Serialize};

/// Configuration for an [`crate::Estimator`] or a bare [`crate::ViterbiEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct EstimatorConfig {
    /// Retain every intermediate forward message (§4.E `messageHistory`).
    /// Disables the memory-bounding that reference-counted pruning would
    /// otherwise provide; intended for debugging.
    pub retain_message_history: bool,

    /// Feed the Viterbi engine's linear-domain equivalents into an embedded
    /// forward-backward engine so smoothing posteriors are available.
    pub enable_smoothing: bool,

    /// k-State retention bound κ: max index retained. `None` = unbounded.
    pub kappa: Option<usize>,

    /// k-State retention bound τ: max time span retained, in the same units
    /// as [`crate::Timestamped::timestamp`]. `None` = unbounded.
    pub tau: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_json() {
        let cfg = EstimatorConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EstimatorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}

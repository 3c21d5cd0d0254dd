//! Estimator facade (§4.I): a convenience driver over either the batch
//! Viterbi engine (optionally with forward-backward smoothing) or the
//! online filter plus k-State memory, exposing matching `start`/`update`/
//! `result`-shaped operations over whichever pair it composes.

use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;

use crate::config::EstimatorConfig;
use crate::error::Result;
use crate::filter::{HmmFilter, StateCandidate, Timestamped};
use crate::kstate::KState;
use crate::sequence::SequenceState;
use crate::transition::TransitionKey;
use crate::viterbi::ViterbiEngine;

/// Drives a [`ViterbiEngine`] (component E) over a full, already-available
/// observation sequence.
pub struct BatchEstimator<S, O, D = ()>
where
    S: Eq + Hash + Clone + std::fmt::Debug,
    O: Clone,
    D: Clone,
{
    engine: ViterbiEngine<S, O, D>,
}

impl<S, O, D> BatchEstimator<S, O, D>
where
    S: Eq + Hash + Clone + std::fmt::Debug,
    O: Clone,
    D: Clone,
{
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            engine: ViterbiEngine::new(config),
        }
    }

    pub fn start_with_initial_probs(
        &mut self,
        states: Vec<S>,
        initial_log_probs: &HashMap<S, f64>,
    ) -> Result<()> {
        self.engine.start_with_initial_probs(states, initial_log_probs)
    }

    pub fn start(
        &mut self,
        observation: O,
        candidates: Vec<S>,
        emission_log_probs: &HashMap<S, f64>,
    ) -> Result<()> {
        self.engine.start(observation, candidates, emission_log_probs)
    }

    pub fn update(
        &mut self,
        observation: O,
        candidates: Vec<S>,
        emission_log_probs: &HashMap<S, f64>,
        transition_log_probs: &HashMap<TransitionKey<S>, f64>,
        transition_descriptors: Option<&HashMap<TransitionKey<S>, D>>,
    ) -> Result<()> {
        self.engine.next_step(
            observation,
            candidates,
            emission_log_probs,
            transition_log_probs,
            transition_descriptors,
        )
    }

    pub fn is_broken(&self) -> bool {
        self.engine.is_broken()
    }

    pub fn result(&self) -> Vec<SequenceState<S, O, D>> {
        self.engine.compute_most_likely_sequence()
    }
}

/// Drives an [`HmmFilter`] (component F) plus a [`KState`] (component G)
/// over a stream of samples arriving one at a time.
pub struct StreamingEstimator<S, T, Sample>
where
    S: Eq + Hash + Clone,
    T: Clone,
    Sample: Clone,
{
    filter: HmmFilter<S, T, Sample>,
    kstate: KState<S, T, Sample>,
    previous_sample: Option<Sample>,
}

impl<S, T, Sample> StreamingEstimator<S, T, Sample>
where
    S: Eq + Hash + Clone,
    T: Clone,
    Sample: Clone + Timestamped,
{
    pub fn new(filter: HmmFilter<S, T, Sample>, kappa: Option<usize>, tau: Option<f64>) -> Self {
        Self {
            filter,
            kstate: KState::new(kappa, tau),
            previous_sample: None,
        }
    }

    /// Filters one sample and folds the result into the k-State memory.
    pub fn update(&mut self, sample: Sample) -> Result<()> {
        let predecessors = self.kstate.vector();
        let previous_sample = self.previous_sample.clone().unwrap_or_else(|| sample.clone());
        let vector = self.filter.execute(&predecessors, &previous_sample, &sample);
        self.kstate.update(vector, sample.clone())?;
        self.previous_sample = Some(sample);
        tracing::trace!("streaming estimator step advanced");
        Ok(())
    }

    /// The current step's candidate with the highest filter probability.
    pub fn estimate(&self) -> Option<Rc<StateCandidate<S, T>>> {
        self.kstate.estimate()
    }

    /// The most-likely chain retained within the k-State window.
    pub fn result(&self) -> Vec<Rc<StateCandidate<S, T>>> {
        self.kstate.sequence()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m<const N: usize>(pairs: [(&'static str, f64); N]) -> HashMap<&'static str, f64> {
        pairs.into_iter().collect()
    }

    #[test]
    fn batch_estimator_decodes_a_deterministic_chain() {
        let mut est: BatchEstimator<&str, u32, ()> = BatchEstimator::new(EstimatorConfig::default());
        est.start(0, vec!["A"], &m([("A", 0.0)])).unwrap();
        est.update(
            1,
            vec!["A"],
            &m([("A", 0.0)]),
            &HashMap::from([(TransitionKey::new("A", "A"), 0.0)]),
            None,
        )
        .unwrap();

        let seq = est.result();
        assert_eq!(seq.iter().map(|s| s.state).collect::<Vec<_>>(), vec!["A", "A"]);
        assert!(!est.is_broken());
    }

    #[test]
    fn streaming_estimator_tracks_a_single_surviving_chain() {
        let filter: HmmFilter<&str, (), f64> = HmmFilter::new(
            |_preds, _sample: &f64| vec![("A", 1.0)],
            |_prev, _cur| ((), 1.0),
        );
        let mut est = StreamingEstimator::new(filter, None, None);
        est.update(0.0).unwrap();
        est.update(1.0).unwrap();

        let result = est.result();
        assert_eq!(result.iter().map(|c| c.state).collect::<Vec<_>>(), vec!["A", "A"]);
        assert_eq!(est.estimate().unwrap().state, "A");
    }
}

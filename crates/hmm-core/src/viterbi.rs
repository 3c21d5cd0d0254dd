//! Viterbi engine (§4.E): log-domain max-product recursion over a
//! time-inhomogeneous HMM, with most-likely-sequence reconstruction and
//! optional forward-backward smoothing.

use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;

use hmm_math::{argmax_by, is_break, log_to_linear};

use crate::candidate::CandidateNode;
use crate::config::EstimatorConfig;
use crate::error::{Error, Result};
use crate::forward_backward::ForwardBackward;
use crate::sequence::SequenceState;
use crate::transition::TransitionKey;

type Node<S, O, D> = Rc<CandidateNode<S, O, D>>;

/// Log-domain Viterbi decoder for a sequence whose candidate set, emissions,
/// and transitions may change at every step.
///
/// State machine: `Unstarted -> Running <-> Broken` (stepping is refused once
/// broken, but queries like [`ViterbiEngine::compute_most_likely_sequence`]
/// remain valid).
pub struct ViterbiEngine<S, O, D = ()>
where
    S: Eq + Hash + Clone + std::fmt::Debug,
    O: Clone,
    D: Clone,
{
    message: HashMap<S, f64>,
    last_extended_states: HashMap<S, Node<S, O, D>>,
    prev_candidates: Vec<S>,
    message_history: Option<Vec<HashMap<S, f64>>>,
    forward_backward: Option<ForwardBackward<S>>,
    broken: bool,
    started: bool,
    /// Distinguishes "broke on the very first message" (zero successful
    /// steps, `compute_most_likely_sequence` must report empty) from "broke
    /// after N successful `next_step` calls" (report the N-long prefix).
    /// Only `next_step` sets this; `start`/`start_with_initial_probs` never do.
    had_successful_step: bool,
}

impl<S, O, D> ViterbiEngine<S, O, D>
where
    S: Eq + Hash + Clone + std::fmt::Debug,
    O: Clone,
    D: Clone,
{
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            message_history: config.retain_message_history.then(Vec::new),
            forward_backward: config.enable_smoothing.then(ForwardBackward::new),
            message: HashMap::new(),
            last_extended_states: HashMap::new(),
            prev_candidates: Vec::new(),
            broken: false,
            started: false,
            had_successful_step: false,
        }
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Seeds the message from bare initial probabilities with no bound
    /// observation (§4.E `start(states, initialLogProbs)`).
    pub fn start_with_initial_probs(
        &mut self,
        states: Vec<S>,
        initial_log_probs: &HashMap<S, f64>,
    ) -> Result<()> {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        let mut message = HashMap::with_capacity(hmm_math::initial_capacity_hint(states.len()));
        let mut extended = HashMap::with_capacity(hmm_math::initial_capacity_hint(states.len()));
        for s in &states {
            let lp = *initial_log_probs
                .get(s)
                .ok_or_else(|| Error::MissingInitialProbability {
                    state: format!("{s:?}"),
                })?;
            message.insert(s.clone(), lp);
            extended.insert(s.clone(), CandidateNode::new(s.clone(), None, None, None));
        }

        if let Some(fb) = &mut self.forward_backward {
            fb.start_with_initial_probs(states.clone(), &log_to_linear(&message))?;
        }
        self.finish_start(states, message, extended)
    }

    /// Seeds the message from emissions with an observation bound into the
    /// root candidate nodes (§4.E `start(obs, candidates, emissionLogProbs)`).
    pub fn start(
        &mut self,
        observation: O,
        candidates: Vec<S>,
        emission_log_probs: &HashMap<S, f64>,
    ) -> Result<()> {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        let mut message = HashMap::with_capacity(hmm_math::initial_capacity_hint(candidates.len()));
        let mut extended = HashMap::with_capacity(hmm_math::initial_capacity_hint(candidates.len()));
        for s in &candidates {
            let lp = *emission_log_probs
                .get(s)
                .ok_or_else(|| Error::MissingEmission {
                    state: format!("{s:?}"),
                })?;
            message.insert(s.clone(), lp);
            extended.insert(
                s.clone(),
                CandidateNode::new(s.clone(), None, Some(observation.clone()), None),
            );
        }

        if let Some(fb) = &mut self.forward_backward {
            fb.start_with_emissions(candidates.clone(), &log_to_linear(&message))?;
        }
        self.finish_start(candidates, message, extended)
    }

    fn finish_start(
        &mut self,
        candidates: Vec<S>,
        message: HashMap<S, f64>,
        extended: HashMap<S, Node<S, O, D>>,
    ) -> Result<()> {
        self.broken = is_break(&message);
        self.prev_candidates = candidates;
        self.last_extended_states = extended;
        if let Some(history) = &mut self.message_history {
            history.push(message.clone());
        }
        self.message = message;
        self.started = true;
        tracing::trace!(broken = self.broken, "viterbi engine started");
        Ok(())
    }

    /// Advances the engine by one observation.
    pub fn next_step(
        &mut self,
        observation: O,
        candidates: Vec<S>,
        emission_log_probs: &HashMap<S, f64>,
        transition_log_probs: &HashMap<TransitionKey<S>, f64>,
        transition_descriptors: Option<&HashMap<TransitionKey<S>, D>>,
    ) -> Result<()> {
        if !self.started {
            return Err(Error::NotStarted);
        }
        if self.broken {
            return Err(Error::BrokenSequence);
        }

        let mut new_message = HashMap::with_capacity(hmm_math::initial_capacity_hint(candidates.len()));
        let mut new_extended: HashMap<S, Node<S, O, D>> =
            HashMap::with_capacity(hmm_math::initial_capacity_hint(candidates.len()));

        for c in &candidates {
            let emission = *emission_log_probs
                .get(c)
                .ok_or_else(|| Error::MissingEmission {
                    state: format!("{c:?}"),
                })?;

            let best_prev = argmax_by(self.prev_candidates.iter().cloned(), |p| {
                let msg = self.message.get(p).copied().unwrap_or(f64::NEG_INFINITY);
                let trans = transition_log_probs
                    .get(&TransitionKey::new(p.clone(), c.clone()))
                    .copied()
                    .unwrap_or(f64::NEG_INFINITY);
                msg + trans
            });

            let best_score = best_prev.as_ref().map(|p| {
                let msg = self.message.get(p).copied().unwrap_or(f64::NEG_INFINITY);
                let trans = transition_log_probs
                    .get(&TransitionKey::new(p.clone(), c.clone()))
                    .copied()
                    .unwrap_or(f64::NEG_INFINITY);
                msg + trans
            });

            match (best_prev, best_score) {
                (Some(p), Some(score)) if score.is_finite() => {
                    new_message.insert(c.clone(), score + emission);
                    let descriptor = transition_descriptors
                        .and_then(|d| d.get(&TransitionKey::new(p.clone(), c.clone())))
                        .cloned();
                    let back = self.last_extended_states.get(&p).cloned();
                    new_extended.insert(
                        c.clone(),
                        CandidateNode::new(c.clone(), back, Some(observation.clone()), descriptor),
                    );
                }
                _ => {
                    new_message.insert(c.clone(), f64::NEG_INFINITY);
                }
            }
        }

        if is_break(&new_message) {
            self.broken = true;
            tracing::debug!("viterbi sequence broke");
            return Ok(());
        }
        self.had_successful_step = true;

        if let Some(fb) = &mut self.forward_backward {
            fb.next_step(
                candidates.clone(),
                &log_to_linear(emission_log_probs),
                &log_to_linear(transition_log_probs),
            )?;
        }

        self.prev_candidates = candidates;
        self.last_extended_states = new_extended;
        if let Some(history) = &mut self.message_history {
            history.push(new_message.clone());
        }
        self.message = new_message;
        tracing::trace!("viterbi step advanced");
        Ok(())
    }

    /// Reconstructs the most likely sequence by walking back-pointers from
    /// the current step's argmax. Empty if never started, or broken at step
    /// zero (no successful step ever ran).
    pub fn compute_most_likely_sequence(&self) -> Vec<SequenceState<S, O, D>> {
        if !self.started || self.last_extended_states.is_empty() {
            return Vec::new();
        }
        if self.broken && !self.had_successful_step {
            return Vec::new();
        }

        let last_state = match argmax_by(self.prev_candidates.iter().cloned(), |s| {
            self.message.get(s).copied().unwrap_or(f64::NEG_INFINITY)
        }) {
            Some(s) => s,
            None => return Vec::new(),
        };

        let Some(mut node) = self.last_extended_states.get(&last_state).cloned() else {
            return Vec::new();
        };

        let smoothing = self
            .forward_backward
            .as_ref()
            .and_then(|fb| fb.compute_smoothing_probabilities().ok());

        let mut chain = Vec::new();
        loop {
            chain.push(Rc::clone(&node));
            match node.back_pointer.clone() {
                Some(parent) => node = parent,
                None => break,
            }
        }
        chain.reverse();

        chain
            .into_iter()
            .enumerate()
            .map(|(t, node)| {
                let smoothing_prob = smoothing
                    .as_ref()
                    .and_then(|steps| steps.get(t))
                    .and_then(|gamma| gamma.get(&node.state))
                    .copied()
                    .unwrap_or(f64::NAN);
                SequenceState::new(
                    node.state.clone(),
                    node.observation.clone(),
                    node.transition_descriptor.clone(),
                    smoothing_prob,
                )
            })
            .collect()
    }

    /// The retained message history, if [`EstimatorConfig::retain_message_history`]
    /// was set at construction.
    pub fn message_history(&self) -> Result<&[HashMap<S, f64>]> {
        self.message_history
            .as_deref()
            .ok_or(Error::HistoryUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m<const N: usize>(pairs: [(&'static str, f64); N]) -> HashMap<&'static str, f64> {
        pairs.into_iter().collect()
    }

    fn tm<const N: usize>(
        pairs: [((&'static str, &'static str), f64); N],
    ) -> HashMap<TransitionKey<&'static str>, f64> {
        pairs
            .into_iter()
            .map(|((p, c), v)| (TransitionKey::new(p, c), v))
            .collect()
    }

    fn engine() -> ViterbiEngine<&'static str, u32, ()> {
        ViterbiEngine::new(EstimatorConfig::default())
    }

    /// Scenario 1: initial-prob start only.
    #[test]
    fn initial_prob_start_yields_single_state_sequence() {
        let mut e = engine();
        e.start_with_initial_probs(
            vec!["A", "B"],
            &m([("A", 0.6f64.ln()), ("B", 0.4f64.ln())]),
        )
        .unwrap();

        let seq = e.compute_most_likely_sequence();
        assert_eq!(seq.len(), 1);
        assert_eq!(seq[0].state, "A");
    }

    /// Scenario 2: deterministic chain, A -> A -> A.
    #[test]
    fn deterministic_chain_tracks_dominant_state() {
        let mut e = engine();
        e.start(0, vec!["A", "B"], &m([("A", 0.0), ("B", f64::NEG_INFINITY)]))
            .unwrap();
        e.next_step(
            1,
            vec!["A", "B"],
            &m([("A", 0.0), ("B", f64::NEG_INFINITY)]),
            &tm([
                (("A", "A"), 0.0),
                (("A", "B"), f64::NEG_INFINITY),
                (("B", "A"), f64::NEG_INFINITY),
                (("B", "B"), 0.0),
            ]),
            None,
        )
        .unwrap();

        let seq = e.compute_most_likely_sequence();
        let states: Vec<_> = seq.iter().map(|s| s.state).collect();
        assert_eq!(states, vec!["A", "A"]);
    }

    /// Scenario 3: tie-break by iteration order, first-seen wins.
    #[test]
    fn ties_are_broken_by_iteration_order() {
        let mut e = engine();
        e.start(0, vec!["A", "B"], &m([("A", 0.0), ("B", 0.0)]))
            .unwrap();
        e.next_step(
            1,
            vec!["A", "B"],
            &m([("A", 0.0), ("B", 0.0)]),
            &tm([
                (("A", "A"), 0.0),
                (("A", "B"), 0.0),
                (("B", "A"), 0.0),
                (("B", "B"), 0.0),
            ]),
            None,
        )
        .unwrap();

        let seq = e.compute_most_likely_sequence();
        assert_eq!(seq[1].state, "A");
    }

    /// Scenario 4: HMM break mid-stream, sequence returns the prefix.
    #[test]
    fn break_mid_stream_returns_prefix() {
        let mut e = engine();
        e.start(0, vec!["A", "B"], &m([("A", 0.0), ("B", f64::NEG_INFINITY)]))
            .unwrap();
        e.next_step(
            1,
            vec!["A", "B"],
            &m([("A", 0.0), ("B", f64::NEG_INFINITY)]),
            &tm([
                (("A", "A"), 0.0),
                (("A", "B"), f64::NEG_INFINITY),
                (("B", "A"), f64::NEG_INFINITY),
                (("B", "B"), 0.0),
            ]),
            None,
        )
        .unwrap();

        e.next_step(
            2,
            vec!["A", "B"],
            &m([("A", f64::NEG_INFINITY), ("B", f64::NEG_INFINITY)]),
            &tm([
                (("A", "A"), 0.0),
                (("A", "B"), f64::NEG_INFINITY),
                (("B", "A"), f64::NEG_INFINITY),
                (("B", "B"), 0.0),
            ]),
            None,
        )
        .unwrap();

        assert!(e.is_broken());
        let seq = e.compute_most_likely_sequence();
        assert_eq!(seq.len(), 2);

        // Stepping again is refused.
        let err = e
            .next_step(3, vec!["A"], &m([("A", 0.0)]), &tm([]), None)
            .unwrap_err();
        assert_eq!(err, Error::BrokenSequence);
    }

    /// Broken on the very first message: zero successful steps ever ran, so
    /// the sequence must be empty, not a length-1 root-node sequence.
    #[test]
    fn broken_at_start_yields_empty_sequence() {
        let mut e = engine();
        e.start_with_initial_probs(
            vec!["A", "B"],
            &m([("A", f64::NEG_INFINITY), ("B", f64::NEG_INFINITY)]),
        )
        .unwrap();

        assert!(e.is_broken());
        assert!(e.compute_most_likely_sequence().is_empty());
    }

    /// Same case via the emission-bound `start` overload.
    #[test]
    fn broken_at_emission_start_yields_empty_sequence() {
        let mut e = engine();
        e.start(0, vec!["A", "B"], &m([("A", f64::NEG_INFINITY), ("B", f64::NEG_INFINITY)]))
            .unwrap();

        assert!(e.is_broken());
        assert!(e.compute_most_likely_sequence().is_empty());
    }

    #[test]
    fn missing_emission_is_a_contract_violation() {
        let mut e = engine();
        e.start(0, vec!["A"], &m([("A", 0.0)])).unwrap();
        let err = e
            .next_step(1, vec!["A", "B"], &m([("A", 0.0)]), &tm([]), None)
            .unwrap_err();
        assert_eq!(
            err,
            Error::MissingEmission {
                state: format!("{:?}", "B")
            }
        );
    }

    #[test]
    fn double_start_fails() {
        let mut e = engine();
        e.start(0, vec!["A"], &m([("A", 0.0)])).unwrap();
        let err = e.start(1, vec!["A"], &m([("A", 0.0)])).unwrap_err();
        assert_eq!(err, Error::AlreadyStarted);
    }

    #[test]
    fn compute_sequence_is_idempotent() {
        let mut e = engine();
        e.start(0, vec!["A", "B"], &m([("A", 0.0), ("B", 0.0)]))
            .unwrap();
        let first = e.compute_most_likely_sequence();
        let second = e.compute_most_likely_sequence();
        let first_states: Vec<_> = first.iter().map(|s| s.state).collect();
        let second_states: Vec<_> = second.iter().map(|s| s.state).collect();
        assert_eq!(first_states, second_states);
        assert!(first.iter().all(|s| s.smoothing_disabled()));
    }

    #[test]
    fn history_unavailable_unless_enabled() {
        let e = engine();
        assert_eq!(e.message_history().unwrap_err(), Error::HistoryUnavailable);

        let mut with_history = ViterbiEngine::<&str, u32, ()>::new(EstimatorConfig {
            retain_message_history: true,
            ..Default::default()
        });
        with_history.start(0, vec!["A"], &m([("A", 0.0)])).unwrap();
        assert_eq!(with_history.message_history().unwrap().len(), 1);
    }
}

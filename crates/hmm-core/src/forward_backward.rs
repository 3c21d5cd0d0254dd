//! Forward-backward engine (§4.D): linear-domain α/β recursion for a
//! time-inhomogeneous HMM, producing per-step smoothing posteriors.
//!
//! Arithmetic here is strictly linear-domain (Invariant 2); crossing the
//! log/linear boundary is the caller's job (see [`hmm_math::log_to_linear`]),
//! typically the [`crate::ViterbiEngine`] feeding this engine the linear
//! equivalents of the log probabilities it was handed.

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::{Error, Result};
use crate::transition::TransitionKey;

/// Linear-domain α/β smoothing engine.
///
/// Retains the full α-history across steps; β is computed only on demand by
/// [`ForwardBackward::compute_smoothing_probabilities`].
pub struct ForwardBackward<S: Eq + Hash + Clone + std::fmt::Debug> {
    states_per_step: Vec<Vec<S>>,
    alphas: Vec<HashMap<S, f64>>,
    emissions: Vec<HashMap<S, f64>>,
    /// `transitions_into[i]` is the transition map used to arrive at step `i + 1`.
    transitions_into: Vec<HashMap<TransitionKey<S>, f64>>,
    started: bool,
}

impl<S: Eq + Hash + Clone + std::fmt::Debug> Default for ForwardBackward<S> {
    fn default() -> Self {
        Self {
            states_per_step: Vec::new(),
            alphas: Vec::new(),
            emissions: Vec::new(),
            transitions_into: Vec::new(),
            started: false,
        }
    }
}

impl<S: Eq + Hash + Clone + std::fmt::Debug> ForwardBackward<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds α₀ directly from initial probabilities.
    pub fn start_with_initial_probs(
        &mut self,
        states: Vec<S>,
        initial_probs: &HashMap<S, f64>,
    ) -> Result<()> {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        let mut alpha = HashMap::with_capacity(hmm_math::initial_capacity_hint(states.len()));
        for s in &states {
            let p = *initial_probs
                .get(s)
                .ok_or_else(|| Error::MissingInitialProbability {
                    state: format!("{s:?}"),
                })?;
            alpha.insert(s.clone(), p);
        }
        self.emissions.push(HashMap::new());
        self.alphas.push(alpha);
        self.states_per_step.push(states);
        self.started = true;
        Ok(())
    }

    /// Seeds α₀ = emission_probs (no separate initial distribution).
    pub fn start_with_emissions(
        &mut self,
        candidates: Vec<S>,
        emission_probs: &HashMap<S, f64>,
    ) -> Result<()> {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        let mut alpha = HashMap::with_capacity(hmm_math::initial_capacity_hint(candidates.len()));
        for s in &candidates {
            let p = *emission_probs
                .get(s)
                .ok_or_else(|| Error::MissingEmission {
                    state: format!("{s:?}"),
                })?;
            alpha.insert(s.clone(), p);
        }
        self.emissions.push(emission_probs.clone());
        self.alphas.push(alpha);
        self.states_per_step.push(candidates);
        self.started = true;
        Ok(())
    }

    /// α_t(s) = emission(s) · Σ_s' α_{t-1}(s') · trans(s'→s); a missing
    /// transition contributes 0.
    pub fn next_step(
        &mut self,
        candidates: Vec<S>,
        emission_probs: &HashMap<S, f64>,
        transition_probs: &HashMap<TransitionKey<S>, f64>,
    ) -> Result<()> {
        if !self.started {
            return Err(Error::NotStarted);
        }
        let prev_alpha = self.alphas.last().expect("started implies non-empty alphas");
        let prev_states = self.states_per_step.last().expect("started implies non-empty history");

        let mut alpha = HashMap::with_capacity(hmm_math::initial_capacity_hint(candidates.len()));
        for s in &candidates {
            let emission = *emission_probs
                .get(s)
                .ok_or_else(|| Error::MissingEmission {
                    state: format!("{s:?}"),
                })?;
            let mut sum = 0.0;
            for prev in prev_states {
                let trans = transition_probs
                    .get(&TransitionKey::new(prev.clone(), s.clone()))
                    .copied()
                    .unwrap_or(0.0);
                sum += prev_alpha.get(prev).copied().unwrap_or(0.0) * trans;
            }
            alpha.insert(s.clone(), emission * sum);
        }

        self.transitions_into.push(transition_probs.clone());
        self.emissions.push(emission_probs.clone());
        self.alphas.push(alpha);
        self.states_per_step.push(candidates);
        Ok(())
    }

    /// Runs the backward pass and returns one normalized posterior map per
    /// recorded step (length equals the number of successful start/next_step
    /// calls).
    pub fn compute_smoothing_probabilities(&self) -> Result<Vec<HashMap<S, f64>>> {
        if !self.started {
            return Err(Error::NotStarted);
        }
        let n = self.alphas.len();
        let mut betas: Vec<HashMap<S, f64>> = vec![HashMap::new(); n];
        for s in &self.states_per_step[n - 1] {
            betas[n - 1].insert(s.clone(), 1.0);
        }
        for t in (0..n - 1).rev() {
            let next_states = &self.states_per_step[t + 1];
            let trans = &self.transitions_into[t];
            let next_emissions = &self.emissions[t + 1];
            let next_beta = &betas[t + 1];
            let mut beta_t = HashMap::with_capacity(hmm_math::initial_capacity_hint(
                self.states_per_step[t].len(),
            ));
            for s in &self.states_per_step[t] {
                let mut sum = 0.0;
                for s_next in next_states {
                    let trans_p = trans
                        .get(&TransitionKey::new(s.clone(), s_next.clone()))
                        .copied()
                        .unwrap_or(0.0);
                    let emission_p = next_emissions.get(s_next).copied().unwrap_or(0.0);
                    let beta_next = next_beta.get(s_next).copied().unwrap_or(0.0);
                    sum += trans_p * emission_p * beta_next;
                }
                beta_t.insert(s.clone(), sum);
            }
            betas[t] = beta_t;
        }

        let mut gammas = Vec::with_capacity(n);
        for (t, states) in self.states_per_step.iter().enumerate() {
            let mut gamma: HashMap<S, f64> = states
                .iter()
                .map(|s| {
                    let a = self.alphas[t].get(s).copied().unwrap_or(0.0);
                    let b = betas[t].get(s).copied().unwrap_or(0.0);
                    (s.clone(), a * b)
                })
                .collect();
            let total: f64 = gamma.values().sum();
            if total > 0.0 {
                for v in gamma.values_mut() {
                    *v /= total;
                }
            }
            gammas.push(gamma);
        }
        Ok(gammas)
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

    #[test]
    fn next_step_before_start_fails() {
        let mut fb: ForwardBackward<&str> = ForwardBackward::new();
        let result = fb.next_step(vec!["A"], &m([("A", 1.0)]), &tm([]));
        assert_eq!(result.unwrap_err(), Error::NotStarted);
    }

    #[test]
    fn smoothing_sums_to_one_per_step() {
        let mut fb: ForwardBackward<&str> = ForwardBackward::new();
        fb.start_with_emissions(vec!["A", "B"], &m([("A", 0.6), ("B", 0.4)]))
            .unwrap();
        fb.next_step(
            vec!["A", "B"],
            &m([("A", 0.9), ("B", 0.1)]),
            &tm([(("A", "A"), 0.7), (("A", "B"), 0.3), (("B", "A"), 0.4), (("B", "B"), 0.6)]),
        )
        .unwrap();

        let gammas = fb.compute_smoothing_probabilities().unwrap();
        assert_eq!(gammas.len(), 2);
        for gamma in &gammas {
            let total: f64 = gamma.values().sum();
            assert!((total - 1.0).abs() < 1e-9, "sum was {total}");
        }
    }
}

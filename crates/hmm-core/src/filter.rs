//! Online HMM filter (§4.F): a per-sample filtering step driven by two
//! caller-supplied oracle functions rather than subclassing (§9 Design
//! Notes: "re-architect as a configuration object holding two function
//! values ... the inference loop is concrete and final").

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;

use crate::transition::TransitionKey;

/// A sample must expose a totally ordered timestamp; nothing else about it
/// is inspected by the filter itself.
pub trait Timestamped {
    fn timestamp(&self) -> f64;
}

impl Timestamped for f64 {
    fn timestamp(&self) -> f64 {
        *self
    }
}

/// One candidate state at one filter step.
///
/// `filter_probability` is linear-domain and normalized across the current
/// vector; `sequence_log_probability` is base-10 log-domain and unnormalized
/// (an ever-climbing running max, per §9: the source mixes natural and
/// base-10 logarithms and this spec preserves that rather than unifying it).
///
/// `predecessor` is interior-mutable: k-State's trimming (§4.G step 7) nulls
/// it in place on surviving front candidates once their ancestors are
/// evicted, so an `Rc` clone held elsewhere never keeps a pruned chain alive.
#[derive(Debug)]
pub struct StateCandidate<S, T> {
    pub state: S,
    pub filter_probability: f64,
    pub sequence_log_probability: f64,
    pub predecessor: RefCell<Option<Rc<StateCandidate<S, T>>>>,
    pub transition: Option<T>,
}

impl<S, T> StateCandidate<S, T> {
    fn root(state: S, filter_probability: f64, sequence_log_probability: f64) -> Rc<Self> {
        Rc::new(Self {
            state,
            filter_probability,
            sequence_log_probability,
            predecessor: RefCell::new(None),
            transition: None,
        })
    }
}

type CandidateFn<S, T, Sample> = dyn Fn(&[Rc<StateCandidate<S, T>>], &Sample) -> Vec<(S, f64)>;
type TransitionFn<S, T, Sample> = dyn Fn((&Sample, &S), (&Sample, &S)) -> (T, f64);
type BulkTransitionFn<S, T, Sample> =
    dyn Fn(&[Rc<StateCandidate<S, T>>], &Sample, &[S], &Sample) -> HashMap<TransitionKey<S>, (T, f64)>;

/// Holds the oracle callbacks the inference loop needs; the loop itself
/// (`execute`) is concrete and not meant to be overridden.
pub struct HmmFilter<S, T, Sample>
where
    S: Eq + Hash + Clone,
    T: Clone,
{
    candidates: Box<CandidateFn<S, T, Sample>>,
    transition: Box<TransitionFn<S, T, Sample>>,
    transitions: Option<Box<BulkTransitionFn<S, T, Sample>>>,
}

impl<S, T, Sample> HmmFilter<S, T, Sample>
where
    S: Eq + Hash + Clone,
    T: Clone,
{
    pub fn new(
        candidates: impl Fn(&[Rc<StateCandidate<S, T>>], &Sample) -> Vec<(S, f64)> + 'static,
        transition: impl Fn((&Sample, &S), (&Sample, &S)) -> (T, f64) + 'static,
    ) -> Self {
        Self {
            candidates: Box::new(candidates),
            transition: Box::new(transition),
            transitions: None,
        }
    }

    /// Overrides the default full-cross-product bulk transition computation.
    pub fn with_bulk_transitions(
        mut self,
        transitions: impl Fn(&[Rc<StateCandidate<S, T>>], &Sample, &[S], &Sample) -> HashMap<TransitionKey<S>, (T, f64)>
            + 'static,
    ) -> Self {
        self.transitions = Some(Box::new(transitions));
        self
    }

    fn bulk_transitions(
        &self,
        predecessors: &[Rc<StateCandidate<S, T>>],
        previous_sample: &Sample,
        states: &[S],
        sample: &Sample,
    ) -> HashMap<TransitionKey<S>, (T, f64)> {
        if let Some(bulk) = &self.transitions {
            return bulk(predecessors, previous_sample, states, sample);
        }
        let mut map = HashMap::new();
        for p in predecessors {
            for c in states {
                let t = (self.transition)((previous_sample, &p.state), (sample, c));
                map.insert(TransitionKey::new(p.state.clone(), c.clone()), t);
            }
        }
        map
    }

    /// Executes one filtering step (§4.F).
    ///
    /// `predecessors` is the previous step's surviving vector (empty at the
    /// start of a sequence, or immediately after a break). Returns the new,
    /// normalized vector.
    pub fn execute(
        &self,
        predecessors: &[Rc<StateCandidate<S, T>>],
        previous_sample: &Sample,
        sample: &Sample,
    ) -> Vec<Rc<StateCandidate<S, T>>> {
        let emissions = (self.candidates)(predecessors, sample);

        if !predecessors.is_empty() {
            let states: Vec<S> = emissions.iter().map(|(s, _)| s.clone()).collect();
            let transitions = self.bulk_transitions(predecessors, previous_sample, &states, sample);

            let mut staged = Vec::new();
            let mut sum = 0.0;
            for (state, emission_prob) in &emissions {
                let mut filter_prob = 0.0;
                let mut seq_prob = f64::NEG_INFINITY;
                let mut best_pred = None;
                let mut best_transition = None;

                for p in predecessors {
                    let Some((obj, prob)) =
                        transitions.get(&TransitionKey::new(p.state.clone(), state.clone()))
                    else {
                        continue;
                    };
                    if *prob == 0.0 {
                        continue;
                    }
                    filter_prob += prob * p.filter_probability;
                    let seq = p.sequence_log_probability + prob.log10() + emission_prob.log10();
                    if seq > seq_prob {
                        seq_prob = seq;
                        best_pred = Some(Rc::clone(p));
                        best_transition = Some(obj.clone());
                    }
                }

                if filter_prob == 0.0 {
                    continue;
                }
                filter_prob *= emission_prob;
                sum += filter_prob;
                staged.push((state.clone(), filter_prob, seq_prob, best_pred, best_transition));
            }

            if !staged.is_empty() {
                return staged
                    .into_iter()
                    .map(|(state, filter_prob, seq_prob, pred, transition)| {
                        Rc::new(StateCandidate {
                            state,
                            filter_probability: filter_prob / sum,
                            sequence_log_probability: seq_prob,
                            predecessor: RefCell::new(pred),
                            transition,
                        })
                    })
                    .collect();
            }
            tracing::debug!("filter lost every candidate; recovering from break");
        }

        self.break_recovery(&emissions)
    }

    fn break_recovery(&self, emissions: &[(S, f64)]) -> Vec<Rc<StateCandidate<S, T>>> {
        let mut staged = Vec::new();
        let mut sum = 0.0;
        for (state, emission_prob) in emissions {
            if *emission_prob == 0.0 {
                continue;
            }
            sum += emission_prob;
            staged.push((state.clone(), *emission_prob, emission_prob.log10()));
        }
        staged
            .into_iter()
            .map(|(state, prob, seq_prob)| StateCandidate::root(state, prob / sum, seq_prob))
            .collect()
    }
}

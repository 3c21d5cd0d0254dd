//! Bounded-history state memory (§4.G): a deque of filter vectors bounded by
//! κ (max retained index) or τ (max retained time span), with reference
//! counted pruning of candidates no longer reachable from the live tail.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::filter::{StateCandidate, Timestamped};

fn ptr_id<S, T>(candidate: &Rc<StateCandidate<S, T>>) -> usize {
    Rc::as_ptr(candidate) as usize
}

struct SequenceEntry<S, T, Sample> {
    candidates: Vec<Rc<StateCandidate<S, T>>>,
    sample: Sample,
    /// This entry's best candidate by `sequence_log_probability`; distinct
    /// from [`KState::estimate`], which ranks by `filter_probability`.
    estimated: Rc<StateCandidate<S, T>>,
}

/// Bounded retention structure over the most recent κ+1 steps (or a
/// τ-duration window), with a reference-counted candidate registry that
/// garbage-collects predecessors no longer reachable from the live tail.
pub struct KState<S, T, Sample>
where
    S: Clone,
    T: Clone,
{
    entries: VecDeque<SequenceEntry<S, T, Sample>>,
    counters: HashMap<usize, usize>,
    kappa: Option<usize>,
    tau: Option<f64>,
}

impl<S, T, Sample> KState<S, T, Sample>
where
    S: Clone,
    T: Clone,
{
    /// `kappa = None` means unbounded index retention; `tau = None` means
    /// unbounded time-span retention.
    pub fn new(kappa: Option<usize>, tau: Option<f64>) -> Self {
        Self {
            entries: VecDeque::new(),
            counters: HashMap::new(),
            kappa,
            tau,
        }
    }

    /// Appends a new filter vector. No-op on an empty vector. Rejects a
    /// sample that is not monotonically later than the last retained one.
    pub fn update(&mut self, vector: Vec<Rc<StateCandidate<S, T>>>, sample: Sample) -> Result<()>
    where
        Sample: Timestamped,
    {
        if vector.is_empty() {
            return Ok(());
        }
        if let Some(last) = self.entries.back() {
            if sample.timestamp() < last.sample.timestamp() {
                return Err(Error::OutOfOrderUpdate {
                    last_time: last.sample.timestamp(),
                    new_time: sample.timestamp(),
                });
            }
        }

        for c in &vector {
            self.counters.insert(ptr_id(c), 0);
        }

        match self.entries.back() {
            Some(last) => {
                for c in &vector {
                    if let Some(pred) = c.predecessor.borrow().as_ref() {
                        let in_last_vector = last.candidates.iter().any(|x| Rc::ptr_eq(x, pred));
                        if !in_last_vector || !self.counters.contains_key(&ptr_id(pred)) {
                            return Err(Error::InconsistentUpdate);
                        }
                        *self.counters.get_mut(&ptr_id(pred)).unwrap() += 1;
                    }
                }
            }
            None => {
                if vector.iter().any(|c| c.predecessor.borrow().is_some()) {
                    return Err(Error::InconsistentUpdate);
                }
            }
        }

        let estimated = hmm_math::argmax_by(vector.iter().cloned(), |c| c.sequence_log_probability)
            .expect("vector is non-empty");

        if !self.entries.is_empty() {
            let last_index = self.entries.len() - 1;
            let to_remove: Vec<Rc<StateCandidate<S, T>>> = {
                let last = &self.entries[last_index];
                last.candidates
                    .iter()
                    .filter(|c| !Rc::ptr_eq(c, &last.estimated))
                    .filter(|c| self.counters.get(&ptr_id(c)).copied().unwrap_or(0) == 0)
                    .cloned()
                    .collect()
            };
            // §9: when the to-remove set would cover the entire entry, conservatively
            // preserve it rather than guessing at the ambiguous source behavior.
            if to_remove.len() < self.entries[last_index].candidates.len() {
                for c in to_remove {
                    self.remove(&c, last_index);
                }
            }
        }

        self.entries.push_back(SequenceEntry {
            candidates: vector,
            sample,
            estimated,
        });
        self.trim();
        Ok(())
    }

    /// Removes `candidate` (found at `index`) unless it is that entry's
    /// `estimated` node. Decrements its predecessor's counter, cascading the
    /// removal if that counter reaches zero.
    pub fn remove(&mut self, candidate: &Rc<StateCandidate<S, T>>, index: usize) {
        let is_estimated = self
            .entries
            .get(index)
            .map(|e| Rc::ptr_eq(&e.estimated, candidate))
            .unwrap_or(false);
        if is_estimated {
            return;
        }

        self.counters.remove(&ptr_id(candidate));
        if let Some(entry) = self.entries.get_mut(index) {
            entry.candidates.retain(|c| !Rc::ptr_eq(c, candidate));
        }

        let pred = candidate.predecessor.borrow().clone();
        if let Some(pred) = pred {
            let pred_id = ptr_id(&pred);
            let hit_zero = self.counters.get_mut(&pred_id).map(|count| {
                *count -= 1;
                *count == 0
            });
            if hit_zero == Some(true) && index > 0 {
                self.remove(&pred, index - 1);
            }
        }
    }

    fn trim(&mut self)
    where
        Sample: Timestamped,
    {
        loop {
            if self.entries.len() <= 1 {
                break;
            }
            let over_kappa = self.kappa.is_some_and(|k| self.entries.len() > k + 1);
            let over_tau = self.tau.is_some_and(|tau| {
                let span = self.entries.back().unwrap().sample.timestamp()
                    - self.entries.front().unwrap().sample.timestamp();
                span > tau
            });
            if !over_kappa && !over_tau {
                break;
            }
            if let Some(popped) = self.entries.pop_front() {
                for c in &popped.candidates {
                    self.counters.remove(&ptr_id(c));
                }
                // §4.G step 7: the new front's candidates become sequence roots —
                // null their predecessor links so the evicted entry's Rcs actually drop.
                if let Some(new_front) = self.entries.front() {
                    for c in &new_front.candidates {
                        *c.predecessor.borrow_mut() = None;
                    }
                }
                tracing::debug!(remaining = self.entries.len(), "k-state trimmed oldest entry");
            }
        }
    }

    /// The last entry's candidate vector, or empty if nothing was ever retained.
    pub fn vector(&self) -> Vec<Rc<StateCandidate<S, T>>> {
        self.entries.back().map(|e| e.candidates.clone()).unwrap_or_default()
    }

    /// The candidate with the highest `filter_probability` in the last vector.
    pub fn estimate(&self) -> Option<Rc<StateCandidate<S, T>>> {
        hmm_math::argmax_by(self.vector(), |c| c.filter_probability)
    }

    /// Reconstructs the most-likely chain, walking back from the last
    /// entry's `estimated` candidate and substituting each entry's own
    /// `estimated` whenever the predecessor chain has broken. Chronological order.
    pub fn sequence(&self) -> Vec<Rc<StateCandidate<S, T>>> {
        if self.entries.is_empty() {
            return Vec::new();
        }
        let mut result = Vec::with_capacity(self.entries.len());
        let mut current = Some(Rc::clone(&self.entries.back().unwrap().estimated));
        for entry in self.entries.iter().rev() {
            let candidate = match &current {
                Some(c) if entry.candidates.iter().any(|x| Rc::ptr_eq(x, c)) => Rc::clone(c),
                _ => Rc::clone(&entry.estimated),
            };
            current = candidate.predecessor.borrow().clone();
            result.push(candidate);
        }
        result.reverse();
        result
    }

    /// The stored observation samples, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.entries.iter().map(|e| &e.sample)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

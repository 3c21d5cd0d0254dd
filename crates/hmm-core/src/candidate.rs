//! Candidate node: one state at one time step in the Viterbi back-pointer DAG.
//!
//! Nodes are immutable once constructed and reference-counted: a node stays
//! alive exactly as long as some later node's back-pointer (transitively)
//! reaches it. Because a back-pointer always addresses a strictly earlier
//! time step, the resulting graph can never contain a cycle, so plain `Rc`
//! sharing (no weak back-edges) is sufficient.

use std::rc::Rc;

/// One candidate state at one time step, linked to the predecessor it was
/// extended from.
#[derive(Debug)]
pub struct CandidateNode<S, O, D> {
    /// The state this node represents.
    pub state: S,
    /// The predecessor this node was extended from. `None` only at the root
    /// of a chain (t = 0, or immediately after an HMM break).
    pub back_pointer: Option<Rc<CandidateNode<S, O, D>>>,
    /// The observation bound at the time step this node was created. `None`
    /// for the bare initial-probability start variant, which precedes any
    /// observation.
    pub observation: Option<O>,
    /// The descriptor of the transition that produced this node, if any.
    pub transition_descriptor: Option<D>,
}

impl<S, O, D> CandidateNode<S, O, D> {
    /// Constructs a new candidate node and wraps it for shared ownership.
    pub fn new(
        state: S,
        back_pointer: Option<Rc<CandidateNode<S, O, D>>>,
        observation: Option<O>,
        transition_descriptor: Option<D>,
    ) -> Rc<Self> {
        Rc::new(Self {
            state,
            back_pointer,
            observation,
            transition_descriptor,
        })
    }

    /// Depth of this node's chain, counting itself (1 at a root).
    pub fn depth(&self) -> usize {
        1 + self.back_pointer.as_ref().map_or(0, |p| p.depth())
    }
}

//! Transition key: an ordered (previous, current) state pair usable as a map
//! key, with value equality (Invariant/§4.B).

use std::hash::Hash;

/// An ordered pair of states identifying one transition. Two keys are equal
/// iff both components are equal; the hash combines both components, so
/// `TransitionKey` is safe to use as a `HashMap` key for transition
/// probability and transition descriptor oracles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionKey<S> {
    pub prev: S,
    pub cur: S,
}

impl<S> TransitionKey<S> {
    /// Builds a transition key from its previous and current states.
    pub fn new(prev: S, cur: S) -> Self {
        Self { prev, cur }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn value_equality_not_identity() {
        let a = TransitionKey::new("x", "y");
        let b = TransitionKey::new("x", "y");
        assert_eq!(a, b);

        let c = TransitionKey::new("y", "x");
        assert_ne!(a, c);
    }

    #[test]
    fn usable_as_map_key() {
        let mut map = HashMap::new();
        map.insert(TransitionKey::new(1, 2), 0.5_f64);
        assert_eq!(map.get(&TransitionKey::new(1, 2)), Some(&0.5));
        assert_eq!(map.get(&TransitionKey::new(2, 1)), None);
    }
}

use std::{fmt::Debug, hash::Hash};

/// The contract a concrete domain implements. States are plain values; the
/// library interns them (see [`crate::model::StateTable`]) so domains never
/// deal with handles or cached solver data.
pub trait Problem: Debug {
    type State: Clone + Eq + Hash + Debug;
    type Action: Clone + Debug;

    fn initial_state(&self) -> Self::State;

    /// The full action vocabulary. The list is fixed for the lifetime of the
    /// problem, and its order is the tie-breaking order of every backup.
    fn actions(&self) -> &[Self::Action];

    fn is_goal(&self, state: &Self::State) -> bool;

    fn applicable(&self, state: &Self::State, action: &Self::Action) -> bool;

    /// Successor distribution of an applicable action. Probabilities sum to
    /// one; an empty list marks an absorbing transition.
    fn transition(&self, state: &Self::State, action: &Self::Action) -> Vec<(Self::State, f64)>;

    /// Non-negative cost of applying `action` in `state`.
    fn cost(&self, state: &Self::State, action: &Self::Action) -> f64;

    /// Number of cost functions, in decreasing order of preference, for
    /// lexicographic solvers. Level 0 is always [`Problem::cost`].
    fn num_levels(&self) -> usize {
        1
    }

    /// Cost of `action` in `state` under the cost function of `level`.
    fn level_cost(&self, state: &Self::State, action: &Self::Action, level: usize) -> f64 {
        if level == 0 {
            self.cost(state, action)
        } else {
            0.
        }
    }

    fn gamma(&self) -> f64 {
        1.
    }
}

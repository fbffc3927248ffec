use crate::model::{ActionId, StateId, StateRecord, DEAD_END_COST};
use smallvec::SmallVec;
use std::fmt::Debug;

/// One outcome of applying an action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Successor {
    pub state: StateId,
    pub probability: f64,
}

impl Successor {
    pub fn new(state: StateId, probability: f64) -> Self {
        Self { state, probability }
    }
}

pub type Successors = SmallVec<[Successor; 4]>;

/// The handle-level view of a stochastic shortest path problem that every
/// solver works against. States are [`StateId`]s, actions are [`ActionId`]s,
/// and each state carries a mutable [`StateRecord`] with the solver's cached
/// estimates.
///
/// `transition` takes `&mut self` because expanding a state may intern new
/// successor states.
pub trait Ssp: Debug {
    fn initial_state(&self) -> StateId;

    fn num_actions(&self) -> usize;

    fn is_goal(&self, state: StateId) -> bool;

    /// The value a goal is backed up to. Real goals are absorbing and cost
    /// nothing; artificial goals may freeze a non-zero estimate instead.
    fn goal_cost(&self, _state: StateId) -> f64 {
        0.
    }

    fn applicable(&self, state: StateId, action: ActionId) -> bool;

    fn transition(&mut self, state: StateId, action: ActionId) -> Successors;

    fn cost(&self, state: StateId, action: ActionId) -> f64;

    /// Number of lexicographically ordered cost functions; see
    /// [`crate::model::Problem::num_levels`].
    fn num_levels(&self) -> usize {
        1
    }

    fn level_cost(&self, state: StateId, action: ActionId, level: usize) -> f64 {
        if level == 0 {
            self.cost(state, action)
        } else {
            0.
        }
    }

    fn gamma(&self) -> f64;

    fn heuristic_cost(&self, state: StateId) -> Option<f64>;

    fn record(&self, state: StateId) -> &StateRecord;

    fn record_mut(&mut self, state: StateId) -> &mut StateRecord;

    /// Every state of the problem, generating the full reachable space first
    /// if needed.
    fn all_states(&mut self) -> Vec<StateId>;

    /// Forget all cached estimates.
    fn reset_values(&mut self);

    fn action_ids(&self) -> impl Iterator<Item = ActionId> {
        (0..self.num_actions()).map(ActionId::new)
    }

    fn applicable_actions(&self, state: StateId) -> Vec<ActionId> {
        self.action_ids()
            .filter(|&action| self.applicable(state, action))
            .collect()
    }

    /// Current cost estimate of a state. Dead ends cost [`DEAD_END_COST`];
    /// states no backup has touched yet fall back to the heuristic, or zero
    /// when there is none.
    fn value(&self, state: StateId) -> f64 {
        let record = self.record(state);
        if record.is_dead_end() {
            DEAD_END_COST
        } else if !record.is_initialised() {
            self.heuristic_cost(state).unwrap_or(0.)
        } else {
            record.raw_cost()
        }
    }

    /// Heuristic part of a weighted estimate, with the same fallback as
    /// [`Ssp::value`].
    fn h_value(&self, state: StateId) -> f64 {
        let h_value = self.record(state).raw_h_value();
        if h_value > DEAD_END_COST {
            self.heuristic_cost(state).unwrap_or(0.)
        } else {
            h_value
        }
    }

    fn is_dead_end(&self, state: StateId) -> bool {
        self.record(state).is_dead_end()
    }

    fn best_action(&self, state: StateId) -> Option<ActionId> {
        self.record(state).best_action()
    }
}

impl<T: Ssp + ?Sized> Ssp for &mut T {
    fn initial_state(&self) -> StateId {
        (**self).initial_state()
    }

    fn num_actions(&self) -> usize {
        (**self).num_actions()
    }

    fn is_goal(&self, state: StateId) -> bool {
        (**self).is_goal(state)
    }

    fn goal_cost(&self, state: StateId) -> f64 {
        (**self).goal_cost(state)
    }

    fn applicable(&self, state: StateId, action: ActionId) -> bool {
        (**self).applicable(state, action)
    }

    fn transition(&mut self, state: StateId, action: ActionId) -> Successors {
        (**self).transition(state, action)
    }

    fn cost(&self, state: StateId, action: ActionId) -> f64 {
        (**self).cost(state, action)
    }

    fn num_levels(&self) -> usize {
        (**self).num_levels()
    }

    fn level_cost(&self, state: StateId, action: ActionId, level: usize) -> f64 {
        (**self).level_cost(state, action, level)
    }

    fn gamma(&self) -> f64 {
        (**self).gamma()
    }

    fn heuristic_cost(&self, state: StateId) -> Option<f64> {
        (**self).heuristic_cost(state)
    }

    fn record(&self, state: StateId) -> &StateRecord {
        (**self).record(state)
    }

    fn record_mut(&mut self, state: StateId) -> &mut StateRecord {
        (**self).record_mut(state)
    }

    fn all_states(&mut self) -> Vec<StateId> {
        (**self).all_states()
    }

    fn reset_values(&mut self) {
        (**self).reset_values()
    }

    fn value(&self, state: StateId) -> f64 {
        (**self).value(state)
    }

    fn h_value(&self, state: StateId) -> f64 {
        (**self).h_value(state)
    }
}

use crate::model::{ActionId, StateId, StateRecord, Ssp, Successors};
use std::collections::HashSet;

/// A short-sighted SSP: the wrapped problem restricted to a finite set of
/// states, with the tip states of that set turned into artificial goals.
///
/// A tip keeps whatever estimate the wrapped problem currently holds for it;
/// backing it up inside the short-sighted SSP rewrites that same estimate.
/// Labels computed inside one short-sighted SSP are only meaningful for that
/// SSP and must not be carried over to another one rooted elsewhere.
#[derive(Debug)]
pub struct ShortSightedSsp<'a, M: Ssp + ?Sized> {
    inner: &'a mut M,
    root: StateId,
    states: HashSet<StateId>,
    tips: HashSet<StateId>,
}

impl<'a, M: Ssp + ?Sized> ShortSightedSsp<'a, M> {
    pub fn new(
        inner: &'a mut M,
        root: StateId,
        states: HashSet<StateId>,
        tips: HashSet<StateId>,
    ) -> Self {
        Self {
            inner,
            root,
            states,
            tips,
        }
    }

    pub fn is_tip(&self, state: StateId) -> bool {
        self.tips.contains(&state)
    }

    pub fn contains(&self, state: StateId) -> bool {
        self.states.contains(&state)
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn inner(&self) -> &M {
        self.inner
    }
}

impl<'a, M: Ssp + ?Sized> Ssp for ShortSightedSsp<'a, M> {
    fn initial_state(&self) -> StateId {
        self.root
    }

    fn num_actions(&self) -> usize {
        self.inner.num_actions()
    }

    fn is_goal(&self, state: StateId) -> bool {
        if self.tips.is_empty() {
            self.inner.is_goal(state)
        } else {
            self.tips.contains(&state)
        }
    }

    fn goal_cost(&self, state: StateId) -> f64 {
        if self.inner.is_goal(state) {
            self.inner.goal_cost(state)
        } else {
            self.inner.value(state)
        }
    }

    fn applicable(&self, state: StateId, action: ActionId) -> bool {
        self.inner.applicable(state, action)
    }

    fn transition(&mut self, state: StateId, action: ActionId) -> Successors {
        self.inner.transition(state, action)
    }

    fn cost(&self, state: StateId, action: ActionId) -> f64 {
        self.inner.cost(state, action)
    }

    fn num_levels(&self) -> usize {
        self.inner.num_levels()
    }

    fn level_cost(&self, state: StateId, action: ActionId, level: usize) -> f64 {
        self.inner.level_cost(state, action, level)
    }

    fn gamma(&self) -> f64 {
        self.inner.gamma()
    }

    fn heuristic_cost(&self, state: StateId) -> Option<f64> {
        self.inner.heuristic_cost(state)
    }

    fn record(&self, state: StateId) -> &StateRecord {
        self.inner.record(state)
    }

    fn record_mut(&mut self, state: StateId) -> &mut StateRecord {
        self.inner.record_mut(state)
    }

    fn all_states(&mut self) -> Vec<StateId> {
        let mut states: Vec<_> = self.states.iter().copied().collect();
        states.sort();
        states
    }

    fn reset_values(&mut self) {
        for &state in &self.states {
            self.inner.record_mut(state).reset();
        }
    }

    fn value(&self, state: StateId) -> f64 {
        self.inner.value(state)
    }

    fn h_value(&self, state: StateId) -> f64 {
        self.inner.h_value(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::Mdp, solvers::reachable_states, test_utils::chain_problem};

    #[test]
    fn tips_become_goals() {
        let mut mdp = Mdp::new(chain_problem());
        let s0 = mdp.initial_state();
        let reachability = reachable_states(&mut mdp, &[s0], 1);
        let tip = *reachability.tips.iter().next().unwrap();
        mdp.record_mut(tip).set_cost(7.);

        let ssp = ShortSightedSsp::new(&mut mdp, s0, reachability.states, reachability.tips);
        assert!(ssp.is_goal(tip));
        assert!(!ssp.is_goal(s0));
        assert_eq!(ssp.goal_cost(tip), 7.);
        assert_eq!(ssp.num_states(), 2);
    }
}

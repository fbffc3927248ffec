use crate::model::{
    ActionId, Heuristic, Problem, StateId, StateRecord, StateTable, Ssp, Successor, Successors,
};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::info;

/// A [`Problem`] together with everything the solvers need to work on it:
/// the interning table with the per-state records, a memo of expanded
/// transitions, and an optional heuristic.
#[derive(Debug)]
pub struct Mdp<P: Problem> {
    problem: P,
    table: StateTable<P::State>,
    initial_state: StateId,
    heuristic: Option<Box<dyn Heuristic<P::State>>>,
    transitions: HashMap<(StateId, ActionId), Successors>,
    fully_generated: bool,
}

impl<P: Problem> Mdp<P> {
    pub fn new(problem: P) -> Self {
        let mut table = StateTable::new();
        let initial_state = table.insert_or_get(problem.initial_state());
        Self {
            problem,
            table,
            initial_state,
            heuristic: None,
            transitions: HashMap::new(),
            fully_generated: false,
        }
    }

    pub fn with_heuristic(problem: P, heuristic: Box<dyn Heuristic<P::State>>) -> Self {
        let mut mdp = Self::new(problem);
        mdp.heuristic = Some(heuristic);
        mdp
    }

    pub fn set_heuristic(&mut self, heuristic: Option<Box<dyn Heuristic<P::State>>>) {
        self.heuristic = heuristic;
    }

    pub fn problem(&self) -> &P {
        &self.problem
    }

    pub fn state(&self, state_id: StateId) -> &P::State {
        self.table.get_state(state_id)
    }

    pub fn action(&self, action_id: ActionId) -> &P::Action {
        &self.problem.actions()[action_id.index()]
    }

    pub fn lookup(&self, state: &P::State) -> Option<StateId> {
        self.table.lookup(state)
    }

    pub fn intern(&mut self, state: P::State) -> StateId {
        self.table.insert_or_get(state)
    }

    pub fn num_states(&self) -> usize {
        self.table.len()
    }

    /// Expands every state reachable from the initial state. Goals are not
    /// expanded.
    pub fn generate_all(&mut self) {
        if self.fully_generated {
            return;
        }
        let mut seen = HashSet::from([self.initial_state]);
        let mut queue = VecDeque::from([self.initial_state]);
        while let Some(state) = queue.pop_front() {
            if self.is_goal(state) {
                continue;
            }
            for action in self.applicable_actions(state) {
                for successor in self.transition(state, action) {
                    if seen.insert(successor.state) {
                        queue.push_back(successor.state);
                    }
                }
            }
        }
        self.fully_generated = true;
        info!(generated_states = self.table.len());
    }
}

impl<P: Problem> Ssp for Mdp<P> {
    fn initial_state(&self) -> StateId {
        self.initial_state
    }

    fn num_actions(&self) -> usize {
        self.problem.actions().len()
    }

    fn is_goal(&self, state: StateId) -> bool {
        self.problem.is_goal(self.table.get_state(state))
    }

    fn applicable(&self, state: StateId, action: ActionId) -> bool {
        self.problem
            .applicable(self.table.get_state(state), self.action(action))
    }

    fn transition(&mut self, state: StateId, action: ActionId) -> Successors {
        debug_assert!(
            self.applicable(state, action),
            "transition requested for an inapplicable action"
        );
        if let Some(successors) = self.transitions.get(&(state, action)) {
            return successors.clone();
        }
        let outcomes = self
            .problem
            .transition(self.table.get_state(state), &self.problem.actions()[action.index()]);
        let successors: Successors = outcomes
            .into_iter()
            .map(|(successor, probability)| {
                Successor::new(self.table.insert_or_get(successor), probability)
            })
            .collect();
        self.transitions.insert((state, action), successors.clone());
        successors
    }

    fn cost(&self, state: StateId, action: ActionId) -> f64 {
        self.problem
            .cost(self.table.get_state(state), self.action(action))
    }

    fn num_levels(&self) -> usize {
        self.problem.num_levels()
    }

    fn level_cost(&self, state: StateId, action: ActionId, level: usize) -> f64 {
        self.problem
            .level_cost(self.table.get_state(state), self.action(action), level)
    }

    fn gamma(&self) -> f64 {
        self.problem.gamma()
    }

    fn heuristic_cost(&self, state: StateId) -> Option<f64> {
        self.heuristic
            .as_ref()
            .map(|heuristic| heuristic.evaluate(self.table.get_state(state)))
    }

    fn record(&self, state: StateId) -> &StateRecord {
        self.table.get_record(state)
    }

    fn record_mut(&mut self, state: StateId) -> &mut StateRecord {
        self.table.get_record_mut(state)
    }

    fn all_states(&mut self) -> Vec<StateId> {
        self.generate_all();
        self.table.ids().collect()
    }

    fn reset_values(&mut self) {
        self.table.reset();
    }
}

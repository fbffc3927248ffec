use crate::model::{Problem, DEAD_END_COST};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt::Debug,
    hash::Hash,
};
use tracing::{debug, info};

/// A cost-to-goal estimate for domain states. Admissibility (or, for the
/// upper-bound uses, pessimism) is the caller's responsibility.
pub trait Heuristic<S>: Debug + Send {
    fn evaluate(&self, state: &S) -> f64;

    /// Evaluate a batch of states. The default implementation simply calls
    /// `evaluate` for each state sequentially.
    fn evaluate_batch(&self, states: &[S]) -> Vec<f64> {
        states.iter().map(|state| self.evaluate(state)).collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ZeroHeuristic {}

impl ZeroHeuristic {
    pub fn new() -> Self {
        ZeroHeuristic {}
    }
}

impl<S> Heuristic<S> for ZeroHeuristic {
    fn evaluate(&self, _state: &S) -> f64 {
        0.
    }
}

/// The h-min heuristic: optimal costs of the all-outcomes determinisation
/// where every action reaches its cheapest successor. Computed eagerly over
/// the full reachable state space, so only suitable for problems that can be
/// enumerated.
#[derive(Debug, Clone)]
pub struct HMinHeuristic<S: Hash + Eq> {
    values: HashMap<S, f64>,
}

impl<S> HMinHeuristic<S>
where
    S: Clone + Hash + Eq + Debug + Send,
{
    const TOLERANCE: f64 = 1e-6;

    pub fn new<P: Problem<State = S>>(problem: &P) -> Self {
        let states = reachable_domain_states(problem);
        info!(hmin_states = states.len());

        let mut values: HashMap<S, f64> = states
            .iter()
            .map(|state| (state.clone(), if problem.is_goal(state) { 0. } else { DEAD_END_COST }))
            .collect();
        let mut iterations = 0;
        loop {
            iterations += 1;
            let mut max_residual: f64 = 0.;
            for state in &states {
                if problem.is_goal(state) {
                    continue;
                }
                let mut best = DEAD_END_COST;
                for action in problem.actions() {
                    if !problem.applicable(state, action) {
                        continue;
                    }
                    let cheapest_successor = problem
                        .transition(state, action)
                        .iter()
                        .map(|(successor, _)| {
                            values.get(successor).copied().unwrap_or(DEAD_END_COST)
                        })
                        .fold(DEAD_END_COST, f64::min);
                    best = best.min(problem.cost(state, action) + cheapest_successor);
                }
                best = best.min(DEAD_END_COST);
                let previous = values.insert(state.clone(), best).unwrap_or(DEAD_END_COST);
                max_residual = max_residual.max((best - previous).abs());
            }
            if max_residual < Self::TOLERANCE {
                break;
            }
        }
        debug!(hmin_iterations = iterations);
        Self { values }
    }
}

impl<S> Heuristic<S> for HMinHeuristic<S>
where
    S: Hash + Eq + Debug + Send,
{
    fn evaluate(&self, state: &S) -> f64 {
        self.values.get(state).copied().unwrap_or(0.)
    }
}

/// Breadth-first enumeration of every state reachable from the initial state,
/// in discovery order.
pub(crate) fn reachable_domain_states<P: Problem>(problem: &P) -> Vec<P::State> {
    let initial_state = problem.initial_state();
    let mut seen = HashSet::from([initial_state.clone()]);
    let mut order = vec![];
    let mut queue = VecDeque::from([initial_state]);
    while let Some(state) = queue.pop_front() {
        order.push(state.clone());
        if problem.is_goal(&state) {
            continue;
        }
        for action in problem.actions() {
            if !problem.applicable(&state, action) {
                continue;
            }
            for (successor, _) in problem.transition(&state, action) {
                if seen.insert(successor.clone()) {
                    queue.push_back(successor);
                }
            }
        }
    }
    order
}

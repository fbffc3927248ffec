use crate::{
    config::SolverConfig,
    model::{ActionId, Ssp, StateId, DEAD_END_COST},
    solvers::{
        greedy_action, Solution, SolveStatus, Solver, SolverContext, SolverStatistics,
        TerminationCondition,
    },
};
use rand::Rng;
use std::{collections::HashMap, time::Duration};

/// Lower and upper bounds on state values. The lower bound is the value
/// cached on the model's records; the upper bound lives here, starting at
/// a constant for every non-goal state.
#[derive(Debug, Clone)]
pub(crate) struct Bounds {
    initial_upper: f64,
    upper: HashMap<StateId, f64>,
    lower_policy: HashMap<StateId, ActionId>,
}

impl Bounds {
    pub(crate) fn new(initial_upper: f64) -> Self {
        Self {
            initial_upper,
            upper: HashMap::new(),
            lower_policy: HashMap::new(),
        }
    }

    pub(crate) fn upper<M: Ssp + ?Sized>(&self, model: &M, state: StateId) -> f64 {
        match self.upper.get(&state) {
            Some(&upper) => upper,
            None if model.is_goal(state) => model.goal_cost(state),
            None => self.initial_upper,
        }
    }

    pub(crate) fn lower<M: Ssp + ?Sized>(&self, model: &M, state: StateId) -> f64 {
        if model.is_goal(state) {
            model.goal_cost(state)
        } else {
            model.value(state)
        }
    }

    pub(crate) fn gap<M: Ssp + ?Sized>(&self, model: &M, state: StateId) -> f64 {
        (self.upper(model, state) - self.lower(model, state)).max(0.)
    }

    /// The action that is greedy with respect to the lower bound, used to
    /// explore.
    pub(crate) fn lower_action(&self, state: StateId) -> Option<ActionId> {
        self.lower_policy.get(&state).copied()
    }

    /// Backs up both bounds of `state`. The record keeps the lower bound and
    /// the action that is greedy with respect to the upper bound. Returns
    /// the remaining gap.
    pub(crate) fn update<M: Ssp + ?Sized>(&mut self, model: &mut M, state: StateId) -> f64 {
        if model.is_goal(state) {
            let cost = model.goal_cost(state);
            self.upper.insert(state, cost);
            model.record_mut(state).set_cost(cost);
            return 0.;
        }

        let mut best_lower: Option<(f64, ActionId)> = None;
        let mut best_upper: Option<(f64, ActionId)> = None;
        for action in model.applicable_actions(state) {
            let successors = model.transition(state, action);
            let mut lower = 0.;
            let mut upper = 0.;
            for successor in &successors {
                lower += successor.probability * self.lower(model, successor.state);
                upper += successor.probability * self.upper(model, successor.state);
            }
            let cost = model.cost(state, action);
            let lower = (cost + model.gamma() * lower).min(DEAD_END_COST);
            let upper = (cost + model.gamma() * upper).min(DEAD_END_COST);
            if best_lower.map_or(true, |(best, _)| lower < best) {
                best_lower = Some((lower, action));
            }
            if best_upper.map_or(true, |(best, _)| upper < best) {
                best_upper = Some((upper, action));
            }
        }

        let (Some((lower, lower_action)), Some((upper, upper_action))) = (best_lower, best_upper)
        else {
            let record = model.record_mut(state);
            record.mark_dead_end();
            record.set_cost(DEAD_END_COST);
            record.set_best_action(None);
            self.upper.insert(state, DEAD_END_COST);
            self.lower_policy.remove(&state);
            return 0.;
        };
        let record = model.record_mut(state);
        record.set_cost(lower);
        record.set_best_action(Some(upper_action));
        self.upper.insert(state, upper);
        self.lower_policy.insert(state, lower_action);
        (upper - lower).max(0.)
    }

    /// Samples a successor of `(state, action)` in proportion to
    /// `probability * gap`. Returns `None` once the expected gap of the
    /// successors falls below `gap(reference) / tau`.
    pub(crate) fn sample_biased<M, R>(
        &self,
        model: &mut M,
        state: StateId,
        action: ActionId,
        reference: StateId,
        tau: f64,
        rng: &mut R,
    ) -> Option<StateId>
    where
        M: Ssp + ?Sized,
        R: Rng,
    {
        let scored: Vec<(StateId, f64)> = model
            .transition(state, action)
            .iter()
            .map(|successor| {
                (
                    successor.state,
                    successor.probability * self.gap(model, successor.state),
                )
            })
            .collect();
        let total: f64 = scored.iter().map(|(_, score)| score).sum();
        if total <= 0. || total < self.gap(model, reference) / tau {
            return None;
        }
        let pick = rng.gen::<f64>() * total;
        let mut accumulated = 0.;
        for &(successor, score) in &scored {
            accumulated += score;
            if score > 0. && accumulated >= pick {
                return Some(successor);
            }
        }
        scored
            .iter()
            .rev()
            .find(|(_, score)| *score > 0.)
            .map(|(successor, _)| *successor)
    }

    pub(crate) fn clear(&mut self) {
        self.upper.clear();
        self.lower_policy.clear();
    }
}

/// Bounded RTDP: RTDP on a lower and an upper bound at once, exploring
/// successors in proportion to how uncertain their value still is. The
/// start state has converged once its bounds are within epsilon.
#[derive(Debug)]
pub struct Brtdp<M: Ssp> {
    model: M,
    bounds: Bounds,
    epsilon: f64,
    tau: f64,
    context: SolverContext,
    max_trials: usize,
    time_limit: Option<Duration>,
    memory_limit_mb: Option<usize>,
}

impl<M: Ssp> Brtdp<M> {
    pub fn new(model: M, config: &SolverConfig) -> Self {
        Self {
            model,
            bounds: Bounds::new(config.upper_bound),
            epsilon: config.epsilon,
            tau: config.tau,
            context: SolverContext::new(config.seed),
            max_trials: config.max_trials,
            time_limit: config.time_limit(),
            memory_limit_mb: config.memory_limit_mb,
        }
    }

    pub fn upper_bound(&self, state: StateId) -> f64 {
        self.bounds.upper(&self.model, state)
    }

    fn trial(&mut self, s0: StateId, statistics: &mut SolverStatistics) {
        statistics.increment_trials();
        let mut current = s0;
        let mut visited = vec![];
        let mut accumulated_cost = 0.;
        while !self.model.is_goal(current) {
            visited.push(current);
            self.bounds.update(&mut self.model, current);
            statistics.increment_backups(1);
            let Some(action) = self.bounds.lower_action(current) else {
                break;
            };
            accumulated_cost += self.model.cost(current, action);
            if accumulated_cost >= DEAD_END_COST {
                break;
            }
            match self.bounds.sample_biased(
                &mut self.model,
                current,
                action,
                s0,
                self.tau,
                self.context.rng(),
            ) {
                Some(next) => current = next,
                None => break,
            }
        }

        statistics.increment_backups(visited.len());
        while let Some(state) = visited.pop() {
            self.bounds.update(&mut self.model, state);
        }
    }
}

impl<M: Ssp> Solver for Brtdp<M> {
    fn solve(&mut self, state: StateId) -> Solution {
        let mut statistics = SolverStatistics::new();
        let mut termination = TerminationCondition::new(self.time_limit, self.memory_limit_mb);
        let mut status = SolveStatus::TrialLimitReached;
        for _ in 0..self.max_trials {
            if let Some(limit) = termination.should_terminate() {
                status = limit;
                break;
            }
            self.trial(state, &mut statistics);
            if self.bounds.gap(&self.model, state) < self.epsilon {
                status = SolveStatus::Converged;
                break;
            }
        }
        statistics.finalise_solve();
        termination.finalise();
        Solution::from_policy(&self.model, state, status)
    }

    fn best_action(&mut self, state: StateId) -> Option<ActionId> {
        greedy_action(&mut self.model, state)
    }

    fn set_max_trials(&mut self, max_trials: usize) {
        self.max_trials = max_trials;
    }

    fn set_time_limit(&mut self, time_limit: Option<Duration>) {
        self.time_limit = time_limit;
    }

    fn reset(&mut self) {
        self.bounds.clear();
        self.model.reset_values();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domains::{ExplicitDescription, ExplicitProblem, GridWorld},
        model::Mdp,
        solvers::ValueIteration,
        test_utils::{chain_problem, OPEN_GRID},
    };
    use assert_approx_eq::assert_approx_eq;

    /// S -a-> {X: 0.5, Y: 0.5}, with bounds giving X a gap of 3, Y a gap
    /// of 1 and S a gap of 10. Returns the model, the bounds and the ids of
    /// S, X and Y.
    fn fork() -> (Mdp<ExplicitProblem>, Bounds, [StateId; 3]) {
        let problem = ExplicitProblem::new(
            ExplicitDescription::new(&["S", "X", "Y", "G"], "S", &["G"])
                .transition("S", "a", 1., &[("X", 0.5), ("Y", 0.5)])
                .transition("X", "b", 1., &[("G", 1.)])
                .transition("Y", "b", 1., &[("G", 1.)]),
        )
        .unwrap();
        let mdp = Mdp::new(problem);
        let ids = ["S", "X", "Y"].map(|name| mdp.lookup(&name.to_string()).unwrap());
        let mut bounds = Bounds::new(DEAD_END_COST);
        for (&state, upper) in ids.iter().zip([10., 3., 1.]) {
            bounds.upper.insert(state, upper);
        }
        (mdp, bounds, ids)
    }

    #[test]
    fn bounds_meet_on_the_chain() {
        let mut mdp = Mdp::new(chain_problem());
        let s0 = mdp.initial_state();
        let mut brtdp = Brtdp::new(&mut mdp, &SolverConfig::default());
        assert!(brtdp.solve(s0).is_converged());
        assert_approx_eq!(brtdp.upper_bound(s0), 2.);
        assert_approx_eq!(mdp.value(s0), 2.);
    }

    #[test]
    fn bounds_bracket_the_optimal_value() {
        let grid = GridWorld::from_map(OPEN_GRID).unwrap();
        let mut reference = Mdp::new(grid.clone());
        let s0 = reference.initial_state();
        ValueIteration::new(&mut reference, &SolverConfig::default()).solve(s0);
        let optimal = reference.value(s0);

        let heuristic = Box::new(grid.manhattan_heuristic());
        let mut mdp = Mdp::with_heuristic(grid, heuristic);
        let config = SolverConfig {
            seed: Some(3),
            max_trials: 200,
            ..SolverConfig::default()
        };
        let mut brtdp = Brtdp::new(&mut mdp, &config);
        brtdp.solve(s0);
        let upper = brtdp.upper_bound(s0);
        assert!(upper >= optimal - 1e-6);
        assert!(mdp.value(s0) <= optimal + 1e-6);
    }

    #[test]
    fn sampling_stops_when_successors_are_known() {
        let mut mdp = Mdp::new(chain_problem());
        let s0 = mdp.initial_state();
        let mut bounds = Bounds::new(DEAD_END_COST);
        let mut context = SolverContext::new(Some(1));
        let b = mdp.lookup(&"B".to_string()).unwrap();
        bounds.update(&mut mdp, b);
        bounds.update(&mut mdp, s0);
        // B is exact, so nothing below A is worth exploring
        let action = bounds.lower_action(s0).unwrap();
        assert_eq!(
            bounds.sample_biased(&mut mdp, s0, action, s0, 10., context.rng()),
            None
        );
    }

    #[test]
    fn sampling_is_proportional_to_probability_times_gap() {
        let (mut mdp, bounds, [s, x, _]) = fork();
        let action = mdp.applicable_actions(s)[0];
        let mut context = SolverContext::new(Some(12));
        let samples = 4000;
        let hits = (0..samples)
            .filter(|_| {
                bounds.sample_biased(&mut mdp, s, action, s, 10., context.rng()) == Some(x)
            })
            .count();
        // 0.5 * 3 against 0.5 * 1
        assert_approx_eq!(hits as f64 / samples as f64, 0.75, 0.03);
    }

    #[test]
    fn sampling_stops_below_the_reference_gap_over_tau() {
        let (mut mdp, bounds, [s, ..]) = fork();
        let action = mdp.applicable_actions(s)[0];
        let mut context = SolverContext::new(Some(12));
        // the successors' expected gap is 2 and the gap of S is 10
        assert_eq!(bounds.sample_biased(&mut mdp, s, action, s, 1., context.rng()), None);
        assert_eq!(bounds.sample_biased(&mut mdp, s, action, s, 4., context.rng()), None);
        assert!(bounds
            .sample_biased(&mut mdp, s, action, s, 5., context.rng())
            .is_some());
    }
}

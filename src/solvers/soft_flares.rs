//! Soft-FLARES: FLARES with probabilistic labels.
//!
//! Where FLARES labels a state as solved within its horizon, Soft-FLARES
//! records how far below the horizon the state's subgraph converged (its
//! residual distance). A transition modifier turns that distance into the
//! probability that the state still counts as unlabeled, which is used both
//! to steer trials away from well-converged states and to stop them.

use crate::{
    config::{SoftFlaresConfig, SolverConfig},
    model::{ActionId, Ssp, StateId, DEAD_END_COST},
    solvers::{
        bellman_update, greedy_action, random_successor, residual, Label, Solution, SolveStatus,
        Solver, SolverContext, SolverStatistics, StateLabels, TerminationCondition,
    },
};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, time::Duration};
use strum_macros::Display;
use tracing::debug;

/// Maps a residual distance to the probability that a state is still
/// unlabeled. Every modifier gives `1 - alpha` at distance zero and `alpha`
/// at the horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TransitionModifier {
    Logistic,
    Exponential,
    Linear,
    /// Constant `alpha` for any known distance.
    Step,
}

/// How depth grows along an edge of the greedy subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DistanceFunction {
    /// Minus the base-2 log-probability of the trajectory.
    TrajectoryProbability,
    Steps,
    /// How many times less likely an outcome is than the most likely
    /// outcome of the same action, in powers of two.
    Plausibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum HorizonFunction {
    /// Every residual check uses the configured horizon.
    Fixed,
    /// With probability `psi` a residual check ignores the horizon.
    Bernoulli,
}

impl DistanceFunction {
    fn next_depth(self, depth: f64, probability: f64, most_likely: f64) -> f64 {
        match self {
            DistanceFunction::TrajectoryProbability => depth - probability.log2(),
            DistanceFunction::Steps => depth + 1.,
            DistanceFunction::Plausibility => {
                depth + (most_likely.log2() - probability.log2()).floor()
            }
        }
    }
}

#[derive(Debug)]
pub struct SoftFlares<M: Ssp> {
    model: M,
    labels: StateLabels,
    settings: SoftFlaresConfig,
    epsilon: f64,
    horizon: f64,
    tau: f64,
    labeled: bool,
    optimal: bool,
    context: SolverContext,
    max_trials: usize,
    time_limit: Option<Duration>,
    memory_limit_mb: Option<usize>,
}

impl<M: Ssp> SoftFlares<M> {
    pub fn new(model: M, config: &SolverConfig) -> Self {
        let settings = config.soft_flares.clone();
        let horizon = config.horizon as f64;
        let alpha = settings.alpha;
        let beta = 1. - alpha;
        let tau = if horizon == 0. {
            0.
        } else {
            match settings.modifier {
                TransitionModifier::Logistic => {
                    -(((1. - alpha) * beta) / ((1. - beta) * alpha)).ln() / horizon
                }
                TransitionModifier::Exponential => (beta / alpha).ln() / horizon,
                TransitionModifier::Linear => (beta - alpha) / horizon,
                TransitionModifier::Step => 0.,
            }
        };
        Self {
            model,
            labels: StateLabels::new(),
            settings,
            epsilon: config.epsilon,
            horizon,
            tau,
            labeled: config.labeled,
            optimal: config.optimal,
            context: SolverContext::new(config.seed),
            max_trials: config.max_trials,
            time_limit: config.time_limit(),
            memory_limit_mb: config.memory_limit_mb,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn is_solved(&self, state: StateId) -> bool {
        self.labels.has(state, Label::Solved)
    }

    /// Probability that a state whose subgraph converged `distance` below
    /// the horizon still counts as unlabeled.
    pub fn prob_unlabeled(&self, distance: f64) -> f64 {
        let alpha = self.settings.alpha;
        if distance.is_infinite() {
            return 0.;
        }
        if self.horizon == 0. {
            return alpha;
        }
        match self.settings.modifier {
            TransitionModifier::Step => alpha,
            TransitionModifier::Logistic => {
                let c = (1. - alpha) / alpha;
                1. - 1. / (1. + c * (self.tau * distance).exp())
            }
            TransitionModifier::Exponential => 1. - alpha * (self.tau * distance).exp(),
            TransitionModifier::Linear => 1. - (self.tau * distance + alpha),
        }
    }

    fn state_prob_unlabeled(&self, state: StateId) -> f64 {
        let distance = self.model.record(state).residual_distance();
        if distance < 0. {
            // never converged
            1.
        } else {
            self.prob_unlabeled(distance)
        }
    }

    fn labeled_solved(&mut self, state: StateId) -> bool {
        self.is_solved(state) || self.context.uniform() > self.state_prob_unlabeled(state)
    }

    fn effective_horizon(&mut self) -> f64 {
        if self.optimal {
            return f64::INFINITY;
        }
        match self.settings.horizon_function {
            HorizonFunction::Fixed => self.horizon,
            HorizonFunction::Bernoulli if self.context.uniform() > self.settings.psi => {
                self.horizon
            }
            HorizonFunction::Bernoulli => f64::INFINITY,
        }
    }

    /// Samples an outcome weighted by how likely it is to be unlabeled.
    /// The weights do not sum to one, and the trial ends when the draw
    /// falls in the missing mass.
    fn sample_successor(&mut self, state: StateId, action: ActionId) -> Option<StateId> {
        let pick = self.context.uniform();
        let mut accumulated = 0.;
        for successor in self.model.transition(state, action) {
            accumulated += self.state_prob_unlabeled(successor.state) * successor.probability;
            if accumulated >= pick {
                return Some(successor.state);
            }
        }
        None
    }

    fn trial(
        &mut self,
        state: StateId,
        statistics: &mut SolverStatistics,
        termination: &TerminationCondition,
    ) {
        statistics.increment_trials();
        let mut current = state;
        let mut visited = vec![];
        let mut accumulated_cost = 0.;
        while !self.model.is_goal(current) {
            visited.push(current);
            bellman_update(&mut self.model, current);
            statistics.increment_backups(1);
            if self.model.is_dead_end(current) || accumulated_cost >= DEAD_END_COST {
                break;
            }
            if termination.is_past_deadline() {
                return;
            }
            let Some(action) = greedy_action(&mut self.model, current) else {
                break;
            };
            accumulated_cost += self.model.cost(current, action);
            let next = if self.labeled {
                self.sample_successor(current, action)
            } else {
                let rng = self.context.rng();
                Some(random_successor(&mut self.model, current, Some(action), rng))
            };
            match next {
                Some(next) => current = next,
                None => break,
            }
        }

        if !self.labeled {
            return;
        }
        while let Some(state) = visited.pop() {
            self.compute_residual_distances(state, statistics, termination);
            if !self.labeled_solved(state) {
                break;
            }
        }
    }

    /// Checks the greedy subgraph of `state` up to twice a sampled horizon,
    /// skipping successors that pass a soft label. A converged subgraph
    /// that fits inside the horizon is labeled solved; otherwise its states
    /// within the horizon get their residual distance. A subgraph that has
    /// not converged is backed up in reverse discovery order.
    fn compute_residual_distances(
        &mut self,
        state: StateId,
        statistics: &mut SolverStatistics,
        termination: &TerminationCondition,
    ) {
        statistics.increment_check_solved_calls();
        if self.is_solved(state) {
            return;
        }
        let horizon = self.effective_horizon();

        let mut open = vec![(state, 0.)];
        let mut closed = vec![];
        let mut closed_set = HashSet::new();
        let mut converged = true;
        let mut within_horizon = true;
        while let Some((current, depth)) = open.pop() {
            if depth > 2. * horizon {
                within_horizon = false;
                continue;
            }
            if self.model.is_goal(current) || !closed_set.insert(current) {
                continue;
            }
            if termination.is_past_deadline() {
                return;
            }
            closed.push((current, depth));

            let known_dead_end = self.model.is_dead_end(current);
            let Some(action) = greedy_action(&mut self.model, current) else {
                converged &= known_dead_end;
                continue;
            };
            if residual(&mut self.model, current) > self.epsilon {
                converged = false;
            }
            let successors = self.model.transition(current, action);
            let most_likely = successors
                .iter()
                .map(|successor| successor.probability)
                .fold(0., f64::max);
            for successor in successors {
                let next = successor.state;
                if self.is_solved(next) || closed_set.contains(&next) {
                    continue;
                }
                if horizon.is_infinite() || !self.labeled_solved(next) {
                    let next_depth = self.settings.distance.next_depth(
                        depth,
                        successor.probability,
                        most_likely,
                    );
                    open.push((next, next_depth));
                } else {
                    // skipped on a soft label, so part of the subgraph was
                    // never looked at
                    within_horizon = false;
                }
            }
        }

        if converged {
            let mut labeled = 0;
            for &(state, depth) in &closed {
                if within_horizon {
                    self.labels.set(state, Label::Solved);
                    labeled += 1;
                } else if depth <= horizon {
                    self.model
                        .record_mut(state)
                        .set_residual_distance(horizon - depth);
                }
            }
            statistics.increment_labeled_states(labeled);
        } else {
            for &(state, _) in closed.iter().rev() {
                bellman_update(&mut self.model, state);
            }
            statistics.increment_backups(closed.len());
        }
    }

    /// Whether trials from `state` can stop. Optimal mode and solves under
    /// a time limit wait for a full label; otherwise a soft label is
    /// enough.
    fn done(&mut self, state: StateId) -> bool {
        if self.model.is_goal(state) || self.is_solved(state) {
            return true;
        }
        !self.optimal && self.time_limit.is_none() && self.labeled_solved(state)
    }
}

impl<M: Ssp> Solver for SoftFlares<M> {
    fn solve(&mut self, state: StateId) -> Solution {
        let mut statistics = SolverStatistics::new();
        let mut termination = TerminationCondition::new(self.time_limit, self.memory_limit_mb);
        let mut trials = 0;
        let status = loop {
            if self.done(state) {
                break SolveStatus::Converged;
            }
            if trials >= self.max_trials {
                break SolveStatus::TrialLimitReached;
            }
            if let Some(limit) = termination.should_terminate() {
                break limit;
            }
            self.trial(state, &mut statistics, &termination);
            trials += 1;
        };
        debug!(trials, solved = self.is_solved(state), "soft-flares finished");

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
        self.labels.clear();
        self.model.reset_values();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domains::GridWorld,
        model::Mdp,
        solvers::ValueIteration,
        test_utils::{chain_problem, dead_end_problem, OPEN_GRID},
    };
    use assert_approx_eq::assert_approx_eq;

    fn config_with(modifier: TransitionModifier) -> SolverConfig {
        let mut config = SolverConfig {
            seed: Some(4),
            horizon: 4,
            ..SolverConfig::default()
        };
        config.soft_flares.modifier = modifier;
        config.soft_flares.alpha = 0.1;
        config
    }

    #[test]
    fn modifiers_span_one_minus_alpha_to_alpha() {
        let mut mdp = Mdp::new(chain_problem());
        for modifier in [
            TransitionModifier::Logistic,
            TransitionModifier::Exponential,
            TransitionModifier::Linear,
        ] {
            let solver = SoftFlares::new(&mut mdp, &config_with(modifier));
            assert_approx_eq!(solver.prob_unlabeled(0.), 0.9);
            assert_approx_eq!(solver.prob_unlabeled(4.), 0.1);
            assert!(solver.prob_unlabeled(2.) < 0.9 && solver.prob_unlabeled(2.) > 0.1);
            assert_eq!(solver.prob_unlabeled(f64::INFINITY), 0.);
        }
        let step = SoftFlares::new(&mut mdp, &config_with(TransitionModifier::Step));
        assert_approx_eq!(step.prob_unlabeled(0.), 0.1);
        assert_approx_eq!(step.prob_unlabeled(3.), 0.1);
    }

    #[test]
    fn distance_functions() {
        assert_eq!(DistanceFunction::Steps.next_depth(2., 0.25, 0.5), 3.);
        assert_eq!(DistanceFunction::TrajectoryProbability.next_depth(2., 0.25, 0.5), 4.);
        assert_eq!(DistanceFunction::Plausibility.next_depth(2., 0.25, 0.5), 3.);
        assert_eq!(DistanceFunction::Plausibility.next_depth(2., 0.5, 0.5), 2.);
    }

    #[test]
    fn chain_is_solved() {
        let mut mdp = Mdp::new(chain_problem());
        let s0 = mdp.initial_state();
        let mut solver = SoftFlares::new(&mut mdp, &config_with(TransitionModifier::Logistic));
        assert!(solver.solve(s0).is_converged());
        assert!(solver.is_solved(s0));
        assert_approx_eq!(mdp.value(s0), 2.);
    }

    #[test]
    fn short_horizon_sets_residual_distances() {
        let grid = GridWorld::from_map(OPEN_GRID).unwrap();
        let mut mdp = Mdp::new(grid);
        let s0 = mdp.initial_state();
        let mut config = config_with(TransitionModifier::Linear);
        config.horizon = 1;
        let mut solver = SoftFlares::new(&mut mdp, &config);
        let solution = solver.solve(s0);
        assert_eq!(solution.status, SolveStatus::Converged);
        assert!(solution.action.is_some());
        let distance = solver.model().record(s0).residual_distance();
        assert!(solver.is_solved(s0) || (0. ..=1.).contains(&distance));
    }

    #[test]
    fn optimal_mode_matches_value_iteration() {
        let grid = GridWorld::from_map(OPEN_GRID).unwrap();
        let mut reference = Mdp::new(grid.clone());
        let s0 = reference.initial_state();
        ValueIteration::new(&mut reference, &SolverConfig::default()).solve(s0);

        let mut mdp = Mdp::new(grid);
        let mut config = config_with(TransitionModifier::Logistic);
        config.optimal = true;
        let mut solver = SoftFlares::new(&mut mdp, &config);
        assert!(solver.solve(s0).is_converged());
        assert!(solver.is_solved(s0));
        assert_approx_eq!(mdp.value(s0), reference.value(s0), 1e-3);
    }

    #[test]
    fn avoids_the_dead_end() {
        let mut mdp = Mdp::new(dead_end_problem());
        let s0 = mdp.initial_state();
        let mut solver = SoftFlares::new(&mut mdp, &config_with(TransitionModifier::Exponential));
        let solution = solver.solve(s0);
        assert_eq!(mdp.action(solution.action.unwrap()), "safe");
        assert_approx_eq!(mdp.value(s0), 5.);
    }

    #[test]
    fn unlabeled_mode_runs_plain_trials() {
        let mut mdp = Mdp::new(dead_end_problem());
        let s0 = mdp.initial_state();
        let mut config = config_with(TransitionModifier::Logistic);
        config.labeled = false;
        config.max_trials = 50;
        let mut solver = SoftFlares::new(&mut mdp, &config);
        let solution = solver.solve(s0);
        assert_eq!(solution.status, SolveStatus::TrialLimitReached);
        assert!(!solver.is_solved(s0));
        assert_eq!(mdp.action(solution.action.unwrap()), "safe");
    }

    #[test]
    fn time_limited_solves_wait_for_a_full_label() {
        let mut mdp = Mdp::new(chain_problem());
        let s0 = mdp.initial_state();
        let mut config = config_with(TransitionModifier::Logistic);
        config.time_limit_ms = Some(60_000);
        let mut solver = SoftFlares::new(&mut mdp, &config);
        assert!(solver.solve(s0).is_converged());
        assert!(solver.is_solved(s0));
    }
}

use crate::{
    config::SolverConfig,
    model::{ActionId, Ssp, StateId, Successor, DEAD_END_COST},
    solvers::{
        brtdp::Bounds, greedy_action, random_successor, Solution, SolveStatus, Solver,
        SolverContext, SolverStatistics, TerminationCondition,
    },
};
use std::{collections::HashMap, time::Duration};

/// VPI values below this are treated as zero.
const VPI_TOLERANCE: f64 = 1e-9;

/// Bounded RTDP whose trials go to the successor with the highest myopic
/// value of perfect information: how much the decision at the current state
/// would improve, in expectation, if the successor's true value were
/// revealed. The true value is assumed uniform between its bounds.
///
/// Bound-gap sampling is used instead while a successor has been backed up
/// fewer than two times or the successors' average gap exceeds `beta`.
#[derive(Debug)]
pub struct VpiRtdp<M: Ssp> {
    model: M,
    bounds: Bounds,
    backups: HashMap<StateId, usize>,
    epsilon: f64,
    tau: f64,
    alpha: f64,
    beta: f64,
    vanilla_sample: bool,
    context: SolverContext,
    max_trials: usize,
    time_limit: Option<Duration>,
    memory_limit_mb: Option<usize>,
}

impl<M: Ssp> VpiRtdp<M> {
    pub fn new(model: M, config: &SolverConfig) -> Self {
        Self {
            model,
            bounds: Bounds::new(config.upper_bound),
            backups: HashMap::new(),
            epsilon: config.epsilon,
            tau: config.tau,
            alpha: config.alpha,
            beta: config.beta,
            vanilla_sample: config.vanilla_sample,
            context: SolverContext::new(config.seed),
            max_trials: config.max_trials,
            time_limit: config.time_limit(),
            memory_limit_mb: config.memory_limit_mb,
        }
    }

    pub fn upper_bound(&self, state: StateId) -> f64 {
        self.bounds.upper(&self.model, state)
    }

    fn update(&mut self, state: StateId) {
        self.bounds.update(&mut self.model, state);
        *self.backups.entry(state).or_insert(0) += 1;
    }

    fn num_backups(&self, state: StateId) -> usize {
        self.backups.get(&state).copied().unwrap_or(0)
    }

    /// Midpoint of the bounds of `state`.
    fn estimate(&self, state: StateId) -> f64 {
        (self.bounds.lower(&self.model, state) + self.bounds.upper(&self.model, state)) / 2.
    }

    /// Myopic VPI of every successor of `(state, action)` with respect to the
    /// choice between the two best actions of `state`.
    fn successor_vpis(&mut self, state: StateId, action: ActionId) -> Vec<(StateId, f64)> {
        let mut estimates = vec![];
        for candidate in self.model.applicable_actions(state) {
            let successors = self.model.transition(state, candidate);
            let expected: f64 = successors
                .iter()
                .map(|successor| successor.probability * self.estimate(successor.state))
                .sum();
            let q = self.model.cost(state, candidate) + self.model.gamma() * expected;
            estimates.push((candidate, q, successors));
        }
        estimates.sort_by(|a, b| a.1.total_cmp(&b.1));

        let gamma = self.model.gamma();
        let probability_under = |successors: &[Successor], target: StateId| {
            successors
                .iter()
                .filter(|successor| successor.state == target)
                .map(|successor| successor.probability)
                .sum::<f64>()
        };

        self.model
            .transition(state, action)
            .iter()
            .map(|successor| {
                let target = successor.state;
                let [(_, best_q, best), (_, second_q, second), ..] = estimates.as_slice() else {
                    return (target, 0.);
                };
                // Q(best) - Q(second) as a linear function of the revealed value
                let slope = gamma
                    * (probability_under(&best[..], target)
                        - probability_under(&second[..], target));
                let midpoint = self.estimate(target);
                let difference = |value: f64| best_q - second_q + slope * (value - midpoint);
                let at_lower = difference(self.bounds.lower(&self.model, target));
                let at_upper = difference(self.bounds.upper(&self.model, target));
                (target, expected_positive_part(at_lower, at_upper))
            })
            .collect()
    }

    fn next_state(&mut self, state: StateId, action: ActionId, s0: StateId) -> Option<StateId> {
        if self.vanilla_sample {
            let next = random_successor(&mut self.model, state, Some(action), self.context.rng());
            return (self.bounds.gap(&self.model, next) > 0.).then_some(next);
        }

        let successors = self.model.transition(state, action);
        let gap: f64 = successors
            .iter()
            .map(|successor| successor.probability * self.bounds.gap(&self.model, successor.state))
            .sum();
        if gap <= 0. || gap < self.bounds.gap(&self.model, s0) / self.tau {
            return None;
        }
        let underexplored = successors.iter().any(|successor| {
            !self.model.is_goal(successor.state) && self.num_backups(successor.state) < 2
        });
        if underexplored || gap > self.beta {
            return self.bounds.sample_biased(
                &mut self.model,
                state,
                action,
                s0,
                self.tau,
                self.context.rng(),
            );
        }

        let vpis = self.successor_vpis(state, action);
        let best = vpis
            .iter()
            .copied()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .filter(|&(_, vpi)| vpi > VPI_TOLERANCE);
        match best {
            Some((next, _)) => Some(next),
            None if self.context.uniform() < self.alpha => self.bounds.sample_biased(
                &mut self.model,
                state,
                action,
                s0,
                self.tau,
                self.context.rng(),
            ),
            None => Some(random_successor(
                &mut self.model,
                state,
                Some(action),
                self.context.rng(),
            )),
        }
    }

    fn trial(&mut self, s0: StateId, statistics: &mut SolverStatistics) {
        statistics.increment_trials();
        let mut current = s0;
        let mut visited = vec![];
        let mut accumulated_cost = 0.;
        while !self.model.is_goal(current) {
            visited.push(current);
            self.update(current);
            let Some(action) = self.bounds.lower_action(current) else {
                break;
            };
            accumulated_cost += self.model.cost(current, action);
            if accumulated_cost >= DEAD_END_COST {
                break;
            }
            match self.next_state(current, action, s0) {
                Some(next) => current = next,
                None => break,
            }
        }

        statistics.increment_backups(2 * visited.len());
        while let Some(state) = visited.pop() {
            self.update(state);
        }
    }
}

/// `E[max(0, d)]` for `d` linear in a uniformly distributed value, given
/// `d` at both ends of the interval.
fn expected_positive_part(a: f64, b: f64) -> f64 {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    if high <= 0. {
        0.
    } else if low >= 0. {
        (low + high) / 2.
    } else {
        high * high / (2. * (high - low))
    }
}

impl<M: Ssp> Solver for VpiRtdp<M> {
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
        self.backups.clear();
        self.model.reset_values();
    }
}

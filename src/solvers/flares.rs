use crate::{
    config::SolverConfig,
    model::{ActionId, Ssp, StateId},
    solvers::{
        greedy_action, Horizon, Labeler, Solution, Solver, SolverContext, SolverStatistics,
        TerminationCondition,
    },
};
use std::time::Duration;

/// Default trajectory-probability threshold when FLARES measures depth in
/// log-probability and no `rho` is configured.
const DEFAULT_PROBABILITY_HORIZON: f64 = 0.1;

/// FLARES: LRTDP-style trials whose convergence check only looks a bounded
/// distance ahead. States are labeled as solved within that horizon, which
/// makes the search much cheaper at the price of optimality.
///
/// In optimal mode the horizon starts at zero and is widened every time the
/// start state gets labeled within the horizon without being fully solved.
#[derive(Debug)]
pub struct Flares<M: Ssp> {
    model: M,
    labeler: Labeler,
    initial_horizon: Horizon,
    optimal: bool,
    context: SolverContext,
    max_trials: usize,
    time_limit: Option<Duration>,
    memory_limit_mb: Option<usize>,
}

impl<M: Ssp> Flares<M> {
    pub fn new(model: M, config: &SolverConfig) -> Self {
        let horizon = if config.use_probs_for_depth {
            Horizon::Probability(config.rho.unwrap_or(DEFAULT_PROBABILITY_HORIZON))
        } else {
            Horizon::Steps(config.horizon)
        };
        Self {
            model,
            labeler: Labeler::new(config.epsilon, horizon, config.optimal),
            initial_horizon: horizon,
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

    /// Labeled within the current horizon.
    pub fn is_labeled(&self, state: StateId) -> bool {
        self.labeler.is_labeled(state)
    }

    pub fn is_solved(&self, state: StateId) -> bool {
        self.labeler.is_solved(state)
    }
}

impl<M: Ssp> Solver for Flares<M> {
    fn solve(&mut self, state: StateId) -> Solution {
        let mut statistics = SolverStatistics::new();
        let mut termination = TerminationCondition::new(self.time_limit, self.memory_limit_mb);
        let status = if self.optimal {
            self.labeler.run_widening(
                &mut self.model,
                state,
                self.max_trials,
                self.context.rng(),
                &mut statistics,
                &mut termination,
            )
        } else {
            self.labeler.run_trials(
                &mut self.model,
                state,
                self.max_trials,
                self.context.rng(),
                &mut statistics,
                &mut termination,
            )
        };
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
        self.labeler.clear();
        self.labeler.set_horizon(self.initial_horizon);
        self.model.reset_values();
    }
}

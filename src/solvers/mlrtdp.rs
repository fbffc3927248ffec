use crate::{
    config::SolverConfig,
    model::{ActionId, Ssp, StateId},
    solvers::{
        greedy_action, Horizon, Labeler, Solution, Solver, SolverContext, SolverStatistics,
        TerminationCondition,
    },
};
use std::time::Duration;

/// Myopic LRTDP. Convergence checks are cut off at a step horizon that
/// starts at zero and widens (`h -> 2h + 1`) each time the start state is
/// solved within the horizon but not beyond it, until the start state is
/// fully solved.
///
/// Unlike LRTDP, a dead end reached by the convergence check fails it, so
/// only policies that avoid dead ends altogether are ever labeled.
#[derive(Debug)]
pub struct Mlrtdp<M: Ssp> {
    model: M,
    labeler: Labeler,
    context: SolverContext,
    max_trials: usize,
    time_limit: Option<Duration>,
    memory_limit_mb: Option<usize>,
}

impl<M: Ssp> Mlrtdp<M> {
    pub fn new(model: M, config: &SolverConfig) -> Self {
        Self {
            model,
            labeler: Labeler::new(config.epsilon, Horizon::Steps(0), true).with_failing_dead_ends(),
            context: SolverContext::new(config.seed),
            max_trials: config.max_trials,
            time_limit: config.time_limit(),
            memory_limit_mb: config.memory_limit_mb,
        }
    }

    pub fn is_labeled(&self, state: StateId) -> bool {
        self.labeler.is_labeled(state)
    }

    /// The horizon the last solve finished with.
    pub fn horizon(&self) -> Horizon {
        self.labeler.horizon()
    }
}

impl<M: Ssp> Solver for Mlrtdp<M> {
    fn solve(&mut self, state: StateId) -> Solution {
        let mut statistics = SolverStatistics::new();
        let mut termination = TerminationCondition::new(self.time_limit, self.memory_limit_mb);
        let status = self.labeler.run_widening(
            &mut self.model,
            state,
            self.max_trials,
            self.context.rng(),
            &mut statistics,
            &mut termination,
        );
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
        self.model.reset_values();
    }
}

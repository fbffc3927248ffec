use crate::{
    config::SolverConfig,
    model::{ActionId, ShortSightedSsp, Ssp, StateId, DEAD_END_COST},
    solvers::{
        greedy_action, random_successor, reachable_states, reachable_states_by_probability,
        Horizon, Labeler, LaoStar, Reachability, Solution, SolveStatus, Solver, SolverContext,
        SolverStatistics, TerminationCondition,
    },
};
use std::time::Duration;
use tracing::trace;

/// Short-sighted probabilistic planner.
///
/// Around the current state it builds a short-sighted SSP (states within a
/// step horizon, or above a trajectory probability `rho`), solves it
/// optimally with tip states acting as goals, and moves on by sampling the
/// greedy action on the full problem.
///
/// In labeled mode trials repeat from the start state and converged states
/// of the full problem are labeled after each trial, until the start state
/// is labeled. Labels never come from a short-sighted SSP: a state solved
/// inside one short-sighted SSP is not solved in another one rooted
/// elsewhere. Without labels a single short-sighted SSP around the start
/// state is solved with LRTDP.
#[derive(Debug)]
pub struct Ssipp<M: Ssp> {
    model: M,
    epsilon: f64,
    horizon: usize,
    rho: Option<f64>,
    labeled: bool,
    labeler: Labeler,
    context: SolverContext,
    max_trials: usize,
    time_limit: Option<Duration>,
    memory_limit_mb: Option<usize>,
}

impl<M: Ssp> Ssipp<M> {
    pub fn new(model: M, config: &SolverConfig) -> Self {
        Self {
            model,
            epsilon: config.epsilon,
            // a zero horizon would turn the root itself into a tip
            horizon: config.horizon.max(1),
            rho: config.rho,
            labeled: config.labeled,
            labeler: Labeler::new(config.epsilon, Horizon::Unbounded, true),
            context: SolverContext::new(config.seed),
            max_trials: config.max_trials,
            time_limit: config.time_limit(),
            memory_limit_mb: config.memory_limit_mb,
        }
    }

    /// Labeled as solved on the full problem.
    pub fn is_solved(&self, state: StateId) -> bool {
        self.labeler.is_solved(state)
    }

    fn short_sighted_region(&mut self, root: StateId) -> Reachability {
        match self.rho {
            Some(rho) => reachable_states_by_probability(&mut self.model, root, rho),
            None => reachable_states(&mut self.model, &[root], self.horizon),
        }
    }

    /// Solves the short-sighted SSP rooted at `root` to convergence.
    fn solve_short_sighted(
        &mut self,
        root: StateId,
        statistics: &mut SolverStatistics,
        termination: &mut TerminationCondition,
    ) -> SolveStatus {
        let region = self.short_sighted_region(root);
        trace!(root = root.index(), states = region.states.len(), tips = region.tips.len());
        statistics.increment_expanded_states(region.states.len());
        let wrapper = ShortSightedSsp::new(&mut self.model, root, region.states, region.tips);
        LaoStar::unbounded(wrapper, self.epsilon).run(root, statistics, termination)
    }

    fn solve_labeled(
        &mut self,
        s0: StateId,
        statistics: &mut SolverStatistics,
        termination: &mut TerminationCondition,
    ) -> SolveStatus {
        let mut trials = 0;
        while !self.labeler.is_solved(s0) && !self.model.is_goal(s0) {
            if trials >= self.max_trials {
                return SolveStatus::TrialLimitReached;
            }
            if let Some(status) = termination.should_terminate() {
                return status;
            }
            trials += 1;
            statistics.increment_trials();

            let mut current = s0;
            let mut visited = vec![];
            let mut accumulated_cost = 0.;
            while !self.labeler.is_solved(current) {
                visited.push(current);
                if self.model.is_goal(current) {
                    break;
                }
                let status = self.solve_short_sighted(current, statistics, termination);
                if status != SolveStatus::Converged {
                    return status;
                }
                if self.model.is_dead_end(current) || accumulated_cost >= DEAD_END_COST {
                    break;
                }
                let action = greedy_action(&mut self.model, current);
                if let Some(action) = action {
                    accumulated_cost += self.model.cost(current, action);
                }
                current = random_successor(&mut self.model, current, action, self.context.rng());
            }

            while let Some(state) = visited.pop() {
                if !self.labeler.check_solved(&mut self.model, state, statistics) {
                    break;
                }
            }
        }
        SolveStatus::Converged
    }

    fn solve_unlabeled(
        &mut self,
        s0: StateId,
        statistics: &mut SolverStatistics,
        termination: &mut TerminationCondition,
    ) -> SolveStatus {
        let region = self.short_sighted_region(s0);
        statistics.increment_expanded_states(region.states.len());
        let mut wrapper = ShortSightedSsp::new(&mut self.model, s0, region.states, region.tips);
        // labels of a short-sighted SSP are only valid inside it
        let mut labeler = Labeler::new(self.epsilon, Horizon::Unbounded, true);
        labeler.run_trials(
            &mut wrapper,
            s0,
            self.max_trials,
            self.context.rng(),
            statistics,
            termination,
        )
    }
}

impl<M: Ssp> Solver for Ssipp<M> {
    fn solve(&mut self, state: StateId) -> Solution {
        let mut statistics = SolverStatistics::new();
        let mut termination = TerminationCondition::new(self.time_limit, self.memory_limit_mb);
        let status = if self.labeled {
            self.solve_labeled(state, &mut statistics, &mut termination)
        } else {
            self.solve_unlabeled(state, &mut statistics, &mut termination)
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
        self.model.reset_values();
    }
}

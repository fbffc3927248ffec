use crate::{
    config::SolverConfig,
    model::{ActionId, Ssp, StateId, DEAD_END_COST},
    solvers::{
        Brtdp, Flares, Hdp, Hop, LaoStar, LexiValueIteration, Lrtdp, Mlrtdp, SoftFlares, Ssipp,
        Thts, Uct, ValueIteration, VpiRtdp,
    },
};
use std::{fmt::Debug, time::Duration};
use strum_macros::{Display, EnumIter};

/// How a call to [`Solver::solve`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SolveStatus {
    /// The solver's convergence criterion was met
    Converged,
    /// The start state cannot reach a goal
    DeadEnd,
    /// The trial, iteration or rollout budget ran out first
    TrialLimitReached,
    /// The wall-clock limit ran out first
    TimeLimitExceeded,
    /// The memory limit ran out first
    MemoryLimitExceeded,
}

/// Outcome of a solve: the recommended action for the start state and how
/// the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Solution {
    pub action: Option<ActionId>,
    pub status: SolveStatus,
}

impl Solution {
    pub fn new(action: Option<ActionId>, status: SolveStatus) -> Self {
        Self { action, status }
    }

    /// Reads the recommended action off the cached policy of `state`. A
    /// state whose value reached [`DEAD_END_COST`] is reported as a dead end
    /// whatever `status` says.
    pub fn from_policy<M: Ssp + ?Sized>(model: &M, state: StateId, status: SolveStatus) -> Self {
        if !model.is_goal(state)
            && (model.is_dead_end(state) || model.value(state) >= DEAD_END_COST)
        {
            return Self::new(None, SolveStatus::DeadEnd);
        }
        Self::new(model.best_action(state), status)
    }

    pub fn is_converged(&self) -> bool {
        self.status == SolveStatus::Converged
    }
}

/// Common interface of every solver. A solver owns (or mutably borrows) the
/// model it works on; values and best actions it computes are cached on the
/// model's state records.
pub trait Solver: Debug {
    /// Runs the algorithm from `state`.
    fn solve(&mut self, state: StateId) -> Solution;

    /// The action the solver currently recommends in `state`.
    fn best_action(&mut self, state: StateId) -> Option<ActionId>;

    fn set_max_trials(&mut self, max_trials: usize);

    fn set_time_limit(&mut self, time_limit: Option<Duration>);

    /// Forgets everything learned so far, including cached values.
    fn reset(&mut self);
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
#[clap(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SolverName {
    ValueIteration,
    LexiValueIteration,
    LaoStar,
    Lrtdp,
    Flares,
    SoftFlares,
    Mlrtdp,
    Hdp,
    Ssipp,
    Brtdp,
    VpiRtdp,
    Uct,
    Thts,
    Hop,
}

impl SolverName {
    pub fn create<'a, M: Ssp + 'a>(self, model: M, config: &SolverConfig) -> Box<dyn Solver + 'a> {
        match self {
            SolverName::ValueIteration => Box::new(ValueIteration::new(model, config)),
            SolverName::LexiValueIteration => Box::new(LexiValueIteration::new(model, config)),
            SolverName::LaoStar => Box::new(LaoStar::new(model, config)),
            SolverName::Lrtdp => Box::new(Lrtdp::new(model, config)),
            SolverName::Flares => Box::new(Flares::new(model, config)),
            SolverName::SoftFlares => Box::new(SoftFlares::new(model, config)),
            SolverName::Mlrtdp => Box::new(Mlrtdp::new(model, config)),
            SolverName::Hdp => Box::new(Hdp::new(model, config)),
            SolverName::Ssipp => Box::new(Ssipp::new(model, config)),
            SolverName::Brtdp => Box::new(Brtdp::new(model, config)),
            SolverName::VpiRtdp => Box::new(VpiRtdp::new(model, config)),
            SolverName::Uct => Box::new(Uct::new(model, config)),
            SolverName::Thts => Box::new(Thts::new(model, config)),
            SolverName::Hop => Box::new(Hop::new(model, config)),
        }
    }

    /// Whether the solver plans from scratch at every step rather than
    /// leaving a full policy cached on the model.
    pub fn is_online(self) -> bool {
        matches!(self, SolverName::Uct | SolverName::Thts | SolverName::Hop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::Mdp,
        test_utils::{chain_problem, dead_end_problem, isolated_dead_end_problem},
    };
    use assert_approx_eq::assert_approx_eq;
    use strum::IntoEnumIterator;

    fn seeded_config() -> SolverConfig {
        SolverConfig {
            seed: Some(11),
            max_rollouts: 200,
            ..SolverConfig::default()
        }
    }

    #[test]
    fn every_solver_picks_the_only_action_on_the_chain() {
        for name in SolverName::iter() {
            let mut mdp = Mdp::new(chain_problem());
            let s0 = mdp.initial_state();
            let solution = name.create(&mut mdp, &seeded_config()).solve(s0);
            assert_eq!(solution.action, Some(ActionId::new(0)), "{}", name);
            assert_ne!(solution.status, SolveStatus::DeadEnd, "{}", name);
        }
    }

    #[test]
    fn offline_solvers_find_the_safe_action() {
        for name in SolverName::iter().filter(|name| !name.is_online()) {
            let mut mdp = Mdp::new(dead_end_problem());
            let s0 = mdp.initial_state();
            let solution = name.create(&mut mdp, &seeded_config()).solve(s0);
            assert_eq!(mdp.action(solution.action.unwrap()), "safe", "{}", name);
            assert_approx_eq!(mdp.value(s0), 5., 1e-3);
        }
    }

    #[test]
    fn dead_end_start_is_reported() {
        for name in SolverName::iter() {
            let mut mdp = Mdp::new(isolated_dead_end_problem());
            let s0 = mdp.initial_state();
            let solution = name.create(&mut mdp, &seeded_config()).solve(s0);
            assert_eq!(solution.action, None, "{}", name);
            assert_eq!(solution.status, SolveStatus::DeadEnd, "{}", name);
        }
    }

    #[test]
    fn names_are_kebab_case() {
        assert_eq!(SolverName::LaoStar.to_string(), "lao-star");
        assert_eq!(SolverName::VpiRtdp.to_string(), "vpi-rtdp");
        assert_eq!(SolverName::SoftFlares.to_string(), "soft-flares");
        assert_eq!(SolveStatus::TimeLimitExceeded.to_string(), "time-limit-exceeded");
    }
}

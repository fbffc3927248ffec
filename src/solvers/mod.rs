mod backup;
pub(crate) mod brtdp;
mod concurrent;
mod context;
mod flares;
mod hdp;
mod hop;
mod labeling;
mod labels;
mod lao_star;
mod lexi_value_iteration;
mod lrtdp;
mod mlrtdp;
mod reachability;
mod soft_flares;
mod solver;
mod ssipp;
mod statistics;
mod termination_condition;
mod thts;
mod uct;
mod value_iteration;
mod vpi_rtdp;

pub use backup::{
    bellman_backup, bellman_update, greedy_action, lexi_bellman_update, lexi_qvalue,
    lexi_sample_trial, most_likely_outcome, qvalue, random_successor, residual, sample_trial,
    weighted_bellman_update, weighted_qvalue, Backup, LexiValues,
};
pub use brtdp::Brtdp;
pub use concurrent::{ConcurrentSolver, DEFAULT_SLICE};
pub use context::SolverContext;
pub use flares::Flares;
pub use hdp::Hdp;
pub use hop::Hop;
pub use labeling::{Horizon, Labeler};
pub use labels::{Label, StateLabels};
pub use lao_star::LaoStar;
pub use lexi_value_iteration::LexiValueIteration;
pub use lrtdp::Lrtdp;
pub use mlrtdp::Mlrtdp;
pub use reachability::{
    best_partial_solution_graph, reachable_states, reachable_states_by_probability, Reachability,
};
pub use soft_flares::{DistanceFunction, HorizonFunction, SoftFlares, TransitionModifier};
pub use solver::{Solution, SolveStatus, Solver, SolverName};
pub use ssipp::Ssipp;
pub use statistics::SolverStatistics;
pub use termination_condition::TerminationCondition;
pub use thts::{Thts, ThtsActionSelection, ThtsBackup, ThtsOutcomeSelection, ThtsRecommendation};
pub use uct::Uct;
pub use value_iteration::ValueIteration;
pub use vpi_rtdp::VpiRtdp;

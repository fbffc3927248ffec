mod action;
mod heuristic;
mod mdp;
mod problem;
mod short_sighted;
mod ssp;
mod state;

pub use action::ActionId;
pub use heuristic::{HMinHeuristic, Heuristic, ZeroHeuristic};
pub(crate) use heuristic::reachable_domain_states;
pub use mdp::Mdp;
pub use problem::Problem;
pub use short_sighted::ShortSightedSsp;
pub use ssp::{Ssp, Successor, Successors};
pub use state::{StateId, StateRecord, StateTable};

/// Any cost at or above this value is treated as a dead end.
pub const DEAD_END_COST: f64 = 1000.;

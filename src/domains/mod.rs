mod explicit;
mod gridworld;

pub use explicit::{ExplicitDescription, ExplicitProblem, OutcomeDescription, TransitionDescription};
pub use gridworld::{GridAction, GridCell, GridWorld, ManhattanHeuristic};

use crate::domains::{ExplicitDescription, ExplicitProblem};

/// Open 4x3 grid, start bottom-left, goal top-right, one wall.
pub const OPEN_GRID: &str = "...G
.x..
S...
";

/// Start next to a trap that blocks the direct route to the goal.
pub const TRAP_GRID: &str = "S@G
...
";

/// A grid where the start cell is walled in with a trap.
pub const HOPELESS_GRID: &str = "S@xG
xxx.
";

/// A -go-> B -go-> C, unit costs, C is the goal.
pub fn chain_problem() -> ExplicitProblem {
    ExplicitProblem::new(
        ExplicitDescription::new(&["A", "B", "C"], "A", &["C"])
            .transition("A", "go", 1., &[("B", 1.)])
            .transition("B", "go", 1., &[("C", 1.)]),
    )
    .unwrap()
}

/// S either pays 5 to reach G safely, or pays 1 for a coin flip between G
/// and the dead end D.
pub fn dead_end_problem() -> ExplicitProblem {
    ExplicitProblem::new(
        ExplicitDescription::new(&["S", "D", "G"], "S", &["G"])
            .transition("S", "risky", 1., &[("D", 0.5), ("G", 0.5)])
            .transition("S", "safe", 5., &[("G", 1.)]),
    )
    .unwrap()
}

/// A lone non-goal state with no applicable action.
pub fn isolated_dead_end_problem() -> ExplicitProblem {
    ExplicitProblem::new(ExplicitDescription::new(&["D", "G"], "D", &["G"])).unwrap()
}

/// S -a-> {G: 0.5, T: 0.5} for cost 1; T -b-> G for cost 10.
pub fn stochastic_branch_problem() -> ExplicitProblem {
    ExplicitProblem::new(
        ExplicitDescription::new(&["S", "T", "G"], "S", &["G"])
            .transition("S", "a", 1., &[("G", 0.5), ("T", 0.5)])
            .transition("T", "b", 10., &[("G", 1.)]),
    )
    .unwrap()
}

/// Two actions with identical Q-values out of S.
pub fn tied_actions_problem() -> ExplicitProblem {
    ExplicitProblem::new(
        ExplicitDescription::new(&["S", "G"], "S", &["G"])
            .transition("S", "first", 1., &[("G", 1.)])
            .transition("S", "second", 1., &[("G", 1.)]),
    )
    .unwrap()
}

/// A self-loop with a cheap escape: S -retry-> {S: 0.5, G: 0.5} costs 1,
/// S -walk-> G costs 3. Optimal value of S is 2 via retry.
pub fn retry_problem() -> ExplicitProblem {
    ExplicitProblem::new(
        ExplicitDescription::new(&["S", "G"], "S", &["G"])
            .transition("S", "retry", 1., &[("S", 0.5), ("G", 0.5)])
            .transition("S", "walk", 3., &[("G", 1.)]),
    )
    .unwrap()
}

/// Two routes from S to G that both cost 2. "smooth" is better than "fast"
/// on a second level.
pub fn routes_description() -> ExplicitDescription {
    ExplicitDescription::new(&["S", "G"], "S", &["G"])
        .transition("S", "fast", 2., &[("G", 1.)])
        .secondary_costs(&[10.])
        .transition("S", "smooth", 2., &[("G", 1.)])
        .secondary_costs(&[1.])
}

/// [`retry_problem`] without the walk, where every retry also costs 3 on a
/// second level. Values are 2 and 6.
pub fn lexi_retry_problem() -> ExplicitProblem {
    ExplicitProblem::new(
        ExplicitDescription::new(&["S", "G"], "S", &["G"])
            .transition("S", "retry", 1., &[("S", 0.5), ("G", 0.5)])
            .secondary_costs(&[3.]),
    )
    .unwrap()
}

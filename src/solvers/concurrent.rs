use crate::{
    model::{ActionId, StateId},
    solvers::Solver,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, TryLockError,
    },
    thread::JoinHandle,
    time::Duration,
};
use tracing::{debug, warn};

/// Runs a solver on a background thread, re-solving from the current root
/// until stopped, while the caller queries its recommendations. The root
/// can be moved as the caller executes actions.
///
/// The solver works in time slices and releases its lock between them.
/// After every slice the action it recommends for the root is published,
/// so reading the root's action never waits for the solver, at the price of
/// being up to one slice old.
#[derive(Debug)]
pub struct ConcurrentSolver<S: Solver + Send + 'static> {
    solver: Arc<Mutex<S>>,
    root: Arc<Mutex<StateId>>,
    published: Arc<Mutex<Option<(StateId, Option<ActionId>)>>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

/// Length of a solve slice unless configured otherwise.
pub const DEFAULT_SLICE: Duration = Duration::from_millis(20);

/// Pause between solves once the current root has converged.
const IDLE_WAIT: Duration = Duration::from_millis(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // a panicking solve leaves the solver usable for queries
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: Solver + Send + 'static> ConcurrentSolver<S> {
    /// Starts solving from `root` straight away, in slices of
    /// [`DEFAULT_SLICE`].
    pub fn start(solver: S, root: StateId) -> Self {
        Self::start_with_slice(solver, root, DEFAULT_SLICE)
    }

    /// Starts solving from `root` in slices of `slice`. The solver's own
    /// time limit is replaced by the slice.
    pub fn start_with_slice(mut solver: S, root: StateId, slice: Duration) -> Self {
        solver.set_time_limit(Some(slice));
        let solver = Arc::new(Mutex::new(solver));
        let root = Arc::new(Mutex::new(root));
        let published = Arc::new(Mutex::new(None));
        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let solver = Arc::clone(&solver);
            let root = Arc::clone(&root);
            let published = Arc::clone(&published);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut slices = 0usize;
                while !stop.load(Ordering::Acquire) {
                    let state = *lock(&root);
                    let solution = lock(&solver).solve(state);
                    *lock(&published) = Some((state, solution.action));
                    slices += 1;
                    if solution.is_converged() && *lock(&root) == state {
                        // nothing left to improve until the root moves
                        std::thread::sleep(IDLE_WAIT);
                    }
                }
                debug!(slices, "background solver stopped");
            })
        };
        Self {
            solver,
            root,
            published,
            stop,
            worker: Some(worker),
        }
    }

    pub fn set_root(&self, state: StateId) {
        *lock(&self.root) = state;
    }

    /// The current recommendation for `state`. For the state the last slice
    /// was solved from this is the published action. Other states ask the
    /// solver directly, and get `None` while a slice is running.
    pub fn best_action(&self, state: StateId) -> Option<ActionId> {
        if let Some((root, action)) = *lock(&self.published) {
            if root == state {
                return action;
            }
        }
        match self.solver.try_lock() {
            Ok(mut solver) => solver.best_action(state),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().best_action(state),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Stops the background thread and waits for the slice in progress.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("background solver panicked");
            }
        }
    }

    /// Stops solving and hands the solver back.
    pub fn into_inner(mut self) -> Option<S> {
        self.stop();
        let solver = Arc::clone(&self.solver);
        drop(self);
        Arc::into_inner(solver)
            .map(|mutex| mutex.into_inner().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<S: Solver + Send + 'static> Drop for ConcurrentSolver<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SolverConfig,
        domains::GridWorld,
        model::{Mdp, Ssp},
        solvers::{Lrtdp, Solution, SolveStatus},
        test_utils::{chain_problem, OPEN_GRID},
    };

    /// Blocks inside `solve` until released, then recommends action 7.
    #[derive(Debug, Default)]
    struct GatedSolver {
        entered: Arc<AtomicBool>,
        release: Arc<AtomicBool>,
        time_limit: Option<Duration>,
    }

    impl Solver for GatedSolver {
        fn solve(&mut self, _state: StateId) -> Solution {
            self.entered.store(true, Ordering::Release);
            while !self.release.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(1));
            }
            Solution::new(Some(ActionId::new(7)), SolveStatus::Converged)
        }

        fn best_action(&mut self, _state: StateId) -> Option<ActionId> {
            Some(ActionId::new(7))
        }

        fn set_max_trials(&mut self, _max_trials: usize) {}

        fn set_time_limit(&mut self, time_limit: Option<Duration>) {
            self.time_limit = time_limit;
        }

        fn reset(&mut self) {}
    }

    fn wait_for(flag: &AtomicBool) {
        while !flag.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn recommends_while_solving_in_the_background() {
        let mdp = Mdp::new(chain_problem());
        let s0 = mdp.initial_state();
        let config = SolverConfig {
            seed: Some(1),
            ..SolverConfig::default()
        };
        let mut concurrent = ConcurrentSolver::start(Lrtdp::new(mdp, &config), s0);
        let mut action = None;
        while action.is_none() {
            action = concurrent.best_action(s0);
        }
        concurrent.stop();
        assert_eq!(action, Some(ActionId::new(0)));
    }

    #[test]
    fn queries_do_not_wait_for_a_running_slice() {
        let solver = GatedSolver::default();
        let entered = Arc::clone(&solver.entered);
        let release = Arc::clone(&solver.release);
        let s0 = StateId::new(0);
        let mut concurrent = ConcurrentSolver::start(solver, s0);
        wait_for(&entered);

        // nothing published yet and the solver is busy
        assert_eq!(concurrent.best_action(s0), None);
        assert_eq!(concurrent.best_action(StateId::new(1)), None);

        release.store(true, Ordering::Release);
        let mut action = None;
        while action.is_none() {
            action = concurrent.best_action(s0);
        }
        assert_eq!(action, Some(ActionId::new(7)));
        concurrent.stop();
    }

    #[test]
    fn solver_time_limit_becomes_the_slice() {
        let solver = GatedSolver::default();
        solver.release.store(true, Ordering::Release);
        let slice = Duration::from_millis(5);
        let concurrent = ConcurrentSolver::start_with_slice(solver, StateId::new(0), slice);
        let solver = concurrent.into_inner().unwrap();
        assert_eq!(solver.time_limit, Some(slice));
    }

    #[test]
    fn slices_add_up_to_a_solution() {
        let grid = GridWorld::from_map(OPEN_GRID).unwrap();
        let mdp = Mdp::new(grid);
        let s0 = mdp.initial_state();
        let config = SolverConfig {
            seed: Some(3),
            ..SolverConfig::default()
        };
        let slice = Duration::from_millis(1);
        let concurrent = ConcurrentSolver::start_with_slice(Lrtdp::new(mdp, &config), s0, slice);
        while concurrent.best_action(s0).is_none() {
            std::thread::sleep(Duration::from_millis(1));
        }
        let mut lrtdp = concurrent.into_inner().unwrap();
        // the slices left the solver's labels and values in place
        lrtdp.set_time_limit(None);
        assert!(lrtdp.solve(s0).is_converged());
        assert!(lrtdp.is_solved(s0));
    }

    #[test]
    fn hands_the_solver_back() {
        let mdp = Mdp::new(chain_problem());
        let s0 = mdp.initial_state();
        let concurrent = ConcurrentSolver::start(Lrtdp::new(mdp, &SolverConfig::default()), s0);
        concurrent.set_root(s0);
        let mut lrtdp = concurrent.into_inner().unwrap();
        assert_eq!(lrtdp.best_action(s0), Some(ActionId::new(0)));
    }
}

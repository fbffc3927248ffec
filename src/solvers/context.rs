use rand::{rngs::StdRng, Rng, SeedableRng};

/// Per-solver random state. Every sampling decision a solver makes draws
/// from its own context, so two solvers built with the same seed and run on
/// the same problem make identical choices.
#[derive(Debug, Clone)]
pub struct SolverContext {
    rng: StdRng,
}

impl SolverContext {
    /// A context seeded from `seed`, or from system entropy without one.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Uniform sample from `[0, 1)`.
    pub fn uniform(&mut self) -> f64 {
        self.rng.gen()
    }
}

impl Default for SolverContext {
    fn default() -> Self {
        Self::new(None)
    }
}

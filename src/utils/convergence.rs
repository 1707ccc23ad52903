//! Convergence tracking & tolerance checks for iterative solvers.

use crate::core::field::LatticeField;

/// Stopping criteria.
#[derive(Clone, Copy, Debug)]
pub struct Convergence {
    /// Relative residual tolerance; `0` disables the test so the solver runs
    /// `max_iters` iterations.
    pub tol: f64,
    pub max_iters: usize,
}

#[derive(Clone, Debug)]
pub struct SolveStats {
    pub iterations: usize,
    pub final_residual: f64,
    pub converged: bool,
    /// Final residual field, when the solver was asked to return it.
    pub residual: Option<LatticeField>,
}

impl SolveStats {
    pub fn new(iterations: usize, final_residual: f64, converged: bool) -> Self {
        Self {
            iterations,
            final_residual,
            converged,
            residual: None,
        }
    }
}

impl Convergence {
    /// Returns `(should_stop, converged)` given the current residual norm, the norm it is
    /// measured against, and iteration `i`.
    pub fn check(&self, res_norm: f64, ref_norm: f64, i: usize) -> (bool, bool) {
        let converged = self.tol > 0.0 && res_norm <= self.tol * ref_norm;
        (converged || i >= self.max_iters, converged)
    }
}

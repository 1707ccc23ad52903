//! Factory for the solvers used inside the hierarchy.
//!
//! Smoothers, coarse-grid wrappers and the near-kernel setup all describe the solver
//! they need with a `SolverParam`; `create_solver` turns that into a boxed
//! [`LinearSolver`].
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems. SIAM.

use crate::error::MgError;
use crate::solver::{
    BiCgStabSolver, CgnrSolver, DirectSolver, GcrSolver, LinearSolver, MrSolver,
};

/// Solver algorithms available to the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
    /// Minimal residual
    Mr,
    /// Generalized conjugate residual with restarts (flexible)
    Gcr,
    /// Conjugate gradient on the normal equations `A†A x = A†b`
    Cg,
    /// BiConjugate Gradient Stabilized
    BiCgStab,
    /// Dense LU factorization of the assembled operator
    Direct,
    /// GCR preconditioned by the multigrid level itself; only meaningful for the
    /// near-kernel setup
    Multigrid,
}

/// Parameters of one solver instance.
#[derive(Debug, Clone)]
pub struct SolverParam {
    pub kind: SolverKind,
    /// Relative residual tolerance; `0` disables the convergence test.
    pub tol: f64,
    pub maxiter: usize,
    /// Krylov subspace size before a GCR restart.
    pub n_krylov: usize,
    /// Relaxation factor of MR.
    pub omega: f64,
    /// Hand the final residual back in `SolveStats::residual`.
    pub return_residual: bool,
    /// Start from the incoming contents of `x` instead of zero.
    pub use_init_guess: bool,
}

impl SolverParam {
    pub fn new(kind: SolverKind, tol: f64, maxiter: usize) -> Self {
        Self {
            kind,
            tol,
            maxiter,
            n_krylov: maxiter.clamp(1, 16),
            omega: 1.0,
            return_residual: false,
            use_init_guess: false,
        }
    }

    pub fn with_n_krylov(mut self, n_krylov: usize) -> Self {
        self.n_krylov = n_krylov.max(1);
        self
    }

    pub fn with_return_residual(mut self, flag: bool) -> Self {
        self.return_residual = flag;
        self
    }

    pub fn with_init_guess(mut self, flag: bool) -> Self {
        self.use_init_guess = flag;
        self
    }
}

/// Build the solver described by `param`.
///
/// `SolverKind::Multigrid` builds the GCR outer solver; the caller supplies the
/// multigrid level as preconditioner at solve time.
pub fn create_solver(param: &SolverParam) -> Result<Box<dyn LinearSolver>, MgError> {
    let solver: Box<dyn LinearSolver> = match param.kind {
        SolverKind::Mr => Box::new(MrSolver::new(param.clone())),
        SolverKind::Gcr | SolverKind::Multigrid => Box::new(GcrSolver::new(param.clone())),
        SolverKind::Cg => Box::new(CgnrSolver::new(param.clone())),
        SolverKind::BiCgStab => Box::new(BiCgStabSolver::new(param.clone())),
        SolverKind::Direct => Box::new(DirectSolver::new(param.clone())),
    };
    Ok(solver)
}

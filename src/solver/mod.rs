//! Krylov & direct solver interfaces.

use crate::context::ksp_context::SolverParam;
use crate::core::blas;
use crate::core::field::LatticeField;
use crate::core::traits::LinearOperator;
use crate::error::MgError;
use crate::preconditioner::FlexiblePreconditioner;
use crate::utils::convergence::SolveStats;

/// Common interface for any direct or iterative solver.
pub trait LinearSolver: Send {
    fn param(&self) -> &SolverParam;

    /// Solve `A·x = b`, writing the result into `x`.
    ///
    /// `x` is used as the initial guess when the solver was configured with
    /// `use_init_guess`, and zeroed otherwise. Solvers that do not support
    /// preconditioning ignore `pc`. Hitting the iteration limit is not an error;
    /// it is reported through `SolveStats::converged`.
    fn solve(
        &mut self,
        a: &dyn LinearOperator,
        pc: Option<&mut dyn FlexiblePreconditioner>,
        b: &LatticeField,
        x: &mut LatticeField,
    ) -> Result<SolveStats, MgError>;
}

/// `r = b - A x`, returning `‖r‖²`.
pub(crate) fn residual(
    a: &dyn LinearOperator,
    b: &LatticeField,
    x: &LatticeField,
    r: &mut LatticeField,
) -> Result<f64, MgError> {
    a.apply(r, x)?;
    Ok(blas::xmy_norm(b, r))
}

/// Initial residual honouring `use_init_guess`; returns `‖r‖²`.
pub(crate) fn initial_residual(
    param: &SolverParam,
    a: &dyn LinearOperator,
    b: &LatticeField,
    x: &mut LatticeField,
    r: &mut LatticeField,
) -> Result<f64, MgError> {
    if param.use_init_guess {
        residual(a, b, x, r)
    } else {
        x.zero();
        r.copy_from(b)?;
        Ok(blas::norm2(r))
    }
}

pub mod bicgstab;
pub use bicgstab::BiCgStabSolver;

pub mod cgnr;
pub use cgnr::CgnrSolver;

pub mod direct_lu;
pub use direct_lu::DirectSolver;

pub mod gcr;
pub use gcr::GcrSolver;

pub mod mr;
pub use mr::MrSolver;

//! Solvers bound to an operator.
//!
//! Smoothers, coarse-grid wrappers and the near-kernel setup all run a solver on a fixed
//! operator. When the operator is a Schur complement but the caller's fields cover the
//! full lattice, the solve goes through `prepare` → solve → `reconstruct`; the returned
//! residual then belongs to the reduced system and is dropped.

use crate::context::ksp_context::{SolverParam, create_solver};
use crate::core::field::{LatticeField, SiteSubset};
use crate::core::traits::LinearOperator;
use crate::error::MgError;
use crate::preconditioner::FlexiblePreconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::SolveStats;
use std::sync::Arc;

pub struct Smoother {
    solver: Box<dyn LinearSolver>,
    op: Arc<dyn LinearOperator>,
    b_hat: Option<LatticeField>,
    x_hat: Option<LatticeField>,
}

impl Smoother {
    pub fn new(param: &SolverParam, op: Arc<dyn LinearOperator>) -> Result<Self, MgError> {
        Ok(Self {
            solver: create_solver(param)?,
            op,
            b_hat: None,
            x_hat: None,
        })
    }

    pub fn param(&self) -> &SolverParam {
        self.solver.param()
    }

    pub fn op(&self) -> &Arc<dyn LinearOperator> {
        &self.op
    }

    /// Solve `A x = b` on the caller's layout.
    pub fn solve(
        &mut self,
        pc: Option<&mut dyn FlexiblePreconditioner>,
        b: &LatticeField,
        x: &mut LatticeField,
    ) -> Result<SolveStats, MgError> {
        let reduced = self.op.is_preconditioned() && b.param().subset == SiteSubset::Full;
        if !reduced {
            return self.solver.solve(self.op.as_ref(), pc, b, x);
        }
        let template = self.op.param().clone().with_precision(b.precision());
        let b_hat = self
            .b_hat
            .get_or_insert_with(|| LatticeField::new(template.clone()));
        let x_hat = self.x_hat.get_or_insert_with(|| LatticeField::new(template));
        self.op.prepare(b_hat, b)?;
        if self.solver.param().use_init_guess {
            x_hat.copy_from(x)?;
        }
        let mut stats = self.solver.solve(self.op.as_ref(), pc, b_hat, x_hat)?;
        self.op.reconstruct(x_hat, b, x)?;
        stats.residual = None;
        Ok(stats)
    }
}

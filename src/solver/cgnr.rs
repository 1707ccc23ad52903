//! CGNR solver (Saad §8.3)
//!
//! Applies conjugate gradients to the normal equations `A†A x = A†b`, which are Hermitian
//! positive definite for any non-singular `A`. Convergence is tested on the true residual
//! `‖b - A x‖`, which the recurrence tracks for free.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, Section 8.3.
//! - https://en.wikipedia.org/wiki/Conjugate_gradient_method#The_normal_equations

use crate::context::ksp_context::SolverParam;
use crate::core::blas;
use crate::core::field::LatticeField;
use crate::core::traits::LinearOperator;
use crate::error::MgError;
use crate::preconditioner::FlexiblePreconditioner;
use crate::solver::{LinearSolver, initial_residual};
use crate::utils::convergence::{Convergence, SolveStats};

pub struct CgnrSolver {
    param: SolverParam,
    pub conv: Convergence,
}

impl CgnrSolver {
    pub fn new(param: SolverParam) -> Self {
        let conv = Convergence {
            tol: param.tol,
            max_iters: param.maxiter,
        };
        Self { param, conv }
    }
}

impl LinearSolver for CgnrSolver {
    fn param(&self) -> &SolverParam {
        &self.param
    }

    fn solve(
        &mut self,
        a: &dyn LinearOperator,
        _pc: Option<&mut dyn FlexiblePreconditioner>,
        b: &LatticeField,
        x: &mut LatticeField,
    ) -> Result<SolveStats, MgError> {
        let template = b.param().clone();
        let mut r = LatticeField::new(template.clone());
        let b_norm = blas::norm2(b).sqrt();
        let mut r_norm = initial_residual(&self.param, a, b, x, &mut r)?.sqrt();
        // z = A† r, p = z
        let mut z = LatticeField::new(template.clone());
        a.apply_dagger(&mut z, &r)?;
        let mut p = z.clone();
        let mut q = LatticeField::new(template);
        let mut gamma = blas::norm2(&z);

        let mut iterations = 0;
        let (mut stop, mut converged) = self.conv.check(r_norm, b_norm, iterations);
        while !stop && gamma > 0.0 {
            a.apply(&mut q, &p)?;
            let q2 = blas::norm2(&q);
            if q2 == 0.0 {
                log::debug!("CGNR: breakdown after {iterations} iterations");
                break;
            }
            let alpha = gamma / q2;
            blas::axpy(alpha, &p, x);
            blas::axpy(-alpha, &q, &mut r);
            a.apply_dagger(&mut z, &r)?;
            let gamma_new = blas::norm2(&z);
            let beta = gamma_new / gamma;
            gamma = gamma_new;
            // p = z + beta p
            blas::axpby(1.0, &z, beta, &mut p);
            iterations += 1;
            r_norm = blas::norm2(&r).sqrt();
            (stop, converged) = self.conv.check(r_norm, b_norm, iterations);
        }
        let mut stats = SolveStats::new(iterations, r_norm, converged);
        if self.param.return_residual {
            stats.residual = Some(r);
        }
        Ok(stats)
    }
}

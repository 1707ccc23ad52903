//! Generalized conjugate residual (GCR) solver with restarts (Eisenstat, Elman & Schultz).
//!
//! Right-preconditioned and flexible: the preconditioner may change from one application
//! to the next, which is what a multigrid cycle with Krylov smoothers does. Each search
//! direction `z_k = M r` is paired with `p_k = A z_k`; the `p_k` are kept orthonormal by
//! modified Gram-Schmidt, applying the same combinations to the `z_k`. After `n_krylov`
//! directions the basis is discarded and the true residual recomputed.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd Edition. SIAM. §9.4
//! - Eisenstat, Elman & Schultz (1983). SIAM J. Numer. Anal. 20(2).

use crate::context::ksp_context::SolverParam;
use crate::core::blas;
use crate::core::field::LatticeField;
use crate::core::traits::LinearOperator;
use crate::error::MgError;
use crate::preconditioner::FlexiblePreconditioner;
use crate::solver::{LinearSolver, initial_residual, residual};
use crate::utils::convergence::{Convergence, SolveStats};

pub struct GcrSolver {
    param: SolverParam,
    pub conv: Convergence,
    /// History of residual norms for each iteration
    pub residual_history: Vec<f64>,
}

impl GcrSolver {
    pub fn new(param: SolverParam) -> Self {
        let conv = Convergence {
            tol: param.tol,
            max_iters: param.maxiter,
        };
        Self {
            param,
            conv,
            residual_history: Vec::new(),
        }
    }
}

impl LinearSolver for GcrSolver {
    fn param(&self) -> &SolverParam {
        &self.param
    }

    fn solve(
        &mut self,
        a: &dyn LinearOperator,
        mut pc: Option<&mut dyn FlexiblePreconditioner>,
        b: &LatticeField,
        x: &mut LatticeField,
    ) -> Result<SolveStats, MgError> {
        let template = b.param().clone();
        let mut r = LatticeField::new(template.clone());
        let b_norm = blas::norm2(b).sqrt();
        let mut r_norm = initial_residual(&self.param, a, b, x, &mut r)?.sqrt();
        self.residual_history.clear();
        self.residual_history.push(r_norm);

        let n_krylov = self.param.n_krylov.max(1);
        let mut p_basis: Vec<LatticeField> = Vec::with_capacity(n_krylov);
        let mut z_basis: Vec<LatticeField> = Vec::with_capacity(n_krylov);
        let mut iterations = 0;
        let (mut stop, mut converged) = self.conv.check(r_norm, b_norm, iterations);

        'outer: while !stop {
            p_basis.clear();
            z_basis.clear();
            for _ in 0..n_krylov {
                let mut zk = LatticeField::new(template.clone());
                match pc.as_mut() {
                    Some(m) => m.apply(&r, &mut zk)?,
                    None => zk.copy_from(&r)?,
                }
                let mut pk = LatticeField::new(template.clone());
                a.apply(&mut pk, &zk)?;
                for (pj, zj) in p_basis.iter().zip(&z_basis) {
                    let beta = blas::cdot(pj, &pk);
                    blas::caxpy(-beta, pj, &mut pk);
                    blas::caxpy(-beta, zj, &mut zk);
                }
                let gamma = blas::norm2(&pk).sqrt();
                if gamma == 0.0 {
                    log::debug!("GCR: search direction vanished after {iterations} iterations");
                    break 'outer;
                }
                blas::ax(1.0 / gamma, &mut pk);
                blas::ax(1.0 / gamma, &mut zk);
                let alpha = blas::cdot(&pk, &r);
                blas::caxpy(alpha, &zk, x);
                blas::caxpy(-alpha, &pk, &mut r);
                p_basis.push(pk);
                z_basis.push(zk);

                iterations += 1;
                r_norm = blas::norm2(&r).sqrt();
                self.residual_history.push(r_norm);
                (stop, converged) = self.conv.check(r_norm, b_norm, iterations);
                if stop {
                    break 'outer;
                }
            }
            r_norm = residual(a, b, x, &mut r)?.sqrt();
            (stop, converged) = self.conv.check(r_norm, b_norm, iterations);
        }

        let mut stats = SolveStats::new(iterations, r_norm, converged);
        if self.param.return_residual {
            stats.residual = Some(r);
        }
        Ok(stats)
    }
}

//! BiCGStab solver (Saad §7.4.2)

use crate::context::ksp_context::SolverParam;
use crate::core::blas;
use crate::core::field::LatticeField;
use crate::core::traits::LinearOperator;
use crate::error::MgError;
use crate::preconditioner::FlexiblePreconditioner;
use crate::solver::{LinearSolver, initial_residual};
use crate::utils::convergence::{Convergence, SolveStats};
use num_complex::Complex64;

pub struct BiCgStabSolver {
    param: SolverParam,
    pub conv: Convergence,
}

impl BiCgStabSolver {
    pub fn new(param: SolverParam) -> Self {
        let conv = Convergence {
            tol: param.tol,
            max_iters: param.maxiter,
        };
        Self { param, conv }
    }
}

impl LinearSolver for BiCgStabSolver {
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
        let r_hat = r.clone(); // shadow residual
        let mut p = LatticeField::new(template.clone());
        let mut v = LatticeField::new(template.clone());
        let mut s = LatticeField::new(template.clone());
        let mut t = LatticeField::new(template);
        let one = Complex64::new(1.0, 0.0);
        let (mut rho_prev, mut alpha, mut omega) = (one, one, one);

        let mut iterations = 0;
        let (mut stop, mut converged) = self.conv.check(r_norm, b_norm, iterations);
        while !stop && r_norm > 0.0 {
            let rho = blas::cdot(&r_hat, &r);
            if rho.norm() == 0.0 {
                log::debug!("BiCGStab: rho breakdown after {iterations} iterations");
                break;
            }
            if iterations == 0 {
                p.copy_from(&r)?;
            } else {
                // p = r + beta * (p - omega * v)
                let beta = (rho / rho_prev) * (alpha / omega);
                blas::caxpy(-omega, &v, &mut p);
                blas::cxpby(&r, beta, &mut p);
            }
            a.apply(&mut v, &p)?;
            let denom = blas::cdot(&r_hat, &v);
            if denom.norm() == 0.0 {
                log::debug!("BiCGStab: alpha breakdown after {iterations} iterations");
                break;
            }
            alpha = rho / denom;
            // s = r - alpha * v
            s.copy_from(&r)?;
            blas::caxpy(-alpha, &v, &mut s);
            let s_norm = blas::norm2(&s).sqrt();
            iterations += 1;
            let (s_stop, s_conv) = self.conv.check(s_norm, b_norm, iterations);
            if s_conv {
                blas::caxpy(alpha, &p, x);
                r.copy_from(&s)?;
                r_norm = s_norm;
                converged = true;
                break;
            }
            a.apply(&mut t, &s)?;
            let t2 = blas::norm2(&t);
            if t2 == 0.0 {
                blas::caxpy(alpha, &p, x);
                r.copy_from(&s)?;
                r_norm = s_norm;
                break;
            }
            omega = blas::cdot(&t, &s) / t2;
            blas::caxpy(alpha, &p, x);
            blas::caxpy(omega, &s, x);
            // r = s - omega * t
            r.copy_from(&s)?;
            blas::caxpy(-omega, &t, &mut r);
            r_norm = blas::norm2(&r).sqrt();
            (stop, converged) = self.conv.check(r_norm, b_norm, iterations);
            stop |= s_stop;
            if omega.norm() == 0.0 {
                break;
            }
            rho_prev = rho;
        }
        let mut stats = SolveStats::new(iterations, r_norm, converged);
        if self.param.return_residual {
            stats.residual = Some(r);
        }
        Ok(stats)
    }
}

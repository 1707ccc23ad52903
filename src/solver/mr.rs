//! Minimal residual (MR) iteration (Saad §5.3.2)
//!
//! Each step minimises `‖r - α A r‖` over the complex scalar `α` and relaxes the update by
//! `ω`. Cheap and local, which makes it the default smoother.

use crate::context::ksp_context::SolverParam;
use crate::core::blas;
use crate::core::field::LatticeField;
use crate::core::traits::LinearOperator;
use crate::error::MgError;
use crate::preconditioner::FlexiblePreconditioner;
use crate::solver::{LinearSolver, initial_residual};
use crate::utils::convergence::{Convergence, SolveStats};

pub struct MrSolver {
    param: SolverParam,
    pub conv: Convergence,
}

impl MrSolver {
    pub fn new(param: SolverParam) -> Self {
        let conv = Convergence {
            tol: param.tol,
            max_iters: param.maxiter,
        };
        Self { param, conv }
    }
}

impl LinearSolver for MrSolver {
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
        let mut r = LatticeField::new(b.param().clone());
        let mut ar = LatticeField::new(b.param().clone());
        let b_norm = blas::norm2(b).sqrt();
        let mut r_norm = initial_residual(&self.param, a, b, x, &mut r)?.sqrt();
        let mut iterations = 0;
        let (mut stop, mut converged) = self.conv.check(r_norm, b_norm, iterations);
        while !stop {
            a.apply(&mut ar, &r)?;
            let ar2 = blas::norm2(&ar);
            if ar2 == 0.0 {
                break;
            }
            let alpha = blas::cdot(&ar, &r) / ar2 * self.param.omega;
            blas::caxpy(alpha, &r, x);
            blas::caxpy(-alpha, &ar, &mut r);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ksp_context::SolverKind;
    use crate::core::field::SourceKind;
    use crate::core::lattice::Lattice;
    use crate::matrix::StencilOperator;

    #[test]
    fn residual_decreases_monotonically_and_is_returned() {
        let op = StencilOperator::laplacian(Lattice::new(&[4, 4]).unwrap(), 1.0).unwrap();
        let mut b = LatticeField::new(op.param().clone());
        b.source(SourceKind::Random(1)).unwrap();
        let mut last = f64::INFINITY;
        for iters in 1..6 {
            let param = SolverParam::new(SolverKind::Mr, 0.0, iters).with_return_residual(true);
            let mut x = LatticeField::new(op.param().clone());
            let stats = MrSolver::new(param).solve(&op, None, &b, &mut x).unwrap();
            assert_eq!(stats.iterations, iters);
            assert!(stats.final_residual <= last);
            last = stats.final_residual;
            let r = stats.residual.unwrap();
            let mut check = LatticeField::new(op.param().clone());
            op.apply(&mut check, &x).unwrap();
            let true_r2 = blas::xmy_norm(&b, &mut check);
            assert!((true_r2.sqrt() - blas::norm2(&r).sqrt()).abs() < 1e-10);
        }
    }
}

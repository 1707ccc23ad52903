//! Direct dense solver using Faer.
//!
//! The operator is assembled column by column by applying it to unit vectors, then factored
//! with full-pivoting LU (through the real embedding of the complex matrix). Suited to the
//! coarsest level of a hierarchy, where the operator is small.
//!
//! # References
//! - Faer documentation: https://github.com/sarah-ek/faer-rs
//! - Golub & Van Loan, Matrix Computations

use crate::context::ksp_context::SolverParam;
use crate::core::field::LatticeField;
use crate::core::precision::Precision;
use crate::core::traits::LinearOperator;
use crate::error::MgError;
use crate::matrix::dense::ComplexLu;
use crate::preconditioner::FlexiblePreconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::SolveStats;
use num_complex::Complex64;

/// LU solver; the factorization is computed on first use and cached.
pub struct DirectSolver {
    param: SolverParam,
    factor: Option<ComplexLu>,
}

impl DirectSolver {
    pub fn new(param: SolverParam) -> Self {
        Self {
            param,
            factor: None,
        }
    }

    /// Assemble and factor `a`, replacing any cached factorization.
    pub fn factor(&mut self, a: &dyn LinearOperator) -> Result<(), MgError> {
        let template = a.param().clone().with_precision(Precision::Double);
        let n = template.len();
        let mut dense = vec![Complex64::new(0.0, 0.0); n * n];
        let mut e = LatticeField::new(template.clone());
        let mut col = LatticeField::new(template);
        for j in 0..n {
            e.zero();
            e.data_mut()[j] = Complex64::new(1.0, 0.0);
            a.apply(&mut col, &e)?;
            for (i, v) in col.data().iter().enumerate() {
                dense[i * n + j] = *v;
            }
        }
        self.factor = Some(ComplexLu::new(&dense, n)?);
        Ok(())
    }

    pub fn is_factored(&self) -> bool {
        self.factor.is_some()
    }
}

impl LinearSolver for DirectSolver {
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
        if self.factor.is_none() {
            self.factor(a)?;
        }
        let Some(factor) = self.factor.as_ref() else {
            return Err(MgError::FactorError("no factorization available".into()));
        };
        if factor.dim() != b.len() {
            return Err(MgError::DimensionMismatch(format!(
                "factorization of size {} applied to vector of length {}",
                factor.dim(),
                b.len()
            )));
        }
        let mut sol = b.data().to_vec();
        factor.solve_in_place(&mut sol)?;
        x.data_mut().copy_from_slice(&sol);
        x.round_to_precision();
        Ok(SolveStats::new(1, 0.0, true))
    }
}

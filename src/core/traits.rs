//! Core operator trait for lamg.

use crate::core::field::{FieldParam, LatticeField};
use crate::core::precision::Precision;
use crate::error::MgError;

/// A linear operator acting on lattice fields: `out ← A · input`.
///
/// Operators come in two flavours. A full operator acts on full-lattice fields. A
/// preconditioned (Schur-complement) operator acts on a single parity; it additionally
/// knows how to `prepare` a full-lattice right-hand side into its own domain and how to
/// `reconstruct` the full-lattice solution afterwards.
pub trait LinearOperator: Send + Sync {
    /// Layout of the fields this operator acts on.
    fn param(&self) -> &FieldParam;

    /// Compute `out = A · input`.
    fn apply(&self, out: &mut LatticeField, input: &LatticeField) -> Result<(), MgError>;

    /// Compute `out = A† · input`.
    fn apply_dagger(&self, out: &mut LatticeField, input: &LatticeField) -> Result<(), MgError>;

    /// Compute `out = A† A · input`.
    fn apply_mdag_m(&self, out: &mut LatticeField, input: &LatticeField) -> Result<(), MgError> {
        let mut tmp = LatticeField::new(self.param().clone());
        self.apply(&mut tmp, input)?;
        self.apply_dagger(out, &tmp)
    }

    /// Hopping normalisation, used by the twisted-mass shift on coarse levels.
    fn kappa(&self) -> f64 {
        0.0
    }

    /// Twisted-mass parameter.
    fn mu(&self) -> f64 {
        0.0
    }

    fn precision(&self) -> Precision {
        self.param().precision
    }

    /// True for single-parity Schur-complement operators.
    fn is_preconditioned(&self) -> bool {
        false
    }

    /// Map a full-lattice right-hand side `b` into this operator's domain.
    fn prepare(&self, b_hat: &mut LatticeField, b: &LatticeField) -> Result<(), MgError> {
        b_hat.copy_from(b)
    }

    /// Recover the full-lattice solution `x` from the solution `x_hat` of the prepared
    /// system with original right-hand side `b`.
    fn reconstruct(
        &self,
        x_hat: &LatticeField,
        _b: &LatticeField,
        x: &mut LatticeField,
    ) -> Result<(), MgError> {
        x.copy_from(x_hat)
    }

    /// Layout of the full-lattice fields passed to `prepare` and `reconstruct`.
    fn full_param(&self) -> FieldParam {
        self.param().clone()
    }
}

/// Fail unless `out` and `input` both match the operator's layout.
pub(crate) fn check_domain(
    param: &FieldParam,
    out: &LatticeField,
    input: &LatticeField,
) -> Result<(), MgError> {
    for (name, f) in [("output", out), ("input", input)] {
        if !param.same_layout(f.param()) {
            return Err(MgError::DimensionMismatch(format!(
                "{name} field {} does not match operator domain {}",
                f.param().describe(),
                param.describe()
            )));
        }
    }
    Ok(())
}

//! Preconditioner interface.
//!
//! A multigrid cycle with Krylov smoothers is not a fixed linear map: its action changes
//! with every application. Solvers therefore only see the flexible interface, and the
//! multigrid levels implement it directly.

use crate::core::field::LatticeField;
use crate::error::MgError;

/// A preconditioner whose action M⁻¹ may change at every iteration.
pub trait FlexiblePreconditioner {
    /// Given the current residual `r`, produce `z ≈ Mₖ⁻¹ r`.
    fn apply(&mut self, r: &LatticeField, z: &mut LatticeField) -> Result<(), MgError>;
}

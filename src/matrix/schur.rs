//! Even/odd Schur-complement operators.
//!
//! For a bipartite stencil ordered as `[[D_pp, H_pq], [H_qp, D_qq]]`, the asymmetric
//! Schur complement on parity `p` is `Â = D_pp - H_pq D_qq⁻¹ H_qp`. A full solve
//! `A x = b` becomes `Â x_p = b_p - H_pq D_qq⁻¹ b_q` followed by
//! `x_q = D_qq⁻¹ (b_q - H_qp x_p)`.

use crate::config::MatPcType;
use crate::core::blas;
use crate::core::field::{FieldParam, LatticeField, SiteSubset};
use crate::core::precision::Precision;
use crate::core::traits::{LinearOperator, check_domain};
use crate::error::MgError;
use crate::matrix::dense::{gemv_add, gemv_dagger_add, invert_block};
use crate::matrix::stencil::{StencilOperator, StencilPart};
use num_complex::Complex64;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SchurOperator {
    base: StencilOperator,
    parity: usize,
    param: FieldParam,
    /// Inverse local blocks of the eliminated parity, by checkerboard index.
    diag_inv: Arc<Vec<Complex64>>,
}

impl SchurOperator {
    pub fn new(base: &StencilOperator, matpc: MatPcType) -> Result<Self, MgError> {
        if !base.is_bipartite() {
            return Err(MgError::config(format!(
                "even/odd preconditioning needs a bipartite stencil on even extents, lattice is {:?}",
                base.lattice().dims()
            )));
        }
        let parity = matpc.parity();
        let other = 1 - parity;
        let dof = base.dof();
        let mut diag_inv = Vec::with_capacity(base.lattice().parity_sites(other).len() * dof * dof);
        for &site in base.lattice().parity_sites(other) {
            diag_inv.extend(invert_block(base.diagonal_block(site), dof)?);
        }
        let param = base
            .param()
            .clone()
            .with_subset(SiteSubset::Parity(parity));
        Ok(Self {
            base: base.clone(),
            parity,
            param,
            diag_inv: Arc::new(diag_inv),
        })
    }

    /// Same operator, output rounded to `precision`.
    pub fn with_precision(&self, precision: Precision) -> Self {
        let mut op = self.clone();
        op.base = self.base.with_precision(precision);
        op.param.precision = precision;
        op
    }

    pub fn parity(&self) -> usize {
        self.parity
    }

    pub fn base(&self) -> &StencilOperator {
        &self.base
    }

    fn scratch(&self, parity: usize) -> LatticeField {
        LatticeField::new(
            self.base
                .param()
                .clone()
                .with_subset(SiteSubset::Parity(parity))
                .with_precision(Precision::Double),
        )
    }

    /// `x ← D_qq⁻¹ x` (or `D_qq⁻† x`) on a field of the eliminated parity.
    fn apply_diag_inv(&self, x: &mut LatticeField, dagger: bool) {
        let dof = self.base.dof();
        let bs = dof * dof;
        let mut tmp = vec![Complex64::new(0.0, 0.0); dof];
        for local in 0..x.param().sites() {
            let block = &self.diag_inv[local * bs..(local + 1) * bs];
            let site = x.site_mut(local);
            tmp.fill(Complex64::new(0.0, 0.0));
            if dagger {
                gemv_dagger_add(&mut tmp, block, site, dof, dof);
            } else {
                gemv_add(&mut tmp, block, site, dof, dof);
            }
            site.copy_from_slice(&tmp);
        }
    }

    fn apply_impl(
        &self,
        out: &mut LatticeField,
        input: &LatticeField,
        dagger: bool,
    ) -> Result<(), MgError> {
        check_domain(&self.param, out, input)?;
        let other = 1 - self.parity;
        let mut t = self.scratch(other);
        self.base.apply_part(&mut t, input, StencilPart::Hopping, dagger);
        self.apply_diag_inv(&mut t, dagger);
        let mut h = self.scratch(self.parity);
        self.base.apply_part(&mut h, &t, StencilPart::Hopping, dagger);
        let mut d = self.scratch(self.parity);
        self.base.apply_part(&mut d, input, StencilPart::Diagonal, dagger);
        blas::axpy(-1.0, &h, &mut d);
        d.round_to(self.param.precision);
        out.copy_from(&d)
    }
}

impl LinearOperator for SchurOperator {
    fn param(&self) -> &FieldParam {
        &self.param
    }

    fn apply(&self, out: &mut LatticeField, input: &LatticeField) -> Result<(), MgError> {
        self.apply_impl(out, input, false)
    }

    fn apply_dagger(&self, out: &mut LatticeField, input: &LatticeField) -> Result<(), MgError> {
        self.apply_impl(out, input, true)
    }

    fn kappa(&self) -> f64 {
        self.base.kappa()
    }

    fn mu(&self) -> f64 {
        self.base.mu()
    }

    fn is_preconditioned(&self) -> bool {
        true
    }

    fn prepare(&self, b_hat: &mut LatticeField, b: &LatticeField) -> Result<(), MgError> {
        let other = 1 - self.parity;
        let mut t = self.scratch(other);
        t.copy_from(b)?;
        self.apply_diag_inv(&mut t, false);
        let mut h = self.scratch(self.parity);
        self.base.apply_part(&mut h, &t, StencilPart::Hopping, false);
        let mut bp = self.scratch(self.parity);
        bp.copy_from(b)?;
        blas::axpy(-1.0, &h, &mut bp);
        b_hat.copy_from(&bp)
    }

    fn reconstruct(
        &self,
        x_hat: &LatticeField,
        b: &LatticeField,
        x: &mut LatticeField,
    ) -> Result<(), MgError> {
        let other = 1 - self.parity;
        let mut t = self.scratch(other);
        t.copy_from(b)?;
        let mut h = self.scratch(other);
        self.base.apply_part(&mut h, x_hat, StencilPart::Hopping, false);
        blas::axpy(-1.0, &h, &mut t);
        self.apply_diag_inv(&mut t, false);
        x.insert_parity(x_hat)?;
        x.insert_parity(&t)
    }

    fn full_param(&self) -> FieldParam {
        self.base.param().clone()
    }
}

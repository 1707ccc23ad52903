//! Nearest-neighbour stencil operators on a lattice.
//!
//! A `StencilOperator` stores, for each canonical offset, one `dof × dof` complex block
//! per site: `(A x)(s) = Σ_o B_o(s) x(s + o)`. The coefficient tables sit behind an `Arc`,
//! so precision variants of the same operator (residual, smoother, sloppy) share them and
//! differ only in the precision their output is rounded to.

use crate::core::field::{FieldParam, LatticeField, SiteSubset};
use crate::core::lattice::Lattice;
use crate::core::precision::Precision;
use crate::core::traits::{LinearOperator, check_domain};
use crate::error::MgError;
use crate::matrix::dense::{gemv_add, gemv_dagger_add};
use num_complex::Complex64;
use num_traits::Zero;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::sync::Arc;

/// Which part of the stencil to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilPart {
    Full,
    /// Zero-offset blocks only.
    Diagonal,
    /// Every block except the zero offset.
    Hopping,
}

#[derive(Debug)]
struct StencilCoeffs {
    /// Canonical offsets; index 0 is always the zero offset.
    offsets: Vec<Vec<isize>>,
    /// `blocks[o][site * dof * dof ..]` couples `site` to `site + offsets[o]`.
    blocks: Vec<Vec<Complex64>>,
    fwd: Vec<Vec<usize>>,
    bwd: Vec<Vec<usize>>,
}

#[derive(Debug, Clone)]
pub struct StencilOperator {
    param: FieldParam,
    coeffs: Arc<StencilCoeffs>,
    kappa: f64,
    mu: f64,
}

/// Accumulates stencil blocks; offsets are canonicalized on insertion, so couplings that
/// reach the same neighbour through wrap-around are summed.
#[derive(Debug, Clone)]
pub struct StencilBuilder {
    param: FieldParam,
    entries: BTreeMap<Vec<isize>, Vec<Complex64>>,
    kappa: f64,
    mu: f64,
}

impl StencilBuilder {
    pub fn new(param: FieldParam) -> Self {
        Self {
            param: param.with_subset(SiteSubset::Full),
            entries: BTreeMap::new(),
            kappa: 0.0,
            mu: 0.0,
        }
    }

    pub fn kappa(mut self, kappa: f64) -> Self {
        self.kappa = kappa;
        self
    }

    pub fn mu(mut self, mu: f64) -> Self {
        self.mu = mu;
        self
    }

    fn entry(&mut self, offset: &[isize]) -> Result<&mut Vec<Complex64>, MgError> {
        let lattice = &self.param.lattice;
        if offset.len() != lattice.ndim() {
            return Err(MgError::DimensionMismatch(format!(
                "offset {:?} has wrong dimension for lattice {:?}",
                offset,
                lattice.dims()
            )));
        }
        let key = lattice.canonical_offset(offset);
        let len = lattice.volume() * self.param.dof() * self.param.dof();
        Ok(self
            .entries
            .entry(key)
            .or_insert_with(|| vec![Complex64::zero(); len]))
    }

    /// Add a full `dof × dof` row-major block coupling `site` to `site + offset`.
    pub fn add_block(
        &mut self,
        site: usize,
        offset: &[isize],
        block: &[Complex64],
    ) -> Result<(), MgError> {
        let bs = self.param.dof() * self.param.dof();
        if block.len() != bs {
            return Err(MgError::DimensionMismatch(format!(
                "block has {} entries, expected {bs}",
                block.len()
            )));
        }
        let data = self.entry(offset)?;
        for (d, b) in data[site * bs..(site + 1) * bs].iter_mut().zip(block) {
            *d += b;
        }
        Ok(())
    }

    /// Add one column of the block coupling `site` to `site + offset`.
    pub fn add_column(
        &mut self,
        site: usize,
        offset: &[isize],
        col: usize,
        values: &[Complex64],
    ) -> Result<(), MgError> {
        let dof = self.param.dof();
        let data = self.entry(offset)?;
        let block = &mut data[site * dof * dof..(site + 1) * dof * dof];
        for (row, v) in values.iter().enumerate().take(dof) {
            block[row * dof + col] += v;
        }
        Ok(())
    }

    /// Add `value` to diagonal entry `k` of the local block of `site`.
    pub fn add_diagonal(&mut self, site: usize, k: usize, value: Complex64) -> Result<(), MgError> {
        let dof = self.param.dof();
        let zero = vec![0isize; self.param.lattice.ndim()];
        let data = self.entry(&zero)?;
        data[site * dof * dof + k * dof + k] += value;
        Ok(())
    }

    pub fn build(mut self) -> Result<StencilOperator, MgError> {
        let lattice = self.param.lattice.clone();
        let zero = vec![0isize; lattice.ndim()];
        let local = match self.entries.remove(&zero) {
            Some(blocks) => blocks,
            None => vec![Complex64::zero(); lattice.volume() * self.param.dof().pow(2)],
        };
        let mut offsets = vec![zero];
        let mut blocks = vec![local];
        for (offset, data) in self.entries {
            if data.iter().all(|z| z.norm_sqr() == 0.0) {
                continue;
            }
            offsets.push(offset);
            blocks.push(data);
        }
        let fwd = offsets
            .iter()
            .map(|o| (0..lattice.volume()).map(|s| lattice.shift(s, o)).collect())
            .collect();
        let bwd = offsets
            .iter()
            .map(|o| {
                let neg: Vec<isize> = o.iter().map(|d| -d).collect();
                (0..lattice.volume()).map(|s| lattice.shift(s, &neg)).collect()
            })
            .collect();
        Ok(StencilOperator {
            param: self.param,
            coeffs: Arc::new(StencilCoeffs {
                offsets,
                blocks,
                fwd,
                bwd,
            }),
            kappa: self.kappa,
            mu: self.mu,
        })
    }
}

impl StencilOperator {
    pub fn builder(param: FieldParam) -> StencilBuilder {
        StencilBuilder::new(param)
    }

    /// Same coefficients, output rounded to `precision`.
    pub fn with_precision(&self, precision: Precision) -> Self {
        let mut op = self.clone();
        op.param.precision = precision;
        op
    }

    pub fn lattice(&self) -> &Arc<Lattice> {
        &self.param.lattice
    }

    pub fn dof(&self) -> usize {
        self.param.dof()
    }

    pub fn offsets(&self) -> &[Vec<isize>] {
        &self.coeffs.offsets
    }

    /// Block coupling `site` to `site + offsets()[o]`.
    pub fn block(&self, o: usize, site: usize) -> &[Complex64] {
        let bs = self.dof() * self.dof();
        &self.coeffs.blocks[o][site * bs..(site + 1) * bs]
    }

    pub fn diagonal_block(&self, site: usize) -> &[Complex64] {
        self.block(0, site)
    }

    /// True when every coupling connects opposite parities, so the operator splits into
    /// even/odd blocks.
    pub fn is_bipartite(&self) -> bool {
        self.lattice().is_bipartite()
            && self.coeffs.offsets[1..]
                .iter()
                .all(|o| o.iter().map(|d| d.unsigned_abs()).sum::<usize>() % 2 == 1)
    }

    /// Overwrite `out` with the selected part of `A` (or `A†`) applied to `input`, on the
    /// sites `out` covers. Contributions from sites `input` does not cover are dropped.
    pub(crate) fn apply_part(
        &self,
        out: &mut LatticeField,
        input: &LatticeField,
        part: StencilPart,
        dagger: bool,
    ) {
        let dof = self.dof();
        let bs = dof * dof;
        let coeffs = &self.coeffs;
        let out_param = out.param().clone();
        let in_param = input.param();
        let range = match part {
            StencilPart::Full => 0..coeffs.offsets.len(),
            StencilPart::Diagonal => 0..1,
            StencilPart::Hopping => 1..coeffs.offsets.len(),
        };
        let kernel = |(local, o_site): (usize, &mut [Complex64])| {
            o_site.fill(Complex64::zero());
            let site = out_param.site_of(local);
            for o in range.clone() {
                if dagger {
                    let src = coeffs.bwd[o][site];
                    if let Some(l) = in_param.local_of(src) {
                        let block = &coeffs.blocks[o][src * bs..(src + 1) * bs];
                        gemv_dagger_add(o_site, block, input.site(l), dof, dof);
                    }
                } else {
                    let src = coeffs.fwd[o][site];
                    if let Some(l) = in_param.local_of(src) {
                        let block = &coeffs.blocks[o][site * bs..(site + 1) * bs];
                        gemv_add(o_site, block, input.site(l), dof, dof);
                    }
                }
            }
        };
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            out.data_mut().par_chunks_mut(dof).enumerate().for_each(kernel);
        }
        #[cfg(not(feature = "rayon"))]
        {
            out.data_mut().chunks_mut(dof).enumerate().for_each(kernel);
        }
        out.round_to(self.param.precision);
    }

    /// Discrete Laplacian plus mass on a single-component field:
    /// `(A x)(s) = (2D + m) x(s) - Σ_μ [x(s + μ) + x(s - μ)]`.
    pub fn laplacian(lattice: Arc<Lattice>, mass: f64) -> Result<Self, MgError> {
        let ndim = lattice.ndim();
        let param = FieldParam::new(lattice.clone(), 1, 1);
        let mut builder = StencilBuilder::new(param);
        let diag = [Complex64::new(2.0 * ndim as f64 + mass, 0.0)];
        let hop = [Complex64::new(-1.0, 0.0)];
        for site in 0..lattice.volume() {
            builder.add_block(site, &vec![0; ndim], &diag)?;
            for mu in 0..ndim {
                let mut offset = vec![0isize; ndim];
                offset[mu] = 1;
                builder.add_block(site, &offset, &hop)?;
                offset[mu] = -1;
                builder.add_block(site, &offset, &hop)?;
            }
        }
        builder.build()
    }

    /// Covariant Laplacian with random U(1) link phases per colour, in hopping-parameter
    /// normalisation with a twisted mass:
    /// `A = 1 + 2iκμ γ5 - κ Σ_μ [U_μ(s) δ_{s+μ} + U_μ(s-μ)† δ_{s-μ}]`, `κ = 1/(2D + m)`.
    ///
    /// `γ5` is `+1` on the first half of the spins and `-1` on the rest.
    pub fn gauge_laplacian(
        lattice: Arc<Lattice>,
        nspin: usize,
        ncolor: usize,
        mass: f64,
        mu: f64,
        seed: u64,
    ) -> Result<Self, MgError> {
        let ndim = lattice.ndim();
        let kappa = 1.0 / (2.0 * ndim as f64 + mass);
        let dof = nspin * ncolor;
        let param = FieldParam::new(lattice.clone(), nspin, ncolor);
        let mut rng = StdRng::seed_from_u64(seed);
        // links[(site * ndim + mu) * ncolor + c]
        let links: Vec<Complex64> = (0..lattice.volume() * ndim * ncolor)
            .map(|_| Complex64::from_polar(1.0, rng.gen_range(0.0..2.0 * PI)))
            .collect();
        let mut builder = StencilBuilder::new(param).kappa(kappa).mu(mu);
        let zero = Complex64::zero();
        for site in 0..lattice.volume() {
            let mut diag = vec![zero; dof * dof];
            for s in 0..nspin {
                let g5 = if nspin == 1 || s < nspin / 2 { 1.0 } else { -1.0 };
                for c in 0..ncolor {
                    let k = s * ncolor + c;
                    diag[k * dof + k] = Complex64::new(1.0, 2.0 * kappa * mu * g5);
                }
            }
            builder.add_block(site, &vec![0; ndim], &diag)?;
            for mu_dir in 0..ndim {
                let back = lattice.neighbor(site, mu_dir, false);
                let mut fwd_block = vec![zero; dof * dof];
                let mut bwd_block = vec![zero; dof * dof];
                for s in 0..nspin {
                    for c in 0..ncolor {
                        let k = s * ncolor + c;
                        fwd_block[k * dof + k] = -links[(site * ndim + mu_dir) * ncolor + c] * kappa;
                        bwd_block[k * dof + k] =
                            -links[(back * ndim + mu_dir) * ncolor + c].conj() * kappa;
                    }
                }
                let mut offset = vec![0isize; ndim];
                offset[mu_dir] = 1;
                builder.add_block(site, &offset, &fwd_block)?;
                offset[mu_dir] = -1;
                builder.add_block(site, &offset, &bwd_block)?;
            }
        }
        builder.build()
    }
}

impl LinearOperator for StencilOperator {
    fn param(&self) -> &FieldParam {
        &self.param
    }

    fn apply(&self, out: &mut LatticeField, input: &LatticeField) -> Result<(), MgError> {
        check_domain(&self.param, out, input)?;
        self.apply_part(out, input, StencilPart::Full, false);
        Ok(())
    }

    fn apply_dagger(&self, out: &mut LatticeField, input: &LatticeField) -> Result<(), MgError> {
        check_domain(&self.param, out, input)?;
        self.apply_part(out, input, StencilPart::Full, true);
        Ok(())
    }

    fn kappa(&self) -> f64 {
        self.kappa
    }

    fn mu(&self) -> f64 {
        self.mu
    }
}

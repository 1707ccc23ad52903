//! Block-aggregation transfer operator.
//!
//! The fine lattice is cut into disjoint geometric blocks, one per coarse site. Within a
//! block the spins are split into `n_chiral` groups of `spin_block` consecutive spins, and
//! for every (block, group) pair the restrictions of the near-kernel vectors are
//! orthonormalised. The resulting basis `V` defines
//!
//! * `restrict`: `r_c[b, (χ, v)] = Σ_{x ∈ b, s ∈ χ, c} conj(V[x, s, c, v]) r[x, s, c]`
//! * `prolong`:  `e[x, s, c] = Σ_v V[x, s, c, v] e_c[b(x), (χ(s), v)]`
//!
//! so `R = P†` and, by orthonormality, `R P = I`.
//!
//! When the transfer lives on one parity only, blocks contain just the sites of that
//! parity and orthonormality holds on the parity sub-block.

use crate::core::field::{FieldParam, LatticeField, SiteSubset};
use crate::core::precision::Precision;
use crate::error::MgError;
use num_complex::Complex64;
use num_traits::Zero;

/// Squared norm below which a projected block vector counts as linearly dependent,
/// relative to its norm before projection.
const DEGENERATE_FLOOR: f64 = 1e-16;

#[derive(Debug, Clone)]
pub struct Transfer {
    level: usize,
    /// Fine work-space layout (full lattice or one parity).
    fine: FieldParam,
    coarse: FieldParam,
    geo_block: Vec<usize>,
    spin_block: usize,
    n_vec: usize,
    precision: Precision,
    /// Coarse site of each fine local site.
    block_of: Vec<usize>,
    /// Fine local sites of each coarse site.
    block_sites: Vec<Vec<usize>>,
    /// `basis[((local * nspin + s) * ncolor + c) * n_vec + v]`
    basis: Vec<Complex64>,
}

impl Transfer {
    /// Build the transfer from the first `n_vec` vectors of `b`.
    pub fn new(
        level: usize,
        b: &[LatticeField],
        n_vec: usize,
        geo_block: &[usize],
        spin_block: usize,
        precision: Precision,
        subset: SiteSubset,
    ) -> Result<Self, MgError> {
        let Some(first) = b.first() else {
            return Err(MgError::config(format!(
                "level {level}: transfer needs near-kernel vectors"
            )));
        };
        if b.len() < n_vec {
            return Err(MgError::config(format!(
                "level {level}: transfer needs {n_vec} vectors, {} given",
                b.len()
            )));
        }
        let full = first
            .param()
            .clone()
            .with_subset(SiteSubset::Full)
            .with_precision(Precision::Double);
        let coarse = full.create_coarse(geo_block, spin_block, n_vec, Precision::Double)?;
        let fine = full.with_subset(subset);

        let lattice = &fine.lattice;
        let coarse_lat = &coarse.lattice;
        let mut block_of = Vec::with_capacity(fine.sites());
        let mut block_sites = vec![Vec::new(); coarse_lat.volume()];
        let mut coords = vec![0usize; lattice.ndim()];
        for local in 0..fine.sites() {
            let site = fine.site_of(local);
            for (mu, c) in coords.iter_mut().enumerate() {
                *c = lattice.coord(site, mu) / geo_block[mu];
            }
            let block = coarse_lat.index(&coords);
            block_of.push(block);
            block_sites[block].push(local);
        }

        let mut transfer = Self {
            level,
            fine,
            coarse,
            geo_block: geo_block.to_vec(),
            spin_block,
            n_vec,
            precision,
            block_of,
            block_sites,
            basis: Vec::new(),
        };
        transfer.reset(b)?;
        Ok(transfer)
    }

    /// Rebuild the basis from new near-kernel vectors, keeping the geometry.
    pub fn reset(&mut self, b: &[LatticeField]) -> Result<(), MgError> {
        if b.len() < self.n_vec {
            return Err(MgError::config(format!(
                "level {}: transfer needs {} vectors, {} given",
                self.level,
                self.n_vec,
                b.len()
            )));
        }
        let (nspin, ncolor, n_vec) = (self.fine.nspin, self.fine.ncolor, self.n_vec);
        let dof = nspin * ncolor;
        let mut basis = vec![Complex64::zero(); self.fine.sites() * dof * n_vec];
        for (v, field) in b.iter().take(n_vec).enumerate() {
            if field.param().lattice != self.fine.lattice || field.param().dof() != dof {
                return Err(MgError::DimensionMismatch(format!(
                    "near-kernel vector {v} does not live on the fine lattice of level {}",
                    self.level
                )));
            }
            for local in 0..self.fine.sites() {
                let src = field
                    .param()
                    .local_of(self.fine.site_of(local))
                    .ok_or_else(|| {
                        MgError::DimensionMismatch(format!(
                            "near-kernel vector {v} does not cover the transfer sites"
                        ))
                    })?;
                for (k, z) in field.site(src).iter().enumerate() {
                    basis[(local * dof + k) * n_vec + v] = *z;
                }
            }
        }
        self.basis = basis;
        self.orthonormalize()?;
        let p = self.precision;
        if p < Precision::Double {
            self.basis.iter_mut().for_each(|z| *z = p.round_complex(*z));
        }
        Ok(())
    }

    /// Modified Gram-Schmidt within every (block, chirality) pair.
    fn orthonormalize(&mut self) -> Result<(), MgError> {
        let (nspin, ncolor, n_vec) = (self.fine.nspin, self.fine.ncolor, self.n_vec);
        let dof = nspin * ncolor;
        let spin_block = self.spin_block;
        let level = self.level;
        let n_chiral = self.n_chiral();
        for sites in &self.block_sites {
            for chi in 0..n_chiral {
                // Flat indices (without the vector index) of this block/chirality slice.
                let idx: Vec<usize> = sites
                    .iter()
                    .flat_map(|&local| {
                        (chi * spin_block..(chi + 1) * spin_block).flat_map(move |s| {
                            (0..ncolor).map(move |c| (local * dof + s * ncolor + c) * n_vec)
                        })
                    })
                    .collect();
                let basis = &mut self.basis;
                for v in 0..n_vec {
                    let orig: f64 = idx.iter().map(|&i| basis[i + v].norm_sqr()).sum();
                    for w in 0..v {
                        let dot: Complex64 = idx
                            .iter()
                            .map(|&i| basis[i + w].conj() * basis[i + v])
                            .sum();
                        for &i in &idx {
                            let bw = basis[i + w];
                            basis[i + v] -= dot * bw;
                        }
                    }
                    let nrm2: f64 = idx.iter().map(|&i| basis[i + v].norm_sqr()).sum();
                    if orig == 0.0 || nrm2 <= DEGENERATE_FLOOR * orig {
                        return Err(MgError::Degenerate {
                            level,
                            index: v,
                            norm: nrm2.sqrt(),
                        });
                    }
                    let inv = 1.0 / nrm2.sqrt();
                    for &i in &idx {
                        basis[i + v] *= inv;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn fine_param(&self) -> &FieldParam {
        &self.fine
    }

    pub fn coarse_param(&self) -> &FieldParam {
        &self.coarse
    }

    pub fn n_vec(&self) -> usize {
        self.n_vec
    }

    pub fn n_chiral(&self) -> usize {
        self.fine.nspin / self.spin_block
    }

    pub fn geo_block(&self) -> &[usize] {
        &self.geo_block
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// `coarse = R fine`. `fine` may be the work-space layout or, for a single-parity
    /// transfer, a full-lattice field whose other parity is ignored.
    pub fn restrict(&self, coarse: &mut LatticeField, fine: &LatticeField) -> Result<(), MgError> {
        if !self.coarse.same_layout(coarse.param()) {
            return Err(MgError::DimensionMismatch(format!(
                "restriction target {} is not the coarse space {}",
                coarse.param().describe(),
                self.coarse.describe()
            )));
        }
        let in_param = fine.param();
        if in_param.lattice != self.fine.lattice || in_param.dof() != self.fine.dof() {
            return Err(MgError::DimensionMismatch(format!(
                "restriction source {} is not on the fine space {}",
                in_param.describe(),
                self.fine.describe()
            )));
        }
        let (nspin, ncolor, n_vec) = (self.fine.nspin, self.fine.ncolor, self.n_vec);
        let dof = nspin * ncolor;
        let spin_block = self.spin_block;
        let mut src_local = Vec::with_capacity(self.fine.sites());
        for local in 0..self.fine.sites() {
            let site = self.fine.site_of(local);
            src_local.push(in_param.local_of(site).ok_or_else(|| {
                MgError::DimensionMismatch(format!(
                    "restriction source {} does not cover the transfer sites",
                    in_param.describe()
                ))
            })?);
        }
        let basis = &self.basis;
        let block_sites = &self.block_sites;
        let kernel = |(block, out): (usize, &mut [Complex64])| {
            out.fill(Complex64::zero());
            for &local in &block_sites[block] {
                let values = fine.site(src_local[local]);
                for s in 0..nspin {
                    let chi = s / spin_block;
                    for c in 0..ncolor {
                        let k = s * ncolor + c;
                        let z = values[k];
                        let row = &basis[(local * dof + k) * n_vec..(local * dof + k + 1) * n_vec];
                        for (v, b) in row.iter().enumerate() {
                            out[chi * n_vec + v] += b.conj() * z;
                        }
                    }
                }
            }
        };
        let coarse_dof = self.coarse.dof();
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            coarse
                .data_mut()
                .par_chunks_mut(coarse_dof)
                .enumerate()
                .for_each(kernel);
        }
        #[cfg(not(feature = "rayon"))]
        {
            coarse.data_mut().chunks_mut(coarse_dof).enumerate().for_each(kernel);
        }
        coarse.round_to(self.precision);
        Ok(())
    }

    /// `fine = P coarse`. Sites of `fine` outside the transfer's subset are zeroed.
    pub fn prolong(&self, fine: &mut LatticeField, coarse: &LatticeField) -> Result<(), MgError> {
        if !self.coarse.same_layout(coarse.param()) {
            return Err(MgError::DimensionMismatch(format!(
                "prolongation source {} is not the coarse space {}",
                coarse.param().describe(),
                self.coarse.describe()
            )));
        }
        let out_param = fine.param().clone();
        if out_param.lattice != self.fine.lattice || out_param.dof() != self.fine.dof() {
            return Err(MgError::DimensionMismatch(format!(
                "prolongation target {} is not on the fine space {}",
                out_param.describe(),
                self.fine.describe()
            )));
        }
        let (nspin, ncolor, n_vec) = (self.fine.nspin, self.fine.ncolor, self.n_vec);
        let dof = nspin * ncolor;
        let spin_block = self.spin_block;
        let basis = &self.basis;
        let block_of = &self.block_of;
        let fine_param = &self.fine;
        let kernel = |(out_local, out): (usize, &mut [Complex64])| {
            out.fill(Complex64::zero());
            let Some(local) = fine_param.local_of(out_param.site_of(out_local)) else {
                return;
            };
            let values = coarse.site(block_of[local]);
            for s in 0..nspin {
                let chi = s / spin_block;
                for c in 0..ncolor {
                    let k = s * ncolor + c;
                    let row = &basis[(local * dof + k) * n_vec..(local * dof + k + 1) * n_vec];
                    out[k] = row
                        .iter()
                        .zip(&values[chi * n_vec..(chi + 1) * n_vec])
                        .map(|(b, e)| b * e)
                        .sum();
                }
            }
        };
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            fine.data_mut().par_chunks_mut(dof).enumerate().for_each(kernel);
        }
        #[cfg(not(feature = "rayon"))]
        {
            fine.data_mut().chunks_mut(dof).enumerate().for_each(kernel);
        }
        fine.round_to(self.precision);
        Ok(())
    }

    /// Restrict each of `b` into the matching entry of `out`.
    pub fn restrict_vectors(
        &self,
        out: &mut [LatticeField],
        b: &[LatticeField],
    ) -> Result<(), MgError> {
        for (o, v) in out.iter_mut().zip(b) {
            self.restrict(o, v)?;
        }
        Ok(())
    }
}

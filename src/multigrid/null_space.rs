//! Near-kernel vectors.
//!
//! The transfer operator is only as good as the vectors it is built from: they should
//! span the slowly-converging (low-mode) part of the operator. They are either refined
//! iteratively from random starts, loaded, or taken from the free-field basis.

use crate::config::{MgFlags, SetupType};
use crate::context::ksp_context::{SolverKind, SolverParam};
use crate::core::blas;
use crate::core::field::{FieldParam, LatticeField, SiteSubset, SourceKind};
use crate::error::MgError;
use crate::multigrid::io::{FileStore, VectorStore};
use crate::multigrid::level::Level;
use crate::multigrid::smoother::Smoother;
use crate::preconditioner::FlexiblePreconditioner;
use num_complex::Complex64;
use num_traits::One;
use rand::Rng;
use std::sync::Arc;

/// Squared norm below which a vector is considered lost during orthonormalization.
const NORM_FLOOR: f64 = 1e-16;

/// Modified Gram-Schmidt over whole vectors.
pub fn orthonormalize(vectors: &mut [LatticeField], level: usize) -> Result<(), MgError> {
    for i in 0..vectors.len() {
        let (done, rest) = vectors.split_at_mut(i);
        let v = &mut rest[0];
        for u in done.iter() {
            let dot = blas::cdot(u, v);
            blas::caxpy(-dot, u, v);
        }
        let nrm2 = blas::norm2(v);
        if nrm2 <= NORM_FLOOR {
            return Err(MgError::Degenerate {
                level,
                index: i,
                norm: nrm2.sqrt(),
            });
        }
        blas::ax(1.0 / nrm2.sqrt(), v);
    }
    Ok(())
}

/// The deterministic free-field basis of a level.
///
/// * fine level, 4 spins: `2·ncolor` vectors, constant on spins `s` and `s + 2`
/// * fine level, 1 spin: `ncolor·2^(D-1)` vectors, pairs of corner sources `2k`, `2k+1`
/// * coarse levels with 1 or 2 spins: `ncolor` vectors, constant on one colour
pub fn free_field_vectors(
    param: &FieldParam,
    level: usize,
    n_vec: usize,
) -> Result<Vec<LatticeField>, MgError> {
    let (nspin, ncolor) = (param.nspin, param.ncolor);
    let ndim = param.lattice.ndim();
    // Each vector is the sum of the listed sources.
    let recipes: Vec<Vec<SourceKind>> = match (level, nspin) {
        (0, 4) => (0..ncolor)
            .flat_map(|color| {
                (0..2).map(move |spin| {
                    vec![
                        SourceKind::Constant { spin, color },
                        SourceKind::Constant { spin: spin + 2, color },
                    ]
                })
            })
            .collect(),
        (0, 1) => (0..ncolor)
            .flat_map(|color| {
                (0..1usize << (ndim - 1)).map(move |k| {
                    vec![
                        SourceKind::Corner { corner: 2 * k, color },
                        SourceKind::Corner { corner: 2 * k + 1, color },
                    ]
                })
            })
            .collect(),
        (l, 1 | 2) if l > 0 => (0..ncolor)
            .map(|color| {
                (0..nspin)
                    .map(|spin| SourceKind::Constant { spin, color })
                    .collect()
            })
            .collect(),
        _ => {
            return Err(MgError::config(format!(
                "level {level}: no free-field basis for {nspin} spins"
            )));
        }
    };
    if recipes.len() != n_vec {
        return Err(MgError::config(format!(
            "level {level}: free-field basis for {nspin} spins and {ncolor} colours has {} vectors, {n_vec} requested",
            recipes.len()
        )));
    }
    let full = param.clone().with_subset(SiteSubset::Full);
    let mut tmp = LatticeField::new(full.clone());
    recipes
        .into_iter()
        .map(|sources| {
            let mut v = LatticeField::new(full.clone());
            for kind in sources {
                tmp.source(kind)?;
                blas::xpy(&tmp, &mut v);
            }
            Ok(v)
        })
        .collect()
}

/// Starting vectors when nothing better is available: a constant vector, then random.
fn seed_vectors<R: Rng + ?Sized>(vectors: &mut [LatticeField], rng: &mut R) {
    for (i, v) in vectors.iter_mut().enumerate() {
        if i == 0 {
            v.data_mut().fill(Complex64::one());
            v.round_to_precision();
        } else {
            v.randomize(rng);
        }
    }
}

impl Level {
    /// Refine the near-kernel vectors with `setup_inv_type`.
    ///
    /// With the multigrid inverter the level preconditions its own setup solves; after
    /// each pass the transfer is rebuilt and the new vectors are pushed to the next level.
    pub(crate) fn generate_null_vectors(&mut self, refresh: bool) -> Result<(), MgError> {
        let opts = Arc::clone(&self.opts);
        let lo = &opts.levels[self.level];
        let Some(first) = self.b.first() else {
            return Err(MgError::config(format!(
                "{}no near-kernel vectors to refine",
                self.ctx.prefix()
            )));
        };
        let template = first.param().clone();
        let maxiter = if refresh {
            lo.setup_maxiter_refresh
        } else {
            lo.setup_maxiter
        };
        let use_mg = lo.setup_inv_type == SolverKind::Multigrid;
        self.ctx.summarize(format_args!(
            "generating {} near-kernel vectors with {:?} ({} passes, maxiter {})",
            self.b.len(),
            lo.setup_inv_type,
            lo.num_setup_iter,
            maxiter
        ));

        let param = SolverParam::new(lo.setup_inv_type, lo.setup_tol, maxiter)
            .with_n_krylov(4)
            .with_init_guess(true);
        let op = if use_mg {
            Arc::clone(&self.ops.work)
        } else {
            Arc::clone(&self.ops.smoother)
        };
        let mut solver = Smoother::new(&param, op)?;
        if use_mg && self.transfer.is_none() {
            self.create_smoothers()?;
        }

        let mut rhs = LatticeField::new(template.clone());
        let mut x = LatticeField::new(template);
        for pass in 0..lo.num_setup_iter {
            if opts.flags.contains(MgFlags::PRE_ORTHONORMALIZE) {
                orthonormalize(&mut self.b, self.level)?;
            }
            for i in 0..self.b.len() {
                match opts.setup_type {
                    SetupType::TestVector => {
                        rhs.copy_from(&self.b[i])?;
                        x.zero();
                    }
                    SetupType::NullVector => {
                        rhs.zero();
                        x.copy_from(&self.b[i])?;
                    }
                }
                let stats = if use_mg {
                    solver.solve(Some(self as &mut dyn FlexiblePreconditioner), &rhs, &mut x)?
                } else {
                    solver.solve(None, &rhs, &mut x)?
                };
                self.ctx.verbose(format_args!(
                    "pass {}, vector {i}: {} iterations, |r| = {:e}",
                    pass + 1,
                    stats.iterations,
                    stats.final_residual
                ));
                self.b[i].copy_from(&x)?;
            }
            if opts.flags.contains(MgFlags::POST_ORTHONORMALIZE) {
                orthonormalize(&mut self.b, self.level)?;
            }

            if use_mg {
                self.refresh_from_vectors(refresh)?;
            }
        }
        self.save_vectors()
    }

    /// After a multigrid-inverter setup pass: rebuild this level from the new vectors and
    /// propagate them to the next level.
    fn refresh_from_vectors(&mut self, refresh: bool) -> Result<(), MgError> {
        if self.transfer.is_none() {
            return self.reset(false);
        }
        self.reset_transfer = true;
        self.reset(false)?;
        if self.level + 2 >= self.n_level {
            return Ok(());
        }
        let Some(coarse) = self.coarse.as_deref_mut() else {
            return Ok(());
        };
        if self.opts.flags.contains(MgFlags::GENERATE_ALL_LEVELS) {
            return coarse.generate_null_vectors(refresh);
        }
        let Some(transfer) = self.transfer.as_ref() else {
            return Ok(());
        };
        let n = self.opts.levels[self.level].n_vec;
        self.ctx.verbose(format_args!("restricting near-kernel vectors"));
        transfer.restrict_vectors(&mut coarse.b[..n], &self.b[..n])?;
        coarse.reset_transfer = true;
        coarse.reset(false)
    }

    /// Read the near-kernel vectors of this level from `vec_infile`, or fall back to
    /// seed vectors when no file is configured.
    pub(crate) fn load_vectors(&mut self) -> Result<(), MgError> {
        let n = self.b.len();
        let Some(first) = self.b.first() else {
            return Ok(());
        };
        match self.opts.vec_infile.as_ref() {
            Some(prefix) => {
                let store = FileStore::new(prefix.clone());
                self.ctx.verbose(format_args!(
                    "loading {n} vectors from {}",
                    store.path(self.level).display()
                ));
                let loaded = store.load(self.level, first.param(), n)?;
                for (v, l) in self.b.iter_mut().zip(&loaded) {
                    v.copy_from(l)?;
                }
            }
            None => {
                self.ctx.verbose(format_args!(
                    "no vector file configured, seeding {n} vectors"
                ));
                seed_vectors(&mut self.b, &mut self.rng);
            }
        }
        Ok(())
    }

    /// Persist the vectors when `VEC_STORE` is set and an output file is configured.
    pub(crate) fn save_vectors(&self) -> Result<(), MgError> {
        if !self.opts.flags.contains(MgFlags::VEC_STORE) {
            return Ok(());
        }
        match self.opts.vec_outfile.as_ref() {
            Some(prefix) => FileStore::new(prefix.clone()).save(self.level, &self.b),
            None => Ok(()),
        }
    }

    pub(crate) fn build_free_vectors(&mut self) -> Result<(), MgError> {
        let Some(first) = self.b.first() else {
            return Ok(());
        };
        let vectors = free_field_vectors(first.param(), self.level, self.b.len())?;
        self.ctx.verbose(format_args!("building {} free-field vectors", vectors.len()));
        for (v, f) in self.b.iter_mut().zip(&vectors) {
            v.copy_from(f)?;
        }
        if self.opts.flags.contains(MgFlags::POST_ORTHONORMALIZE) {
            orthonormalize(&mut self.b, self.level)?;
        }
        Ok(())
    }

    /// Write the vectors of this and every coarser non-terminal level to `vec_outfile`.
    pub(crate) fn dump_null_vectors(&self) -> Result<(), MgError> {
        let Some(prefix) = self.opts.vec_outfile.as_ref() else {
            return Err(MgError::config("no output file configured for near-kernel vectors"));
        };
        if self.is_terminal() {
            return Ok(());
        }
        FileStore::new(prefix.clone()).save(self.level, &self.b)?;
        match self.coarse.as_deref() {
            Some(coarse) if self.level + 2 < self.n_level => coarse.dump_null_vectors(),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lattice::Lattice;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn orthonormalized_vectors_are_orthonormal() {
        let param = FieldParam::new(Lattice::new(&[4, 4]).unwrap(), 2, 1);
        let mut rng = StdRng::seed_from_u64(3);
        let mut vectors: Vec<LatticeField> = (0..4)
            .map(|_| {
                let mut v = LatticeField::new(param.clone());
                v.randomize(&mut rng);
                v
            })
            .collect();
        orthonormalize(&mut vectors, 0).unwrap();
        for i in 0..4 {
            for j in 0..4 {
                let dot = blas::cdot(&vectors[i], &vectors[j]);
                let expect = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(dot.re, expect, epsilon = 1e-12);
                assert_relative_eq!(dot.im, 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn linearly_dependent_vector_is_reported() {
        let param = FieldParam::new(Lattice::new(&[4]).unwrap(), 1, 1);
        let mut a = LatticeField::new(param.clone());
        a.source(SourceKind::Random(1)).unwrap();
        let mut b = a.clone();
        blas::ax(3.0, &mut b);
        let mut vectors = vec![a, b];
        let err = orthonormalize(&mut vectors, 1).unwrap_err();
        assert!(matches!(err, MgError::Degenerate { level: 1, index: 1, .. }));
    }

    #[test]
    fn free_field_wilson_basis() {
        let param = FieldParam::new(Lattice::new(&[2, 2, 2, 2]).unwrap(), 4, 3);
        let vectors = free_field_vectors(&param, 0, 6).unwrap();
        // vector (color 1, spin 0) is non-zero on spins 0 and 2 of colour 1 only
        let v = &vectors[2];
        for site in 0..16 {
            let values = v.site(site);
            for (k, z) in values.iter().enumerate() {
                let expect = if k == 1 || k == 2 * 3 + 1 { 1.0 } else { 0.0 };
                assert_eq!(z.re, expect);
            }
        }
        assert!(free_field_vectors(&param, 0, 5).is_err());
    }

    #[test]
    fn free_field_staggered_basis_pairs_corners() {
        let param = FieldParam::new(Lattice::new(&[4, 4]).unwrap(), 1, 1);
        let vectors = free_field_vectors(&param, 0, 2).unwrap();
        // corners 0 and 1 differ only in the parity of x0
        let v0 = &vectors[0];
        let lat = &param.lattice;
        for site in 0..lat.volume() {
            let expect = if lat.coord(site, 1) % 2 == 0 { 1.0 } else { 0.0 };
            assert_eq!(v0.site(site)[0].re, expect);
        }
    }

    #[test]
    fn free_field_coarse_basis() {
        let param = FieldParam::new(Lattice::new(&[2, 2]).unwrap(), 2, 3);
        let vectors = free_field_vectors(&param, 1, 3).unwrap();
        assert_eq!(vectors.len(), 3);
        assert!(free_field_vectors(&param, 0, 3).is_err());
    }
}

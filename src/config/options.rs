//! Multigrid options.
//!
//! `MgOptions` carries the hierarchy-wide settings and one `LevelOptions` entry per
//! level. Options are plain data; `MgOptions::validate` checks a configuration against
//! the fine operator before any level is built, so an invalid hierarchy fails as a whole
//! instead of partially.

use crate::context::ksp_context::SolverKind;
use crate::core::field::FieldParam;
use crate::core::precision::Precision;
use crate::error::MgError;
use bitflags::bitflags;
use std::fmt;
use std::path::PathBuf;

/// Maximum depth of the hierarchy.
pub const MAX_LEVELS: usize = 5;

/// Whether a smoother acts on the full operator or on its even/odd Schur complement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolveType {
    #[default]
    Direct,
    DirectPc,
}

/// Whether a level's work space is the full lattice or one parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolutionType {
    #[default]
    Mat,
    MatPc,
}

/// Parity kept by the Schur complement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatPcType {
    #[default]
    EvenEven,
    OddOdd,
}

impl MatPcType {
    pub fn parity(self) -> usize {
        match self {
            MatPcType::EvenEven => 0,
            MatPcType::OddOdd => 1,
        }
    }
}

/// How the coarse correction is nested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleType {
    /// Coarse levels are visited once per cycle, except the one above the coarsest
    /// which wraps a Krylov solve.
    #[default]
    VCycle,
    /// Every coarse correction is a Krylov solve preconditioned by the next level.
    Recursive,
}

/// Right-hand side used by the adaptive setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetupType {
    /// Solve `A x = 0` starting from the current candidate.
    #[default]
    NullVector,
    /// Solve `A x = v` for the current candidate `v` from a zero guess.
    TestVector,
}

/// Source of the near-kernel vectors on levels that need them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullSpaceSource {
    #[default]
    Compute,
    Load,
    FreeField,
}

/// Where a level's data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Location {
    #[default]
    Host,
    Device,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Host => f.write_str("CPU"),
            Location::Device => f.write_str("GPU"),
        }
    }
}

/// Logging verbosity of a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    #[default]
    Silent,
    Summarize,
    Verbose,
    Debug,
}

bitflags! {
    /// Hierarchy-wide switches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MgFlags: u32 {
        /// Check transfer and Galerkin identities after every reset.
        const VERIFY = 0b00001;
        /// Orthonormalise candidates before each setup pass.
        const PRE_ORTHONORMALIZE = 0b00010;
        /// Orthonormalise candidates after each setup pass.
        const POST_ORTHONORMALIZE = 0b00100;
        /// Generate candidates independently on every level instead of restricting.
        const GENERATE_ALL_LEVELS = 0b01000;
        /// Persist computed candidates.
        const VEC_STORE = 0b10000;
    }
}

impl Default for MgFlags {
    fn default() -> Self {
        MgFlags::POST_ORTHONORMALIZE
    }
}

/// Precisions of the three operator roles built for a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RolePrecision {
    pub residual: Precision,
    pub smoother: Precision,
    pub sloppy: Precision,
}

/// Per-level settings.
#[derive(Debug, Clone)]
pub struct LevelOptions {
    /// Near-kernel vectors used to build the transfer to the next level.
    pub n_vec: usize,
    /// Fine sites aggregated into one coarse site, per dimension.
    pub geo_block_size: Vec<usize>,
    /// Spins aggregated into one coarse chirality.
    pub spin_block_size: usize,
    pub smoother: Option<SolverKind>,
    pub smoother_solve_type: SolveType,
    pub smoother_tol: f64,
    pub nu_pre: usize,
    pub nu_post: usize,
    /// Work-space type of this level.
    pub coarse_grid_solution_type: SolutionType,
    /// Solver used when this level is solved by a Krylov wrapper from the level above.
    pub coarse_solver: SolverKind,
    pub coarse_solver_tol: f64,
    pub coarse_solver_maxiter: usize,
    pub setup_inv_type: SolverKind,
    pub setup_tol: f64,
    pub setup_maxiter: usize,
    pub setup_maxiter_refresh: usize,
    pub num_setup_iter: usize,
    pub precision_null: Precision,
    pub mu_factor: f64,
    pub verbosity: Verbosity,
    pub location: Location,
}

impl Default for LevelOptions {
    fn default() -> Self {
        Self {
            n_vec: 4,
            geo_block_size: Vec::new(),
            spin_block_size: 1,
            smoother: Some(SolverKind::Mr),
            smoother_solve_type: SolveType::Direct,
            smoother_tol: 0.0,
            nu_pre: 2,
            nu_post: 2,
            coarse_grid_solution_type: SolutionType::Mat,
            coarse_solver: SolverKind::Gcr,
            coarse_solver_tol: 0.25,
            coarse_solver_maxiter: 100,
            setup_inv_type: SolverKind::BiCgStab,
            setup_tol: 1e-6,
            setup_maxiter: 100,
            setup_maxiter_refresh: 0,
            num_setup_iter: 1,
            precision_null: Precision::Double,
            mu_factor: 1.0,
            verbosity: Verbosity::Silent,
            location: Location::Host,
        }
    }
}

/// Hierarchy-wide settings.
#[derive(Debug, Clone)]
pub struct MgOptions {
    pub n_level: usize,
    pub levels: Vec<LevelOptions>,
    pub cycle_type: CycleType,
    pub setup_type: SetupType,
    pub null_space: NullSpaceSource,
    pub matpc: MatPcType,
    pub precision: RolePrecision,
    pub flags: MgFlags,
    /// Prefix of the per-level files vectors are loaded from.
    pub vec_infile: Option<PathBuf>,
    /// Prefix of the per-level files vectors are saved to.
    pub vec_outfile: Option<PathBuf>,
    /// Seed of the random candidate initialisation.
    pub seed: u64,
}

impl MgOptions {
    pub fn new(n_level: usize) -> Self {
        Self {
            n_level,
            levels: vec![LevelOptions::default(); n_level],
            cycle_type: CycleType::default(),
            setup_type: SetupType::default(),
            null_space: NullSpaceSource::default(),
            matpc: MatPcType::default(),
            precision: RolePrecision::default(),
            flags: MgFlags::default(),
            vec_infile: None,
            vec_outfile: None,
            seed: 1234,
        }
    }

    /// Check the options against the fine-level field layout.
    pub fn validate(&self, fine: &FieldParam) -> Result<(), MgError> {
        if self.n_level == 0 || self.n_level > MAX_LEVELS {
            return Err(MgError::config(format!(
                "n_level {} outside supported multigrid depth 1..={MAX_LEVELS}",
                self.n_level
            )));
        }
        if self.levels.len() < self.n_level {
            return Err(MgError::config(format!(
                "{} levels requested but only {} level options given",
                self.n_level,
                self.levels.len()
            )));
        }
        let mut param = fine.clone();
        for l in 0..self.n_level {
            let opts = &self.levels[l];
            if opts.location != Location::Host {
                return Err(MgError::config(format!(
                    "level {l}: location {} is not available",
                    opts.location
                )));
            }
            if opts.coarse_grid_solution_type == SolutionType::MatPc {
                if opts.smoother_solve_type != SolveType::DirectPc {
                    return Err(MgError::config(format!(
                        "level {l}: preconditioned coarse-grid solution requires a preconditioned smoother"
                    )));
                }
                if opts.smoother.is_none() && l == self.n_level - 1 {
                    return Err(MgError::config(format!(
                        "level {l}: preconditioned terminal level needs a smoother"
                    )));
                }
            }
            if opts.smoother_solve_type == SolveType::DirectPc && !param.lattice.is_bipartite() {
                return Err(MgError::config(format!(
                    "level {l}: even/odd preconditioning needs even extents, lattice is {:?}",
                    param.lattice.dims()
                )));
            }
            if let Some(SolverKind::Multigrid | SolverKind::Direct) = opts.smoother {
                return Err(MgError::config(format!(
                    "level {l}: smoother must be an iterative Krylov solver"
                )));
            }
            if l + 1 == self.n_level {
                break;
            }
            if opts.n_vec == 0 {
                return Err(MgError::config(format!("level {l}: n_vec must be positive")));
            }
            if opts.setup_inv_type == SolverKind::Direct
                && self.null_space == NullSpaceSource::Compute
            {
                return Err(MgError::config(format!(
                    "level {l}: a direct solve cannot generate near-kernel vectors"
                )));
            }
            let next = &self.levels[l + 1];
            let wraps = self.cycle_type == CycleType::Recursive || l + 2 == self.n_level;
            if wraps && next.coarse_solver == SolverKind::Multigrid {
                return Err(MgError::config(format!(
                    "level {}: coarse solver cannot itself be a multigrid",
                    l + 1
                )));
            }
            let geo = &opts.geo_block_size;
            let subset_blocks = opts.coarse_grid_solution_type == SolutionType::MatPc;
            if subset_blocks && geo.iter().any(|&b| b < 2) {
                return Err(MgError::config(format!(
                    "level {l}: single-parity aggregation needs geometric blocks of at least 2 in every dimension, got {geo:?}"
                )));
            }
            param = param.create_coarse(geo, opts.spin_block_size, opts.n_vec, Precision::Double)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lattice::Lattice;

    fn fine() -> FieldParam {
        FieldParam::new(Lattice::new(&[8, 8]).unwrap(), 2, 1)
    }

    fn two_level() -> MgOptions {
        let mut opts = MgOptions::new(2);
        opts.levels[0].geo_block_size = vec![2, 2];
        opts
    }

    #[test]
    fn valid_two_level_configuration() {
        two_level().validate(&fine()).unwrap();
    }

    #[test]
    fn depth_limit_is_enforced() {
        let opts = MgOptions::new(MAX_LEVELS + 1);
        assert!(matches!(opts.validate(&fine()), Err(MgError::Config(_))));
    }

    #[test]
    fn preconditioned_solution_needs_preconditioned_smoother() {
        let mut opts = two_level();
        opts.levels[0].coarse_grid_solution_type = SolutionType::MatPc;
        assert!(opts.validate(&fine()).is_err());
        opts.levels[0].smoother_solve_type = SolveType::DirectPc;
        opts.validate(&fine()).unwrap();
    }

    #[test]
    fn non_dividing_block_rejected() {
        let mut opts = two_level();
        opts.levels[0].geo_block_size = vec![3, 2];
        assert!(opts.validate(&fine()).is_err());
    }

    #[test]
    fn single_parity_aggregation_needs_wide_blocks() {
        let fine = FieldParam::new(Lattice::new(&[8, 6]).unwrap(), 2, 1);
        let mut opts = two_level();
        opts.levels[0].smoother_solve_type = SolveType::DirectPc;
        opts.levels[0].coarse_grid_solution_type = SolutionType::MatPc;
        opts.levels[0].geo_block_size = vec![2, 1];
        assert!(matches!(opts.validate(&fine), Err(MgError::Config(_))));
        opts.levels[0].geo_block_size = vec![2, 2];
        opts.validate(&fine).unwrap();
    }

    #[test]
    fn flags_default_to_post_orthonormalization() {
        let flags = MgFlags::default();
        assert!(flags.contains(MgFlags::POST_ORTHONORMALIZE));
        assert!(!flags.contains(MgFlags::VERIFY));
    }
}

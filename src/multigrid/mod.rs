//! Recursive algebraic multigrid hierarchy.
//!
//! [`Multigrid`] owns the finest [`Level`]; each level owns the next coarser one. Building
//! the hierarchy runs the near-kernel setup level by level, constructs the transfer
//! operators from the resulting vectors and assembles the Galerkin coarse operators.
//! Afterwards the hierarchy is a [`FlexiblePreconditioner`]: one application is one cycle.
//!
//! ```no_run
//! use lamg::{Lattice, MgOptions, Multigrid, StencilOperator};
//!
//! let lattice = Lattice::new(&[16, 16]).unwrap();
//! let op = StencilOperator::gauge_laplacian(lattice, 2, 2, 0.05, 0.0, 7).unwrap();
//! let mut opts = MgOptions::new(2);
//! opts.levels[0].geo_block_size = vec![4, 4];
//! opts.levels[0].n_vec = 8;
//! let mut mg = Multigrid::new(op, opts).unwrap();
//! ```

pub mod coarse_op;
pub mod io;
pub mod level;
pub mod null_space;
pub mod smoother;
pub mod transfer;
mod verify;

pub use coarse_op::{LevelOperators, build_coarse_operator};
pub use io::{FileStore, VectorStore};
pub use level::Level;
pub use null_space::{free_field_vectors, orthonormalize};
pub use smoother::Smoother;
pub use transfer::Transfer;

use crate::config::MgOptions;
use crate::context::ksp_context::{SolverKind, SolverParam};
use crate::core::field::{LatticeField, SiteSubset};
use crate::core::traits::LinearOperator;
use crate::error::MgError;
use crate::matrix::StencilOperator;
use crate::preconditioner::FlexiblePreconditioner;
use crate::solver::{GcrSolver, LinearSolver};
use crate::utils::convergence::SolveStats;
use std::sync::Arc;

pub struct Multigrid {
    top: Level,
    opts: Arc<MgOptions>,
}

impl Multigrid {
    /// Build the full hierarchy on top of the fine operator.
    pub fn new(fine: StencilOperator, options: MgOptions) -> Result<Self, MgError> {
        options.validate(fine.param())?;
        let opts = Arc::new(options);
        log::info!(
            "building {}-level multigrid on {}",
            opts.n_level,
            fine.param().describe()
        );
        let precision = fine.precision();
        let ops = LevelOperators::new(fine, precision, &opts, 0)?;
        let b = if opts.n_level > 1 {
            let lo = &opts.levels[0];
            let param = ops
                .stencil
                .param()
                .clone()
                .with_subset(SiteSubset::Full)
                .with_precision(lo.precision_null);
            (0..lo.n_vec).map(|_| LatticeField::new(param.clone())).collect()
        } else {
            Vec::new()
        };
        let top = Level::new(0, Arc::clone(&opts), ops, b, None)?;
        log::info!("multigrid setup done");
        Ok(Self { top, opts })
    }

    pub fn options(&self) -> &MgOptions {
        &self.opts
    }

    pub fn n_levels(&self) -> usize {
        self.opts.n_level
    }

    pub fn is_ready(&self) -> bool {
        self.top.is_ready()
    }

    /// Level `depth` of the hierarchy, 0 being the finest.
    pub fn level(&self, depth: usize) -> Option<&Level> {
        let mut lvl = &self.top;
        for _ in 0..depth {
            lvl = lvl.coarse()?;
        }
        Some(lvl)
    }

    /// Apply one cycle: `x ≈ A⁻¹ b`.
    pub fn solve(&mut self, x: &mut LatticeField, b: &LatticeField) -> Result<(), MgError> {
        if !self.top.is_ready() {
            return Err(MgError::config("multigrid hierarchy is not ready"));
        }
        self.top.cycle(x, b)
    }

    /// Solve `A x = b` to relative tolerance `tol` with GCR preconditioned by the
    /// hierarchy. `x` is the initial guess.
    pub fn invert(
        &mut self,
        x: &mut LatticeField,
        b: &LatticeField,
        tol: f64,
        maxiter: usize,
    ) -> Result<SolveStats, MgError> {
        let ops = self.top.operators();
        let op: Arc<dyn LinearOperator> = match b.param().subset {
            SiteSubset::Parity(_) => Arc::clone(&ops.work),
            SiteSubset::Full => Arc::clone(&ops.residual),
        };
        let param = SolverParam::new(SolverKind::Gcr, tol, maxiter).with_init_guess(true);
        let mut gcr = GcrSolver::new(param);
        let pc: &mut dyn FlexiblePreconditioner = self;
        let stats = gcr.solve(op.as_ref(), Some(pc), b, x)?;
        log::info!(
            "multigrid-preconditioned GCR: {} iterations, |r| = {:e}, converged = {}",
            stats.iterations,
            stats.final_residual,
            stats.converged
        );
        Ok(stats)
    }

    /// Rebuild the hierarchy; levels with `setup_maxiter_refresh > 0` first refine their
    /// near-kernel vectors.
    pub fn refresh(&mut self) -> Result<(), MgError> {
        self.top.reset(true)
    }

    /// Write the near-kernel vectors of every non-terminal level to `vec_outfile`.
    pub fn dump_null_vectors(&self) -> Result<(), MgError> {
        self.top.dump_null_vectors()
    }
}

impl FlexiblePreconditioner for Multigrid {
    fn apply(&mut self, r: &LatticeField, z: &mut LatticeField) -> Result<(), MgError> {
        self.solve(z, r)
    }
}

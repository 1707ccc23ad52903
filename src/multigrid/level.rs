//! One level of the multigrid hierarchy.
//!
//! A level owns everything needed to run its part of the cycle: the operators of its work
//! space, the near-kernel vectors, the transfer to the next level, the smoothers, the
//! coarse-grid solver and the next level itself. Construction is two-phase: `Level::new`
//! populates the near-kernel vectors, `reset` builds everything derived from them. The
//! level is ready once `reset` has completed on it and on every coarser level.

use crate::config::{
    CycleType, Location, MAX_LEVELS, MgFlags, MgOptions, NullSpaceSource, SolutionType, SolveType,
    Verbosity,
};
use crate::context::ksp_context::{SolverKind, SolverParam};
use crate::context::log_context::LevelContext;
use crate::core::blas;
use crate::core::field::{LatticeField, SiteSubset};
use crate::core::precision::Precision;
use crate::error::MgError;
use crate::multigrid::coarse_op::{LevelOperators, build_coarse_operator};
use crate::multigrid::smoother::Smoother;
use crate::multigrid::transfer::Transfer;
use crate::preconditioner::FlexiblePreconditioner;
use crate::solver::residual;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;

/// How a level solves the coarse-grid correction.
pub(crate) enum CoarseSolver {
    /// Not built yet, or the level is the coarsest.
    Unset,
    /// One cycle of the next level.
    Recurse,
    /// A solver on the next level's operator, optionally preconditioned by that level.
    Wrapped { smoother: Smoother, precondition: bool },
}

pub struct Level {
    pub(super) level: usize,
    pub(super) n_level: usize,
    parent: Option<usize>,
    pub(super) opts: Arc<MgOptions>,
    pub(super) ctx: LevelContext,
    pub(super) ops: LevelOperators,
    /// Near-kernel vectors; full-lattice fields at `precision_null`.
    pub(super) b: Vec<LatticeField>,
    pub(super) transfer: Option<Transfer>,
    pub(super) reset_transfer: bool,
    pub(super) presmoother: Option<Smoother>,
    pub(super) postsmoother: Option<Smoother>,
    pub(super) coarse: Option<Box<Level>>,
    pub(super) coarse_solver: CoarseSolver,
    /// Near-kernel vectors handed to the next level when it is created.
    pending_coarse_b: Vec<LatticeField>,
    pub(super) r: LatticeField,
    b_tilde: LatticeField,
    x_work: LatticeField,
    e_work: LatticeField,
    pub(super) r_coarse: Option<LatticeField>,
    pub(super) x_coarse: Option<LatticeField>,
    pub(super) rng: StdRng,
    ready: bool,
}

impl Level {
    /// Create level `level` from its operators and (possibly empty) near-kernel vectors,
    /// then build the rest of the hierarchy below it.
    pub(crate) fn new(
        level: usize,
        opts: Arc<MgOptions>,
        ops: LevelOperators,
        b: Vec<LatticeField>,
        parent: Option<usize>,
    ) -> Result<Self, MgError> {
        if level >= MAX_LEVELS || level >= opts.n_level {
            return Err(MgError::config(format!(
                "level {level} outside a hierarchy of {} levels (maximum {MAX_LEVELS})",
                opts.n_level
            )));
        }
        let lo = &opts.levels[level];
        let ctx = LevelContext::new(level, lo.location, lo.verbosity);
        if lo.location != Location::Host {
            return Err(MgError::config(format!(
                "{}location {} is not available",
                ctx.prefix(),
                lo.location
            )));
        }
        if lo.coarse_grid_solution_type == SolutionType::MatPc
            && lo.smoother_solve_type != SolveType::DirectPc
        {
            return Err(MgError::config(format!(
                "{}preconditioned coarse-grid solution requires a preconditioned smoother",
                ctx.prefix()
            )));
        }
        match parent {
            Some(p) => ctx.summarize(format_args!(
                "creating level {} of {} below level {}",
                level + 1,
                opts.n_level,
                p + 1
            )),
            None => ctx.summarize(format_args!("creating level {} of {}", level + 1, opts.n_level)),
        }

        let work = ops.work_param(ops.residual.precision());
        let mut lvl = Self {
            level,
            n_level: opts.n_level,
            parent,
            opts: Arc::clone(&opts),
            ctx,
            ops,
            b,
            transfer: None,
            reset_transfer: false,
            presmoother: None,
            postsmoother: None,
            coarse: None,
            coarse_solver: CoarseSolver::Unset,
            pending_coarse_b: Vec::new(),
            r: LatticeField::new(work.clone()),
            b_tilde: LatticeField::new(work.clone()),
            x_work: LatticeField::new(work.clone()),
            e_work: LatticeField::new(work),
            r_coarse: None,
            x_coarse: None,
            rng: StdRng::seed_from_u64(opts.seed.wrapping_add(level as u64)),
            ready: false,
        };

        if !lvl.is_terminal() {
            match opts.null_space {
                NullSpaceSource::Compute => {
                    if opts.flags.contains(MgFlags::GENERATE_ALL_LEVELS) || level == 0 {
                        lvl.ctx.verbose(format_args!(
                            "initializing {} random near-kernel vectors",
                            lvl.b.len()
                        ));
                        for v in lvl.b.iter_mut() {
                            v.randomize(&mut lvl.rng);
                        }
                    }
                    if opts.levels[level].num_setup_iter > 0 {
                        lvl.generate_null_vectors(false)?;
                    }
                }
                NullSpaceSource::Load => lvl.load_vectors()?,
                NullSpaceSource::FreeField => lvl.build_free_vectors()?,
            }
        }

        // The iterative setup with the multigrid inverter has already built the level.
        if lvl.transfer.is_none() {
            lvl.reset(false)?;
        }
        Ok(lvl)
    }

    pub fn depth(&self) -> usize {
        self.level
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub(super) fn is_terminal(&self) -> bool {
        self.level + 1 == self.n_level
    }

    /// Ready when this level and every coarser one have completed `reset`.
    pub fn is_ready(&self) -> bool {
        self.ready && self.coarse.as_ref().is_none_or(|c| c.is_ready())
    }

    pub fn null_vectors(&self) -> &[LatticeField] {
        &self.b
    }

    pub fn transfer(&self) -> Option<&Transfer> {
        self.transfer.as_ref()
    }

    pub fn coarse(&self) -> Option<&Level> {
        self.coarse.as_deref()
    }

    pub fn operators(&self) -> &LevelOperators {
        &self.ops
    }

    pub fn context(&self) -> &LevelContext {
        &self.ctx
    }

    pub fn has_presmoother(&self) -> bool {
        self.presmoother.is_some()
    }

    pub fn has_postsmoother(&self) -> bool {
        self.postsmoother.is_some()
    }

    /// True when the coarse correction is a single cycle of the next level.
    pub fn recurses(&self) -> bool {
        matches!(self.coarse_solver, CoarseSolver::Recurse)
    }

    /// Precision of the work-space vectors.
    pub(super) fn work_precision(&self) -> Precision {
        self.r.precision()
    }

    /// Twisted-mass shift added to the coarse operator:
    /// `2·κ·μ·(mu_factor[l+1] − mu_factor[l])`.
    pub(super) fn coarse_shift(&self) -> f64 {
        let levels = &self.opts.levels;
        let Some(next) = levels.get(self.level + 1) else {
            return 0.0;
        };
        let fine = self.ops.work.as_ref();
        (next.mu_factor - levels[self.level].mu_factor) * 2.0 * fine.kappa() * fine.mu()
    }

    /// Rebuild transfer, coarse operators, smoothers, coarse level and coarse solver.
    /// With `refresh`, near-kernel vectors are first refined where
    /// `setup_maxiter_refresh` is non-zero.
    pub fn reset(&mut self, refresh: bool) -> Result<(), MgError> {
        let opts = Arc::clone(&self.opts);
        let lo = &opts.levels[self.level];
        self.ctx.summarize(format_args!(
            "{} level {} of {}",
            if self.transfer.is_some() { "resetting" } else { "creating" },
            self.level + 1,
            self.n_level
        ));
        self.ready = false;
        self.presmoother = None;
        self.postsmoother = None;
        self.coarse_solver = CoarseSolver::Unset;

        if refresh && !self.is_terminal() && lo.setup_maxiter_refresh > 0 {
            self.generate_null_vectors(true)?;
        }

        let mut coarse_ops = None;
        if !self.is_terminal() {
            self.build_transfer(refresh)?;
            let Some(transfer) = self.transfer.as_ref() else {
                return Err(MgError::config("transfer missing after construction"));
            };
            self.ctx.verbose(format_args!("creating coarse operator"));
            let stencil =
                build_coarse_operator(self.ops.work.as_ref(), transfer, self.coarse_shift())?;
            self.ctx.verbose(format_args!(
                "coarse operator on {:?} with {} offsets",
                stencil.lattice().dims(),
                stencil.offsets().len()
            ));
            coarse_ops = Some(LevelOperators::new(
                stencil,
                opts.precision.residual,
                &opts,
                self.level + 1,
            )?);
        }

        self.create_smoothers()?;

        if let Some(coarse_ops) = coarse_ops {
            match self.coarse.as_deref_mut() {
                Some(coarse) => {
                    coarse.ops = coarse_ops;
                    coarse.reset(refresh)?;
                }
                None => {
                    let b = std::mem::take(&mut self.pending_coarse_b);
                    let coarse = Level::new(
                        self.level + 1,
                        Arc::clone(&opts),
                        coarse_ops,
                        b,
                        Some(self.level),
                    )?;
                    self.coarse = Some(Box::new(coarse));
                }
            }
            self.create_coarse_solver()?;
            if opts.flags.contains(MgFlags::VERIFY) {
                self.verify()?;
            }
        }

        self.ready = true;
        self.ctx.summarize(format_args!(
            "setup of level {} of {} done",
            self.level + 1,
            self.n_level
        ));
        Ok(())
    }

    /// Create the transfer on first use, or rebuild its basis when requested.
    fn build_transfer(&mut self, refresh: bool) -> Result<(), MgError> {
        let opts = Arc::clone(&self.opts);
        let lo = &opts.levels[self.level];
        if let Some(transfer) = self.transfer.as_mut() {
            if self.reset_transfer || refresh {
                self.ctx.verbose(format_args!("resetting transfer operator"));
                transfer.reset(&self.b)?;
                self.reset_transfer = false;
            }
            return Ok(());
        }

        self.ctx.verbose(format_args!("creating transfer operator"));
        let transfer = Transfer::new(
            self.level,
            &self.b,
            lo.n_vec,
            &lo.geo_block_size,
            lo.spin_block_size,
            lo.precision_null,
            self.ops.work.param().subset,
        )?;
        let coarse_work = transfer
            .coarse_param()
            .clone()
            .with_precision(self.work_precision());
        self.r_coarse = Some(LatticeField::new(coarse_work.clone()));
        self.x_coarse = Some(LatticeField::new(coarse_work));

        if self.level + 2 < self.n_level {
            let next = &opts.levels[self.level + 1];
            let n = lo.n_vec.max(next.n_vec);
            let param = transfer
                .coarse_param()
                .clone()
                .with_precision(next.precision_null.max(Precision::Single));
            let mut b_coarse: Vec<LatticeField> =
                (0..n).map(|_| LatticeField::new(param.clone())).collect();
            let restricted = if opts.flags.contains(MgFlags::GENERATE_ALL_LEVELS) {
                0
            } else {
                self.ctx.verbose(format_args!("restricting near-kernel vectors"));
                transfer.restrict_vectors(&mut b_coarse[..lo.n_vec], &self.b[..lo.n_vec])?;
                lo.n_vec
            };
            for v in b_coarse[restricted..].iter_mut() {
                v.randomize(&mut self.rng);
            }
            self.pending_coarse_b = b_coarse;
        }
        self.transfer = Some(transfer);
        self.ctx.verbose(format_args!("transfer operator done"));
        Ok(())
    }

    /// Build the pre- and post-smoothers from the level options.
    pub(super) fn create_smoothers(&mut self) -> Result<(), MgError> {
        self.ctx.verbose(format_args!("creating smoother"));
        let lo = &self.opts.levels[self.level];
        let terminal = self.is_terminal();
        self.presmoother = None;
        self.postsmoother = None;
        let Some(kind) = lo.smoother else {
            return Ok(());
        };
        let pre_iters = if terminal { lo.nu_pre + lo.nu_post } else { lo.nu_pre };
        if pre_iters > 0 {
            let param = SolverParam::new(kind, lo.smoother_tol, pre_iters)
                .with_n_krylov(pre_iters)
                .with_return_residual(true);
            self.presmoother = Some(Smoother::new(&param, Arc::clone(&self.ops.smoother))?);
        }
        if !terminal && lo.nu_post > 0 {
            let param =
                SolverParam::new(kind, lo.smoother_tol, lo.nu_post).with_n_krylov(lo.nu_post);
            self.postsmoother =
                Some(Smoother::new(&param, Arc::clone(&self.ops.smoother_sloppy))?);
        }
        Ok(())
    }

    fn create_coarse_solver(&mut self) -> Result<(), MgError> {
        let opts = Arc::clone(&self.opts);
        let Some(coarse) = self.coarse.as_deref() else {
            self.coarse_solver = CoarseSolver::Unset;
            return Ok(());
        };
        let deep = self.level + 2 < self.n_level;
        if opts.cycle_type == CycleType::VCycle && deep {
            self.ctx.verbose(format_args!("coarse grid corrected by recursion"));
            self.coarse_solver = CoarseSolver::Recurse;
            return Ok(());
        }
        let next = &opts.levels[self.level + 1];
        let (param, op, precondition) = match next.coarse_solver {
            SolverKind::Multigrid => {
                return Err(MgError::config(format!(
                    "{}coarse solver cannot itself be a multigrid",
                    self.ctx.prefix()
                )));
            }
            SolverKind::Direct => (
                SolverParam::new(SolverKind::Direct, 0.0, 1),
                Arc::clone(&coarse.ops.residual),
                false,
            ),
            kind => {
                let op = if coarse.ops.is_parity_work() {
                    Arc::clone(&coarse.ops.work)
                } else {
                    Arc::clone(&coarse.ops.residual)
                };
                let param = SolverParam::new(kind, next.coarse_solver_tol, next.coarse_solver_maxiter)
                    .with_n_krylov(next.coarse_solver_maxiter.min(20));
                (param, op, deep || coarse.presmoother.is_some())
            }
        };
        self.ctx.verbose(format_args!(
            "coarse grid solved by {:?} (tol {:e}, maxiter {}){}",
            param.kind,
            param.tol,
            param.maxiter,
            if precondition { ", preconditioned by the next level" } else { "" }
        ));
        self.coarse_solver = CoarseSolver::Wrapped {
            smoother: Smoother::new(&param, op)?,
            precondition,
        };
        Ok(())
    }

    /// One cycle: `x ≈ A⁻¹ b`. `b` is either a full-lattice field or, on a level whose
    /// work space is one parity, a field of that parity.
    pub(crate) fn cycle(&mut self, x: &mut LatticeField, b: &LatticeField) -> Result<(), MgError> {
        let outer_pc = matches!(b.param().subset, SiteSubset::Parity(_));
        let inner_pc = self.ops.is_parity_work();
        if outer_pc && !inner_pc {
            return Err(MgError::config(format!(
                "{}single-parity input on a level working on the full lattice",
                self.ctx.prefix()
            )));
        }
        if inner_pc && !outer_pc {
            self.ops.work.prepare(&mut self.b_tilde, b)?;
        } else {
            self.b_tilde.copy_from(b)?;
        }
        let terminal = self.is_terminal();
        let tracing = self.ctx.enabled(Verbosity::Debug);

        self.x_work.zero();
        let mut have_residual = false;
        match self.presmoother.as_mut() {
            Some(pre) => {
                let stats = pre.solve(None, &self.b_tilde, &mut self.x_work)?;
                if let Some(res) = stats.residual {
                    if !terminal && res.param().same_layout(self.r.param()) {
                        self.r.copy_from(&res)?;
                        have_residual = true;
                    }
                }
            }
            None if terminal => self.x_work.copy_from(&self.b_tilde)?,
            None => {}
        }

        if !terminal {
            if !have_residual {
                residual(self.ops.work.as_ref(), &self.b_tilde, &self.x_work, &mut self.r)?;
            }
            if tracing {
                self.ctx.debug(format_args!(
                    "|b| = {:e}, |r| after pre-smoothing = {:e}",
                    blas::norm2(&self.b_tilde).sqrt(),
                    blas::norm2(&self.r).sqrt()
                ));
            }

            let skip = matches!(self.coarse_solver, CoarseSolver::Unset);
            if let (Some(transfer), Some(r_c), Some(x_c), false) = (
                self.transfer.as_ref(),
                self.r_coarse.as_mut(),
                self.x_coarse.as_mut(),
                skip,
            ) {
                transfer.restrict(r_c, &self.r)?;
                x_c.zero();
                match &mut self.coarse_solver {
                    CoarseSolver::Unset => {}
                    CoarseSolver::Recurse => {
                        let coarse = self
                            .coarse
                            .as_deref_mut()
                            .ok_or_else(|| MgError::config("recursion without a coarse level"))?;
                        coarse.cycle(x_c, r_c)?;
                    }
                    CoarseSolver::Wrapped {
                        smoother,
                        precondition,
                    } => {
                        let pc = match (*precondition, self.coarse.as_deref_mut()) {
                            (true, Some(c)) => Some(c as &mut dyn FlexiblePreconditioner),
                            _ => None,
                        };
                        let stats = smoother.solve(pc, r_c, x_c)?;
                        self.ctx.verbose(format_args!(
                            "coarse solve: {} iterations, residual {:e}",
                            stats.iterations, stats.final_residual
                        ));
                    }
                }
                transfer.prolong(&mut self.e_work, x_c)?;
                blas::xpy(&self.e_work, &mut self.x_work);
            }

            if let Some(post) = self.postsmoother.as_mut() {
                residual(self.ops.work.as_ref(), &self.b_tilde, &self.x_work, &mut self.r)?;
                self.e_work.zero();
                post.solve(None, &self.r, &mut self.e_work)?;
                blas::xpy(&self.e_work, &mut self.x_work);
            }
            if tracing {
                residual(self.ops.work.as_ref(), &self.b_tilde, &self.x_work, &mut self.r)?;
                self.ctx.debug(format_args!(
                    "|r| after cycle = {:e}",
                    blas::norm2(&self.r).sqrt()
                ));
            }
        }

        if inner_pc && !outer_pc {
            self.ops.work.reconstruct(&self.x_work, b, x)
        } else {
            x.copy_from(&self.x_work)
        }
    }
}

impl FlexiblePreconditioner for Level {
    fn apply(&mut self, r: &LatticeField, z: &mut LatticeField) -> Result<(), MgError> {
        self.cycle(z, r)
    }
}

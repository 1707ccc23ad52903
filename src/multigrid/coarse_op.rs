//! Galerkin coarse operators.
//!
//! `A_c = R A P` is assembled by probing: the coarse lattice is coloured so that sites of
//! one colour are more than one site apart in every dimension, and for each colour and
//! coarse degree of freedom `k` the operator is applied to the indicator vector of that
//! (colour, k) pair. Every coarse site then sees the response of at most one source,
//! which gives column `k` of the block coupling it to that source.

use crate::config::{MgOptions, SolutionType, SolveType};
use crate::core::field::{FieldParam, LatticeField, SiteSubset};
use crate::core::precision::Precision;
use crate::core::traits::LinearOperator;
use crate::error::MgError;
use crate::matrix::{SchurOperator, StencilOperator};
use crate::multigrid::transfer::Transfer;
use crate::utils::coloring::ProbeColoring;
use num_complex::Complex64;
use num_traits::One;
use std::sync::Arc;

/// Sign of the twisted-mass term on coarse chirality `chi`.
fn chirality_sign(chi: usize, n_chiral: usize) -> f64 {
    if n_chiral == 1 || chi < n_chiral / 2 { 1.0 } else { -1.0 }
}

/// Assemble `R A P + i·shift·γ5` on the coarse lattice of `transfer`.
///
/// `fine_op` must act on the transfer's fine work space. The coarse operator inherits
/// `kappa` and `mu` from `fine_op`.
pub fn build_coarse_operator(
    fine_op: &dyn LinearOperator,
    transfer: &Transfer,
    shift: f64,
) -> Result<StencilOperator, MgError> {
    let parity_work = matches!(transfer.fine_param().subset, SiteSubset::Parity(_));
    if parity_work && transfer.geo_block().iter().any(|&b| b < 2) {
        // two-hop couplings of a Schur complement would alias under distance-one probing
        return Err(MgError::config(format!(
            "single-parity coarsening needs blocks of at least 2 in every dimension, got {:?}",
            transfer.geo_block()
        )));
    }
    let coarse_param = transfer.coarse_param().clone();
    let lattice = coarse_param.lattice.clone();
    let dof = coarse_param.dof();
    let coloring = ProbeColoring::new(&lattice);

    let fine_param = transfer.fine_param().clone();
    let mut source = LatticeField::new(coarse_param.clone());
    let mut response = LatticeField::new(coarse_param.clone());
    let mut p_in = LatticeField::new(fine_param.clone());
    let mut a_out = LatticeField::new(fine_param);

    let mut builder = StencilOperator::builder(coarse_param)
        .kappa(fine_op.kappa())
        .mu(fine_op.mu());
    let (mut total, mut leaked) = (0.0, 0.0);
    for color in 0..coloring.n_colors() {
        for k in 0..dof {
            source.zero();
            for site in 0..lattice.volume() {
                if coloring.color_of(&lattice, site) == color {
                    source.site_mut(site)[k] = Complex64::one();
                }
            }
            transfer.prolong(&mut p_in, &source)?;
            fine_op.apply(&mut a_out, &p_in)?;
            transfer.restrict(&mut response, &a_out)?;
            for site in 0..lattice.volume() {
                let values = response.site(site);
                let norm: f64 = values.iter().map(|z| z.norm_sqr()).sum();
                total += norm;
                match coloring.source_offset(&lattice, site, color) {
                    Some(offset) => builder.add_column(site, &offset, k, values)?,
                    None => leaked += norm,
                }
            }
        }
    }
    if leaked > 1e-24 * total {
        return Err(MgError::config(format!(
            "coarse operator reaches beyond nearest neighbours on {:?} (blocks {:?} too small)",
            lattice.dims(),
            transfer.geo_block()
        )));
    }

    if shift != 0.0 {
        let n_chiral = transfer.n_chiral();
        let n_vec = transfer.n_vec();
        for site in 0..lattice.volume() {
            for chi in 0..n_chiral {
                let value = Complex64::new(0.0, shift * chirality_sign(chi, n_chiral));
                for v in 0..n_vec {
                    builder.add_diagonal(site, chi * n_vec + v, value)?;
                }
            }
        }
    }
    builder.build()
}

/// `out += i·shift·γ5 input` on a coarse field whose colours are the transfer's vectors.
pub(crate) fn apply_twist_shift(
    out: &mut LatticeField,
    input: &LatticeField,
    shift: f64,
    n_chiral: usize,
) {
    let ncolor = input.param().ncolor;
    for (k, (o, i)) in out.data_mut().iter_mut().zip(input.data()).enumerate() {
        let chi = (k % (n_chiral * ncolor)) / ncolor;
        *o += Complex64::new(0.0, shift * chirality_sign(chi, n_chiral)) * i;
    }
    out.round_to_precision();
}

/// The operators one level runs on, sharing one set of stencil coefficients.
#[derive(Clone)]
pub struct LevelOperators {
    /// Full-lattice operator the level was built from.
    pub stencil: StencilOperator,
    /// Full-lattice operator at residual precision.
    pub residual: Arc<dyn LinearOperator>,
    /// Operator of the level's work space: `residual`, or its Schur complement.
    pub work: Arc<dyn LinearOperator>,
    pub smoother: Arc<dyn LinearOperator>,
    pub smoother_sloppy: Arc<dyn LinearOperator>,
}

impl LevelOperators {
    /// Derive the operator roles of `level` from its stencil.
    pub fn new(
        stencil: StencilOperator,
        residual_precision: Precision,
        opts: &MgOptions,
        level: usize,
    ) -> Result<Self, MgError> {
        let lo = &opts.levels[level];
        let residual = stencil.with_precision(residual_precision);
        let (smoother, smoother_sloppy): (Arc<dyn LinearOperator>, Arc<dyn LinearOperator>) =
            match lo.smoother_solve_type {
                SolveType::Direct => (
                    Arc::new(stencil.with_precision(opts.precision.smoother)),
                    Arc::new(stencil.with_precision(opts.precision.sloppy)),
                ),
                SolveType::DirectPc => {
                    let schur = SchurOperator::new(&stencil, opts.matpc)?;
                    (
                        Arc::new(schur.with_precision(opts.precision.smoother)),
                        Arc::new(schur.with_precision(opts.precision.sloppy)),
                    )
                }
            };
        let work: Arc<dyn LinearOperator> = match lo.coarse_grid_solution_type {
            SolutionType::Mat => Arc::new(residual.clone()),
            SolutionType::MatPc => {
                Arc::new(SchurOperator::new(&stencil, opts.matpc)?.with_precision(residual_precision))
            }
        };
        Ok(Self {
            stencil,
            residual: Arc::new(residual),
            work,
            smoother,
            smoother_sloppy,
        })
    }

    /// Layout of the work space, at `precision`.
    pub fn work_param(&self, precision: Precision) -> FieldParam {
        self.work.param().clone().with_precision(precision)
    }

    /// True when the work space is a single parity.
    pub fn is_parity_work(&self) -> bool {
        matches!(self.work.param().subset, SiteSubset::Parity(_))
    }
}

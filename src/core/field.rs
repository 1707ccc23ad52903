//! Lattice vector fields.
//!
//! A field stores `nspin × ncolor` complex degrees of freedom per site, laid out
//! site-major with spin outermost inside a site. A field either spans the whole lattice
//! or a single parity; single-parity fields index their sites by checkerboard index.

use crate::core::lattice::Lattice;
use crate::core::precision::Precision;
use crate::error::MgError;
use num_complex::Complex64;
use num_traits::{One, Zero};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Which sites a field covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteSubset {
    Full,
    Parity(usize),
}

/// Deterministic and random field initialisations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Uniform random components in `[-1, 1)`, seeded.
    Random(u64),
    /// Unit entry at (`spin`, `color`) on every site.
    Constant { spin: usize, color: usize },
    /// Unit entry at `color` (all spins) on sites whose coordinate parities match the
    /// bits of `corner`.
    Corner { corner: usize, color: usize },
    /// Unit entry at one site.
    Point { site: usize, spin: usize, color: usize },
}

/// Shape and storage descriptor of a field.
#[derive(Debug, Clone)]
pub struct FieldParam {
    pub lattice: Arc<Lattice>,
    pub nspin: usize,
    pub ncolor: usize,
    pub subset: SiteSubset,
    pub precision: Precision,
}

impl FieldParam {
    pub fn new(lattice: Arc<Lattice>, nspin: usize, ncolor: usize) -> Self {
        Self {
            lattice,
            nspin,
            ncolor,
            subset: SiteSubset::Full,
            precision: Precision::Double,
        }
    }

    pub fn with_subset(mut self, subset: SiteSubset) -> Self {
        self.subset = subset;
        self
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    /// Degrees of freedom per site.
    #[inline]
    pub fn dof(&self) -> usize {
        self.nspin * self.ncolor
    }

    pub fn sites(&self) -> usize {
        match self.subset {
            SiteSubset::Full => self.lattice.volume(),
            SiteSubset::Parity(p) => self.lattice.parity_sites(p).len(),
        }
    }

    pub fn len(&self) -> usize {
        self.sites() * self.dof()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lattice site stored at local position `local`.
    #[inline]
    pub fn site_of(&self, local: usize) -> usize {
        match self.subset {
            SiteSubset::Full => local,
            SiteSubset::Parity(p) => self.lattice.parity_sites(p)[local],
        }
    }

    /// Local position of lattice site `site`, if the field covers it.
    #[inline]
    pub fn local_of(&self, site: usize) -> Option<usize> {
        match self.subset {
            SiteSubset::Full => Some(site),
            SiteSubset::Parity(p) => {
                (self.lattice.parity(site) == p).then(|| self.lattice.cb_index(site))
            }
        }
    }

    /// Same lattice, site content and subset; precision may differ.
    pub fn same_layout(&self, other: &FieldParam) -> bool {
        (Arc::ptr_eq(&self.lattice, &other.lattice) || self.lattice == other.lattice)
            && self.nspin == other.nspin
            && self.ncolor == other.ncolor
            && self.subset == other.subset
    }

    /// Descriptor of the coarse field produced by aggregating `geo_block` sites and
    /// `spin_block` spins into one coarse site carrying `n_vec` colours per chirality.
    pub fn create_coarse(
        &self,
        geo_block: &[usize],
        spin_block: usize,
        n_vec: usize,
        precision: Precision,
    ) -> Result<FieldParam, MgError> {
        if spin_block == 0 || self.nspin % spin_block != 0 {
            return Err(MgError::config(format!(
                "spin block size {spin_block} does not divide {} spins",
                self.nspin
            )));
        }
        if n_vec == 0 {
            return Err(MgError::config("coarse field needs at least one vector"));
        }
        let lattice = self.lattice.coarsen(geo_block)?;
        Ok(FieldParam::new(lattice, self.nspin / spin_block, n_vec).with_precision(precision))
    }

    pub(crate) fn describe(&self) -> String {
        format!(
            "{:?} x {}s x {}c {:?} ({})",
            self.lattice.dims(),
            self.nspin,
            self.ncolor,
            self.subset,
            self.precision
        )
    }
}

/// Complex vector field over a lattice.
#[derive(Debug, Clone)]
pub struct LatticeField {
    param: FieldParam,
    data: Vec<Complex64>,
}

impl LatticeField {
    pub fn new(param: FieldParam) -> Self {
        let data = vec![Complex64::zero(); param.len()];
        Self { param, data }
    }

    pub fn param(&self) -> &FieldParam {
        &self.param
    }

    pub fn precision(&self) -> Precision {
        self.param.precision
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[Complex64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [Complex64] {
        &mut self.data
    }

    /// Degrees of freedom at local site `local`.
    #[inline]
    pub fn site(&self, local: usize) -> &[Complex64] {
        let dof = self.param.dof();
        &self.data[local * dof..(local + 1) * dof]
    }

    #[inline]
    pub fn site_mut(&mut self, local: usize) -> &mut [Complex64] {
        let dof = self.param.dof();
        &mut self.data[local * dof..(local + 1) * dof]
    }

    pub fn zero(&mut self) {
        self.data.fill(Complex64::zero());
    }

    /// Round stored values to the field's precision.
    pub fn round_to_precision(&mut self) {
        let p = self.param.precision;
        if p < Precision::Double {
            self.data.iter_mut().for_each(|z| *z = p.round_complex(*z));
        }
    }

    /// Round stored values to `p` and then to the field's own precision.
    pub(crate) fn round_to(&mut self, p: Precision) {
        let p = p.min(self.param.precision);
        if p < Precision::Double {
            self.data.iter_mut().for_each(|z| *z = p.round_complex(*z));
        }
    }

    /// Copy `src` into `self`. Same-layout copies convert precision; a full-lattice
    /// source copied into a single-parity field extracts that parity.
    pub fn copy_from(&mut self, src: &LatticeField) -> Result<(), MgError> {
        if self.param.same_layout(&src.param) {
            self.data.copy_from_slice(&src.data);
        } else if src.param.subset == SiteSubset::Full
            && self.param.lattice == src.param.lattice
            && self.param.dof() == src.param.dof()
        {
            for local in 0..self.param.sites() {
                let site = self.param.site_of(local);
                let dof = self.param.dof();
                self.data[local * dof..(local + 1) * dof].copy_from_slice(src.site(site));
            }
        } else {
            return Err(MgError::DimensionMismatch(format!(
                "cannot copy {} into {}",
                src.param.describe(),
                self.param.describe()
            )));
        }
        self.round_to_precision();
        Ok(())
    }

    /// Write a single-parity field into the matching sites of this full-lattice field,
    /// leaving the other parity untouched.
    pub fn insert_parity(&mut self, src: &LatticeField) -> Result<(), MgError> {
        let ok = self.param.subset == SiteSubset::Full
            && matches!(src.param.subset, SiteSubset::Parity(_))
            && self.param.lattice == src.param.lattice
            && self.param.dof() == src.param.dof();
        if !ok {
            return Err(MgError::DimensionMismatch(format!(
                "cannot insert {} into {}",
                src.param.describe(),
                self.param.describe()
            )));
        }
        let p = self.param.precision;
        for local in 0..src.param.sites() {
            let site = src.param.site_of(local);
            for (dst, &v) in self.site_mut(site).iter_mut().zip(src.site(local)) {
                *dst = p.round_complex(v);
            }
        }
        Ok(())
    }

    /// Fill with uniform random components in `[-1, 1)`.
    pub fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for z in self.data.iter_mut() {
            *z = Complex64::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
        }
        self.round_to_precision();
    }

    /// Overwrite the field with a source of the given kind.
    pub fn source(&mut self, kind: SourceKind) -> Result<(), MgError> {
        let one = Complex64::one();
        let (nspin, ncolor) = (self.param.nspin, self.param.ncolor);
        match kind {
            SourceKind::Random(seed) => {
                let mut rng = StdRng::seed_from_u64(seed);
                self.randomize(&mut rng);
                return Ok(());
            }
            SourceKind::Constant { spin, color } => {
                check_component(spin, color, nspin, ncolor)?;
                self.zero();
                for local in 0..self.param.sites() {
                    self.site_mut(local)[spin * ncolor + color] = one;
                }
            }
            SourceKind::Corner { corner, color } => {
                check_component(0, color, nspin, ncolor)?;
                let ndim = self.param.lattice.ndim();
                if corner >= 1 << ndim {
                    return Err(MgError::config(format!(
                        "corner {corner} out of range for {ndim} dimensions"
                    )));
                }
                self.zero();
                for local in 0..self.param.sites() {
                    let site = self.param.site_of(local);
                    let bits = (0..ndim)
                        .map(|mu| (self.param.lattice.coord(site, mu) % 2) << mu)
                        .sum::<usize>();
                    if bits == corner {
                        let values = self.site_mut(local);
                        for s in 0..nspin {
                            values[s * ncolor + color] = one;
                        }
                    }
                }
            }
            SourceKind::Point { site, spin, color } => {
                check_component(spin, color, nspin, ncolor)?;
                let local = self.param.local_of(site).ok_or_else(|| {
                    MgError::config(format!("point source site {site} not covered by field"))
                })?;
                self.zero();
                self.site_mut(local)[spin * ncolor + color] = one;
            }
        }
        Ok(())
    }
}

fn check_component(spin: usize, color: usize, nspin: usize, ncolor: usize) -> Result<(), MgError> {
    if spin >= nspin || color >= ncolor {
        return Err(MgError::config(format!(
            "component (spin {spin}, color {color}) outside {nspin}x{ncolor} site"
        )));
    }
    Ok(())
}

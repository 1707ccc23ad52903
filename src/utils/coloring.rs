//! Lattice colouring for probing nearest-neighbour operators.
//!
//! A coarse operator coupling each site only to sites within distance one per dimension
//! can be recovered column by column from a few applications: sites of the same colour are
//! far enough apart that their responses never overlap. In every dimension sites are
//! coloured by `x mod p`, where `p` is the smallest divisor of the extent that is at least
//! three (or the extent itself when it has none). See Saad §10.7 for the general
//! graph-colouring view.

use crate::core::lattice::Lattice;

#[derive(Debug, Clone)]
pub struct ProbeColoring {
    periods: Vec<usize>,
    n_colors: usize,
}

/// Smallest divisor of `extent` that is at least three, or `extent` when none exists.
pub fn probe_period(extent: usize) -> usize {
    (3..extent).find(|p| extent % p == 0).unwrap_or(extent)
}

impl ProbeColoring {
    pub fn new(lattice: &Lattice) -> Self {
        let periods: Vec<usize> = lattice.dims().iter().map(|&l| probe_period(l)).collect();
        let n_colors = periods.iter().product();
        Self { periods, n_colors }
    }

    pub fn n_colors(&self) -> usize {
        self.n_colors
    }

    pub fn periods(&self) -> &[usize] {
        &self.periods
    }

    /// Colour of a lattice site.
    pub fn color_of(&self, lattice: &Lattice, site: usize) -> usize {
        let mut color = 0;
        for mu in (0..lattice.ndim()).rev() {
            color = color * self.periods[mu] + lattice.coord(site, mu) % self.periods[mu];
        }
        color
    }

    /// Per-dimension residues of a colour.
    fn residues(&self, color: usize) -> Vec<usize> {
        let mut c = color;
        self.periods
            .iter()
            .map(|&p| {
                let r = c % p;
                c /= p;
                r
            })
            .collect()
    }

    /// Displacement from `site` to the unique site of colour `color` within distance one
    /// per dimension, if there is one.
    pub fn source_offset(&self, lattice: &Lattice, site: usize, color: usize) -> Option<Vec<isize>> {
        let residues = self.residues(color);
        let mut offset = Vec::with_capacity(lattice.ndim());
        for (mu, (&p, &r)) in self.periods.iter().zip(&residues).enumerate() {
            let l = lattice.dims()[mu] as isize;
            let x = lattice.coord(site, mu) as isize;
            let d = [0isize, 1, -1]
                .into_iter()
                .find(|&d| ((x + d).rem_euclid(l) as usize) % p == r)?;
            offset.push(d);
        }
        Some(offset)
    }
}

//! Periodic structured lattice geometry.
//!
//! Sites are numbered lexicographically with the first dimension running fastest.
//! Parity is the checkerboard colour `Σ x_μ mod 2`; each parity keeps its own
//! contiguous numbering so that single-parity fields can be stored densely.

use crate::error::MgError;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lattice {
    dims: Vec<usize>,
    strides: Vec<usize>,
    volume: usize,
    /// Index of each site within its own parity.
    cb_index: Vec<usize>,
    /// Sites of each parity in increasing order.
    parity_sites: [Vec<usize>; 2],
}

impl Lattice {
    pub fn new(dims: &[usize]) -> Result<Arc<Self>, MgError> {
        if dims.is_empty() {
            return Err(MgError::config("lattice needs at least one dimension"));
        }
        if let Some(mu) = dims.iter().position(|&l| l == 0) {
            return Err(MgError::config(format!("lattice extent in dimension {mu} is zero")));
        }
        let mut strides = Vec::with_capacity(dims.len());
        let mut volume = 1usize;
        for &l in dims {
            strides.push(volume);
            volume *= l;
        }
        let mut lattice = Lattice {
            dims: dims.to_vec(),
            strides,
            volume,
            cb_index: vec![0; volume],
            parity_sites: [Vec::new(), Vec::new()],
        };
        for site in 0..volume {
            let p = lattice.parity(site);
            lattice.cb_index[site] = lattice.parity_sites[p].len();
            lattice.parity_sites[p].push(site);
        }
        Ok(Arc::new(lattice))
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn volume(&self) -> usize {
        self.volume
    }

    /// Coordinate of `site` in dimension `mu`.
    #[inline]
    pub fn coord(&self, site: usize, mu: usize) -> usize {
        (site / self.strides[mu]) % self.dims[mu]
    }

    pub fn coords(&self, site: usize) -> Vec<usize> {
        (0..self.ndim()).map(|mu| self.coord(site, mu)).collect()
    }

    pub fn index(&self, coords: &[usize]) -> usize {
        coords
            .iter()
            .zip(&self.strides)
            .zip(&self.dims)
            .map(|((&x, &s), &l)| (x % l) * s)
            .sum()
    }

    #[inline]
    pub fn parity(&self, site: usize) -> usize {
        (0..self.ndim()).map(|mu| self.coord(site, mu)).sum::<usize>() % 2
    }

    /// Position of `site` within the list of sites sharing its parity.
    #[inline]
    pub fn cb_index(&self, site: usize) -> usize {
        self.cb_index[site]
    }

    pub fn parity_sites(&self, parity: usize) -> &[usize] {
        &self.parity_sites[parity]
    }

    /// Site reached from `site` by a periodic displacement.
    pub fn shift(&self, site: usize, offset: &[isize]) -> usize {
        let mut out = site;
        for (mu, &d) in offset.iter().enumerate() {
            if d == 0 {
                continue;
            }
            let l = self.dims[mu] as isize;
            let x = self.coord(site, mu) as isize;
            let y = (x + d).rem_euclid(l);
            out = out + (y as usize) * self.strides[mu] - (x as usize) * self.strides[mu];
        }
        out
    }

    /// Nearest neighbour of `site` in direction `mu`, forward or backward.
    pub fn neighbor(&self, site: usize, mu: usize, forward: bool) -> usize {
        let mut offset = vec![0isize; self.ndim()];
        offset[mu] = if forward { 1 } else { -1 };
        self.shift(site, &offset)
    }

    /// Reduce a displacement to its canonical representative: each component lies in
    /// `(-L/2, L/2]`, so extent 2 folds `-1` onto `+1` and extent 1 folds everything onto 0.
    pub fn canonical_offset(&self, offset: &[isize]) -> Vec<isize> {
        offset
            .iter()
            .zip(&self.dims)
            .map(|(&d, &l)| {
                let l = l as isize;
                let r = d.rem_euclid(l);
                if r > l / 2 { r - l } else { r }
            })
            .collect()
    }

    /// True when every extent is even, which makes the checkerboard decomposition consistent
    /// with periodic wrap-around.
    pub fn is_bipartite(&self) -> bool {
        self.dims.iter().all(|&l| l % 2 == 0)
    }

    /// Lattice obtained by aggregating blocks of `block` sites.
    pub fn coarsen(&self, block: &[usize]) -> Result<Arc<Lattice>, MgError> {
        if block.len() != self.ndim() {
            return Err(MgError::config(format!(
                "geometric block has {} dimensions, lattice has {}",
                block.len(),
                self.ndim()
            )));
        }
        let mut dims = Vec::with_capacity(self.ndim());
        for (mu, (&l, &b)) in self.dims.iter().zip(block).enumerate() {
            if b == 0 || l % b != 0 {
                return Err(MgError::config(format!(
                    "block size {b} does not divide lattice extent {l} in dimension {mu}"
                )));
            }
            dims.push(l / b);
        }
        Lattice::new(&dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_roundtrip_and_parity_split() {
        let lat = Lattice::new(&[4, 2, 6]).unwrap();
        assert_eq!(lat.volume(), 48);
        for site in 0..lat.volume() {
            assert_eq!(lat.index(&lat.coords(site)), site);
            let p = lat.parity(site);
            assert_eq!(lat.parity_sites(p)[lat.cb_index(site)], site);
        }
        assert_eq!(lat.parity_sites(0).len(), 24);
        assert_eq!(lat.parity_sites(1).len(), 24);
    }

    #[test]
    fn neighbors_wrap_periodically() {
        let lat = Lattice::new(&[4, 3]).unwrap();
        let site = lat.index(&[3, 0]);
        assert_eq!(lat.coords(lat.neighbor(site, 0, true)), vec![0, 0]);
        assert_eq!(lat.coords(lat.neighbor(site, 1, false)), vec![3, 2]);
    }

    #[test]
    fn canonical_offsets_fold_small_extents() {
        let lat = Lattice::new(&[1, 2, 5]).unwrap();
        assert_eq!(lat.canonical_offset(&[1, -1, -1]), vec![0, 1, -1]);
        assert_eq!(lat.canonical_offset(&[-1, 1, 4]), vec![0, 1, -1]);
    }

    #[test]
    fn coarsen_rejects_non_dividing_blocks() {
        let lat = Lattice::new(&[4, 6]).unwrap();
        assert_eq!(lat.coarsen(&[2, 3]).unwrap().dims(), &[2, 2]);
        assert!(matches!(lat.coarsen(&[3, 3]), Err(MgError::Config(_))));
        assert!(matches!(lat.coarsen(&[2]), Err(MgError::Config(_))));
    }
}

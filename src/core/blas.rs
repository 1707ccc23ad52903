//! Level-1 kernels on lattice fields.
//!
//! Reductions and updates run over the flat storage of a field, with optional Rayon
//! parallelism. Updates round the destination to its own precision afterwards, so a
//! reduced-precision field never holds more bits than its format allows.
//!
//! All kernels require both operands to share a layout (lattice, dof, subset).

use crate::core::field::LatticeField;
use num_complex::Complex64;
use num_traits::Zero;

#[inline]
fn check(x: &LatticeField, y: &LatticeField) {
    assert_eq!(x.len(), y.len(), "fields must have the same length");
    debug_assert!(
        x.param().same_layout(y.param()),
        "fields must share lattice, site content and subset"
    );
}

/// Squared 2-norm `‖x‖²`.
pub fn norm2(x: &LatticeField) -> f64 {
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        x.data()
            .par_iter()
            .map(|z| z.norm_sqr())
            .reduce(|| 0.0, |a, b| a + b)
    }
    #[cfg(not(feature = "rayon"))]
    {
        x.data().iter().map(|z| z.norm_sqr()).sum()
    }
}

/// Complex inner product `⟨x, y⟩ = Σ conj(x_i) y_i`.
pub fn cdot(x: &LatticeField, y: &LatticeField) -> Complex64 {
    check(x, y);
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        x.data()
            .par_iter()
            .zip(y.data().par_iter())
            .map(|(a, b)| a.conj() * b)
            .reduce(|| Complex64::zero(), |a, b| a + b)
    }
    #[cfg(not(feature = "rayon"))]
    {
        x.data()
            .iter()
            .zip(y.data())
            .map(|(a, b)| a.conj() * b)
            .fold(Complex64::zero(), |a, b| a + b)
    }
}

fn update<F>(x: &LatticeField, y: &mut LatticeField, f: F)
where
    F: Fn(Complex64, &mut Complex64) + Send + Sync,
{
    check(x, y);
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        y.data_mut()
            .par_iter_mut()
            .zip(x.data().par_iter())
            .for_each(|(yi, xi)| f(*xi, yi));
    }
    #[cfg(not(feature = "rayon"))]
    {
        y.data_mut()
            .iter_mut()
            .zip(x.data())
            .for_each(|(yi, xi)| f(*xi, yi));
    }
    y.round_to_precision();
}

/// `y += a x`
pub fn axpy(a: f64, x: &LatticeField, y: &mut LatticeField) {
    update(x, y, |xi, yi| *yi += xi * a);
}

/// `y += a x` with complex `a`.
pub fn caxpy(a: Complex64, x: &LatticeField, y: &mut LatticeField) {
    update(x, y, |xi, yi| *yi += a * xi);
}

/// `y = a x + b y`
pub fn axpby(a: f64, x: &LatticeField, b: f64, y: &mut LatticeField) {
    update(x, y, |xi, yi| *yi = xi * a + *yi * b);
}

/// `y = x + b y` with complex `b`.
pub fn cxpby(x: &LatticeField, b: Complex64, y: &mut LatticeField) {
    update(x, y, |xi, yi| *yi = xi + b * *yi);
}

/// `y += x`
pub fn xpy(x: &LatticeField, y: &mut LatticeField) {
    update(x, y, |xi, yi| *yi += xi);
}

/// `y = x - y`, returning `‖y‖²`.
pub fn xmy_norm(x: &LatticeField, y: &mut LatticeField) -> f64 {
    update(x, y, |xi, yi| *yi = xi - *yi);
    norm2(y)
}

/// `x *= a`
pub fn ax(a: f64, x: &mut LatticeField) {
    x.data_mut().iter_mut().for_each(|z| *z *= a);
    x.round_to_precision();
}

/// `x *= a` with complex `a`.
pub fn cax(a: Complex64, x: &mut LatticeField) {
    x.data_mut().iter_mut().for_each(|z| *z *= a);
    x.round_to_precision();
}

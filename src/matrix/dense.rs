//! Small complex dense kernels on top of Faer.
//!
//! Site blocks of stencil operators are `rows × cols` complex matrices stored row-major in
//! a flat slice. Factorizations go through the real embedding
//! `[[Re A, -Im A], [Im A, Re A]]`, solved with Faer's partial-pivoting LU.

use crate::error::MgError;
use faer::linalg::solvers::{PartialPivLu, SolveCore};
use faer::{Conj, Mat, MatMut};
use num_complex::Complex64;

/// `out += M x` for a row-major `rows × cols` block.
#[inline]
pub fn gemv_add(out: &mut [Complex64], m: &[Complex64], x: &[Complex64], rows: usize, cols: usize) {
    for (i, o) in out.iter_mut().enumerate().take(rows) {
        let row = &m[i * cols..(i + 1) * cols];
        *o += row.iter().zip(x).map(|(a, b)| a * b).sum::<Complex64>();
    }
}

/// `out += M† x` for a row-major `rows × cols` block; `out` has length `cols`.
#[inline]
pub fn gemv_dagger_add(
    out: &mut [Complex64],
    m: &[Complex64],
    x: &[Complex64],
    rows: usize,
    cols: usize,
) {
    for (i, &xi) in x.iter().enumerate().take(rows) {
        let row = &m[i * cols..(i + 1) * cols];
        for (o, a) in out.iter_mut().zip(row) {
            *o += a.conj() * xi;
        }
    }
}

/// Real embedding of a row-major complex `n × n` matrix.
pub fn real_embedding(a: &[Complex64], n: usize) -> Mat<f64> {
    Mat::from_fn(2 * n, 2 * n, |i, j| {
        let z = a[(i % n) * n + (j % n)];
        match (i < n, j < n) {
            (true, true) | (false, false) => z.re,
            (true, false) => -z.im,
            (false, true) => z.im,
        }
    })
}

/// LU factorization of a complex square matrix.
pub struct ComplexLu {
    n: usize,
    factor: PartialPivLu<f64>,
}

impl ComplexLu {
    /// Factor a row-major complex `n × n` matrix.
    pub fn new(a: &[Complex64], n: usize) -> Result<Self, MgError> {
        if a.len() != n * n {
            return Err(MgError::DimensionMismatch(format!(
                "expected {}x{} matrix, got {} entries",
                n,
                n,
                a.len()
            )));
        }
        if a.iter().any(|z| !z.re.is_finite() || !z.im.is_finite()) {
            return Err(MgError::FactorError("matrix has non-finite entries".into()));
        }
        let embedded = real_embedding(a, n);
        let factor = PartialPivLu::new(embedded.as_ref());
        Ok(Self { n, factor })
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    /// Overwrite `x` with `A⁻¹ x`.
    pub fn solve_in_place(&self, x: &mut [Complex64]) -> Result<(), MgError> {
        let n = self.n;
        let mut buf: Vec<f64> = x.iter().map(|z| z.re).chain(x.iter().map(|z| z.im)).collect();
        let x_mat = MatMut::from_column_major_slice_mut(&mut buf, 2 * n, 1);
        self.factor.solve_in_place_with_conj(Conj::No, x_mat);
        if buf.iter().any(|v| !v.is_finite()) {
            return Err(MgError::FactorError("singular matrix".into()));
        }
        for (i, z) in x.iter_mut().enumerate() {
            *z = Complex64::new(buf[i], buf[n + i]);
        }
        Ok(())
    }

    /// Row-major inverse.
    pub fn inverse(&self) -> Result<Vec<Complex64>, MgError> {
        let n = self.n;
        let mut buf = vec![0.0f64; 2 * n * n];
        for j in 0..n {
            buf[j * 2 * n + j] = 1.0;
        }
        let x_mat = MatMut::from_column_major_slice_mut(&mut buf, 2 * n, n);
        self.factor.solve_in_place_with_conj(Conj::No, x_mat);
        if buf.iter().any(|v| !v.is_finite()) {
            return Err(MgError::FactorError("singular matrix".into()));
        }
        let mut inv = vec![Complex64::new(0.0, 0.0); n * n];
        for j in 0..n {
            for i in 0..n {
                inv[i * n + j] = Complex64::new(buf[j * 2 * n + i], buf[j * 2 * n + n + i]);
            }
        }
        Ok(inv)
    }
}

/// Inverse of a row-major complex `n × n` block.
pub fn invert_block(a: &[Complex64], n: usize) -> Result<Vec<Complex64>, MgError> {
    ComplexLu::new(a, n)?.inverse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn inverse_of_complex_block() {
        let a = vec![c(2.0, 1.0), c(0.5, -0.3), c(-1.0, 0.2), c(3.0, -0.5)];
        let inv = invert_block(&a, 2).unwrap();
        for i in 0..2 {
            for j in 0..2 {
                let mut s = c(0.0, 0.0);
                for k in 0..2 {
                    s += a[i * 2 + k] * inv[k * 2 + j];
                }
                let expect = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(s.re, expect, epsilon = 1e-12);
                assert_relative_eq!(s.im, 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn solve_matches_gemv() {
        let a = vec![c(4.0, 0.0), c(1.0, 1.0), c(1.0, -1.0), c(3.0, 0.0)];
        let x = vec![c(1.0, 2.0), c(-0.5, 0.25)];
        let mut b = vec![c(0.0, 0.0); 2];
        gemv_add(&mut b, &a, &x, 2, 2);
        let lu = ComplexLu::new(&a, 2).unwrap();
        lu.solve_in_place(&mut b).unwrap();
        for (bi, xi) in b.iter().zip(&x) {
            assert_relative_eq!(bi.re, xi.re, epsilon = 1e-12);
            assert_relative_eq!(bi.im, xi.im, epsilon = 1e-12);
        }
    }

    fn tridiagonal(n: usize) -> Vec<Complex64> {
        let mut a = vec![c(0.0, 0.0); n * n];
        for i in 0..n {
            a[i * n + i] = c(4.0, 0.5);
            if i + 1 < n {
                a[i * n + i + 1] = c(-1.0, 0.25);
                a[(i + 1) * n + i] = c(-1.0, -0.25);
            }
        }
        a
    }

    #[test]
    fn factors_and_inverts_larger_blocks() {
        for n in [8, 16, 32] {
            let a = tridiagonal(n);
            let x: Vec<Complex64> = (0..n).map(|i| c(i as f64, 1.0 - i as f64 * 0.5)).collect();
            let mut b = vec![c(0.0, 0.0); n];
            gemv_add(&mut b, &a, &x, n, n);
            let lu = ComplexLu::new(&a, n).unwrap();
            lu.solve_in_place(&mut b).unwrap();
            for (bi, xi) in b.iter().zip(&x) {
                assert_relative_eq!(bi.re, xi.re, epsilon = 1e-10);
                assert_relative_eq!(bi.im, xi.im, epsilon = 1e-10);
            }

            let inv = lu.inverse().unwrap();
            for i in 0..n {
                for j in 0..n {
                    let s: Complex64 = (0..n).map(|k| a[i * n + k] * inv[k * n + j]).sum();
                    let expect = if i == j { 1.0 } else { 0.0 };
                    assert_relative_eq!(s.re, expect, epsilon = 1e-10);
                    assert_relative_eq!(s.im, 0.0, epsilon = 1e-10);
                }
            }
        }
    }

    #[test]
    fn dagger_gemv_is_adjoint() {
        let m = vec![c(1.0, 2.0), c(0.0, -1.0), c(3.0, 0.5), c(-2.0, 1.0), c(0.5, 0.5), c(1.0, 0.0)];
        // 2 x 3 block
        let x = vec![c(1.0, -1.0), c(0.5, 2.0), c(-1.0, 0.0)];
        let y = vec![c(0.3, 0.7), c(-1.5, 0.2)];
        let mut mx = vec![c(0.0, 0.0); 2];
        gemv_add(&mut mx, &m, &x, 2, 3);
        let mut mdy = vec![c(0.0, 0.0); 3];
        gemv_dagger_add(&mut mdy, &m, &y, 2, 3);
        let lhs: Complex64 = y.iter().zip(&mx).map(|(a, b)| a.conj() * b).sum();
        let rhs: Complex64 = mdy.iter().zip(&x).map(|(a, b)| a.conj() * b).sum();
        assert_relative_eq!(lhs.re, rhs.re, epsilon = 1e-12);
        assert_relative_eq!(lhs.im, rhs.im, epsilon = 1e-12);
    }
}

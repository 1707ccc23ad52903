//! Working precision of fields and operators.
//!
//! All storage is `Complex64`; a reduced precision is emulated by rounding every value
//! written into a field (or produced by an operator) to the mantissa width of the target
//! format. This keeps the hierarchy's mixed-precision bookkeeping explicit without
//! duplicating every kernel per scalar type.

use num_complex::Complex64;
use std::fmt;

/// Floating-point format used for a field or an operator role.
///
/// Ordered from least to most precise, so `min` picks the weaker of two precisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Precision {
    Quarter,
    Half,
    Single,
    #[default]
    Double,
}

impl Precision {
    /// Number of explicitly stored mantissa bits.
    pub fn mantissa_bits(self) -> u32 {
        match self {
            Precision::Quarter => 6,
            Precision::Half => 10,
            Precision::Single => 23,
            Precision::Double => 52,
        }
    }

    /// Round a real value to this precision.
    #[inline]
    pub fn round(self, x: f64) -> f64 {
        match self {
            Precision::Double => x,
            Precision::Single => x as f32 as f64,
            Precision::Half | Precision::Quarter => quantize(x, self.mantissa_bits()),
        }
    }

    /// Round both components of a complex value to this precision.
    #[inline]
    pub fn round_complex(self, z: Complex64) -> Complex64 {
        Complex64::new(self.round(z.re), self.round(z.im))
    }

    /// Relative deviation accepted by hierarchy verification at this precision.
    pub fn tolerance(self) -> f64 {
        match self {
            Precision::Quarter | Precision::Half => 5e-2,
            Precision::Single => 1e-3,
            Precision::Double => 1e-8,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Precision::Quarter => "quarter",
            Precision::Half => "half",
            Precision::Single => "single",
            Precision::Double => "double",
        };
        f.write_str(name)
    }
}

fn quantize(x: f64, bits: u32) -> f64 {
    if x == 0.0 || !x.is_finite() {
        return x;
    }
    let exponent = x.abs().log2().floor() as i32;
    let scale = 2f64.powi(bits as i32 - exponent);
    (x * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_picks_weaker_precision() {
        assert_eq!(Precision::Double.min(Precision::Half), Precision::Half);
        assert_eq!(Precision::Single.max(Precision::Quarter), Precision::Single);
    }

    #[test]
    fn rounding_error_scales_with_mantissa() {
        let x = std::f64::consts::PI;
        assert_eq!(Precision::Double.round(x), x);
        let single = (Precision::Single.round(x) - x).abs() / x;
        let half = (Precision::Half.round(x) - x).abs() / x;
        let quarter = (Precision::Quarter.round(x) - x).abs() / x;
        assert!(single < 1e-7);
        assert!(half < 2f64.powi(-10));
        assert!(quarter < 2f64.powi(-6));
        assert!(quarter >= half);
    }

    #[test]
    fn zero_is_preserved() {
        assert_eq!(Precision::Quarter.round(0.0), 0.0);
        assert_eq!(Precision::Half.round(-0.0), 0.0);
    }
}

//! Window functions used for FIR design

use crate::flt;
use crate::numbers::*;

/// Modified Bessel function of the first kind of order zero
pub fn bessel_i0<Flt: Float>(x: Flt) -> Flt {
    let base = x * x / flt!(4);
    let mut addend = flt!(1);
    let mut sum = flt!(1);
    for i in 1.. {
        addend *= base / flt!(i * i);
        let old = sum;
        sum += addend;
        if sum == old || !sum.is_finite() {
            break;
        }
    }
    sum
}

/// Window function
pub trait Window {
    /// Value at position `x` (where `x` ranges from `-1.0` to `1.0`),
    /// normalized to `1.0` at `x == 0.0`
    fn value_at(&self, x: f64) -> f64;
}

/// Kaiser window
#[derive(Clone, Debug)]
pub struct Kaiser {
    beta: f64,
    peak: f64,
}

impl Window for Kaiser {
    fn value_at(&self, x: f64) -> f64 {
        if !(-1.0..=1.0).contains(&x) {
            return 0.0;
        }
        bessel_i0(self.beta * (1.0 - x * x).sqrt()) / self.peak
    }
}

impl Kaiser {
    /// Kaiser window with given `beta` parameter
    pub fn with_beta(beta: f64) -> Self {
        Self {
            beta,
            peak: bessel_i0(beta),
        }
    }
    /// Kaiser window with first null at `n` bins beside main lobe
    ///
    /// `n` must be `>= 1.0`.
    pub fn with_null_at_bin(n: f64) -> Self {
        Self::with_beta((n * n - 1.0).max(0.0).sqrt() * std::f64::consts::PI)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::assert_approx;
    #[test]
    fn test_bessel_i0() {
        assert_eq!(bessel_i0(0.0), 1.0);
        assert_approx(bessel_i0(0.5), 1.06348337074132);
        assert_approx(bessel_i0(1.23), 1.41552757215846);
        assert_eq!(bessel_i0(1000.0), f64::INFINITY);
    }
    #[test]
    fn test_kaiser_normalized() {
        let window = Kaiser::with_null_at_bin(3.0);
        assert_approx(window.value_at(0.0), 1.0);
        assert!(window.value_at(0.9) < window.value_at(0.5));
        assert_approx(window.value_at(-0.5), window.value_at(0.5));
        assert_eq!(window.value_at(1.5), 0.0);
    }
}

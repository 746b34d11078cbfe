//! Generic floats, complex numbers, and 16-bit sample conversion
//!
//! This module re-exports [`num::Complex`] as [`Complex`] and provides a
//! [`Float`] trait, which is implemented by [`f32`] and [`f64`].
//! Audio and I/Q data is carried as floats normalized to `-1.0..=1.0`; the
//! codec and the wire formats use signed 16-bit integers, see [`to_i16`] and
//! [`from_i16`].

use rustfft::FftNum;

pub use num::Complex;

/// Full scale of a signed 16-bit sample
pub const FULL_SCALE: f64 = 32767.0;

/// Trait implemented for [`f32`] and [`f64`]
///
/// Used as bound on the filter design and windowing functions, which work
/// with single and double precision.
pub trait Float
where
    Self: 'static + Send + Sync,
    Self: num::traits::Float,
    Self: num::traits::FloatConst,
    Self: num::traits::NumAssignOps,
    Self: FftNum,
{
}
impl<T> Float for T
where
    T: 'static + Send + Sync,
    T: num::traits::Float,
    T: num::traits::FloatConst,
    T: num::traits::NumAssignOps,
    T: FftNum,
{
}

/// Macro to convert number into a generic [`Float`] type, which must be in
/// scope as "`Flt`"
///
/// # Example
///
/// ```
/// use txcore::{flt, numbers::Float};
///
/// fn generic_double<Flt: Float>(arg: Flt) -> Flt {
///     arg * flt!(2)
/// }
/// ```
#[macro_export]
macro_rules! flt {
    ($x:expr) => {
        Flt::from($x).expect("could not convert number into float")
    };
}

/// Convert a normalized sample to a saturated signed 16-bit value
pub fn to_i16(x: f64) -> i16 {
    let scaled = (x * FULL_SCALE).round();
    if scaled.is_nan() {
        0
    } else {
        scaled.clamp(i16::MIN as f64, i16::MAX as f64) as i16
    }
}

/// Convert a signed 16-bit value to a normalized sample
pub fn from_i16(x: i16) -> f64 {
    x as f64 / FULL_SCALE
}

/// Convert decibels to a linear amplitude factor
pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::assert_approx;
    #[test]
    fn test_generic_float_f32() {
        fn inner<Flt: Float>(x: Flt) -> Flt {
            flt!(2.0) * x
        }
        assert_eq!(inner(3.5f32), 7.0f32);
    }
    #[test]
    fn test_i16_saturates() {
        assert_eq!(to_i16(0.0), 0);
        assert_eq!(to_i16(1.0), 32767);
        assert_eq!(to_i16(2.5), 32767);
        assert_eq!(to_i16(-3.0), -32768);
        assert_eq!(to_i16(f64::NAN), 0);
        assert!((from_i16(to_i16(0.25)) - 0.25).abs() <= 1.0 / FULL_SCALE);
    }
    #[test]
    fn test_db_to_linear() {
        assert_approx(db_to_linear(0.0), 1.0);
        assert_approx(db_to_linear(20.0), 10.0);
        assert_approx(db_to_linear(-6.0), 0.501187233627);
    }
}

//! Filter primitives used by the transmit pipeline
//!
//! These are small synchronous building blocks: [`fir::Fir`] filters that
//! can be retuned in place and integer-ratio [`resample::RateConverter`]s.

pub mod fir;
pub mod resample;
pub mod window;

use num::Zero;

use std::ops::{AddAssign, Mul};

/// Sample types the rate converters operate on (`f64` or `Complex<f64>`)
pub trait Sample: Copy + Zero + AddAssign + Mul<f64, Output = Self> {}
impl<T> Sample for T where T: Copy + Zero + AddAssign + Mul<f64, Output = T> {}

//! FIR filters designed by frequency sampling
//!
//! The impulse response is obtained the same way for every filter: the
//! desired frequency response is sampled at the DFT bins, transformed with an
//! inverse FFT, centered, and shaped with a [`Kaiser`] window.
//! Filters can be [retuned] in place; the tap buffer and the FFT plan are
//! allocated once when the filter is created.
//!
//! [retuned]: Fir::retune

use super::window::{Kaiser, Window};
use crate::numbers::*;

use rustfft::{Fft, FftPlanner};

use std::sync::Arc;

/// Frequency range passed by a [`Fir`] filter
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Passband {
    /// Pass `low..=high` hertz at positive *and* negative frequencies
    ///
    /// The resulting taps are real.
    Real {
        /// Lower edge in hertz
        low: f64,
        /// Upper edge in hertz
        high: f64,
    },
    /// Pass the signed frequency range `low..=high` only
    ///
    /// Used for single sideband generation, e.g. `-2700.0..=-300.0` for the
    /// lower sideband.
    Complex {
        /// Lower edge in hertz (signed)
        low: f64,
        /// Upper edge in hertz (signed)
        high: f64,
    },
}

impl Passband {
    fn passes(&self, freq: f64) -> bool {
        match *self {
            Passband::Real { low, high } => (low..=high).contains(&freq.abs()),
            Passband::Complex { low, high } => (low..=high).contains(&freq),
        }
    }
}

/// Fill `taps` with the windowed impulse response for `passband`
///
/// `taps.len()` determines the filter length and should be odd.
/// `scratch` must have the same length as `taps`.
fn design(
    taps: &mut [Complex<f64>],
    ifft: &dyn Fft<f64>,
    sample_rate: f64,
    passband: Passband,
    window: &dyn Window,
) {
    let n = taps.len();
    let n_flt = n as f64;
    let freq_step = sample_rate / n_flt;
    for (bin, tap) in taps.iter_mut().enumerate() {
        let freq = if bin <= n / 2 {
            bin as f64 * freq_step
        } else {
            (bin as f64 - n_flt) * freq_step
        };
        *tap = if passband.passes(freq) {
            Complex::from(1.0 / n_flt)
        } else {
            Complex::from(0.0)
        };
    }
    ifft.process(taps);
    taps.rotate_right(n / 2);
    for (i, tap) in taps.iter_mut().enumerate() {
        *tap *= window.value_at(2.0 * (i as f64 + 0.5) / n_flt - 1.0);
    }
}

/// Real lowpass impulse response with `len` taps (rounded up to odd)
///
/// Used by the rate converters; the DC gain is `1.0`.
pub fn lowpass_taps(len: usize, sample_rate: f64, cutoff: f64) -> Vec<f64> {
    let len = len.max(1) | 1;
    let ifft = FftPlanner::<f64>::new().plan_fft_inverse(len);
    let mut taps = vec![Complex::from(0.0); len];
    design(
        &mut taps,
        ifft.as_ref(),
        sample_rate,
        Passband::Real {
            low: 0.0,
            high: cutoff,
        },
        &Kaiser::with_null_at_bin(3.0),
    );
    let dc: f64 = taps.iter().map(|tap| tap.re).sum();
    taps.into_iter().map(|tap| tap.re / dc).collect()
}

/// Complex FIR filter with a fixed number of taps
pub struct Fir {
    sample_rate: f64,
    passband: Passband,
    taps: Vec<Complex<f64>>,
    history: Vec<Complex<f64>>,
    pos: usize,
    window: Kaiser,
    ifft: Arc<dyn Fft<f64>>,
}

impl Fir {
    /// Create filter with `len` taps for signals sampled at `sample_rate`
    pub fn new(len: usize, sample_rate: f64, passband: Passband) -> Self {
        let len = len.max(1) | 1;
        let ifft = FftPlanner::<f64>::new().plan_fft_inverse(len);
        let mut fir = Self {
            sample_rate,
            passband,
            taps: vec![Complex::from(0.0); len],
            history: vec![Complex::from(0.0); len],
            pos: 0,
            window: Kaiser::with_null_at_bin(3.0),
            ifft,
        };
        fir.redesign();
        fir
    }
    fn redesign(&mut self) {
        design(
            &mut self.taps,
            self.ifft.as_ref(),
            self.sample_rate,
            self.passband,
            &self.window,
        );
    }
    /// Current passband
    pub fn passband(&self) -> Passband {
        self.passband
    }
    /// Number of taps
    pub fn len(&self) -> usize {
        self.taps.len()
    }
    /// Change the passband, reusing the existing buffers
    ///
    /// The delay line is kept, so the output stays continuous.
    pub fn retune(&mut self, passband: Passband) {
        if passband != self.passband {
            self.passband = passband;
            self.redesign();
        }
    }
    /// Clear the delay line
    pub fn reset(&mut self) {
        self.history.fill(Complex::from(0.0));
        self.pos = 0;
    }
    /// Filter one complex sample
    pub fn process(&mut self, sample: Complex<f64>) -> Complex<f64> {
        let n = self.taps.len();
        self.history[self.pos] = sample;
        self.pos += 1;
        if self.pos == n {
            self.pos = 0;
        }
        // oldest sample sits at `pos`
        let mut sum = Complex::from(0.0);
        let mut taps = self.taps.iter().rev();
        for x in self.history[self.pos..].iter().chain(&self.history[..self.pos]) {
            if let Some(tap) = taps.next() {
                sum += x * tap;
            }
        }
        sum
    }
    /// Filter one real sample, keeping the real part of the result
    pub fn process_real(&mut self, sample: f64) -> f64 {
        self.process(Complex::from(sample)).re
    }
}

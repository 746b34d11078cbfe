//! Integer-ratio sample-rate conversion

use super::fir::lowpass_taps;
use super::Sample;
use crate::error::ConfigError;

/// Number of taps per unit of the conversion ratio
const TAPS_PER_RATIO: usize = 16;

/// Convolve `taps` with `history`, the oldest sample sitting at `pos`
fn convolve<T: Sample>(taps: &[f64], history: &[T], pos: usize) -> T {
    let mut sum = T::zero();
    let mut taps = taps.iter().rev();
    for &x in history[pos..].iter().chain(&history[..pos]) {
        if let Some(&tap) = taps.next() {
            sum += x * tap;
        }
    }
    sum
}

/// Reduce sample rate by an integer factor
pub struct Decimator<T> {
    factor: usize,
    taps: Vec<f64>,
    history: Vec<T>,
    pos: usize,
    phase: usize,
}

impl<T: Sample> Decimator<T> {
    /// Create decimator from `input_rate` to `input_rate / factor`
    pub fn new(factor: usize, input_rate: f64) -> Self {
        let factor = factor.max(1);
        let output_rate = input_rate / factor as f64;
        let taps = lowpass_taps(TAPS_PER_RATIO * factor, input_rate, output_rate * 0.45);
        let history = vec![T::zero(); taps.len()];
        Self {
            factor,
            taps,
            history,
            pos: 0,
            phase: 0,
        }
    }
    /// Append decimated samples for `input` to `output`
    pub fn process(&mut self, input: &[T], output: &mut Vec<T>) {
        for &sample in input {
            self.history[self.pos] = sample;
            self.pos += 1;
            if self.pos == self.history.len() {
                self.pos = 0;
            }
            self.phase += 1;
            if self.phase == self.factor {
                self.phase = 0;
                output.push(convolve(&self.taps, &self.history, self.pos));
            }
        }
    }
    /// Clear internal state
    pub fn reset(&mut self) {
        self.history.fill(T::zero());
        self.pos = 0;
        self.phase = 0;
    }
}

/// Increase sample rate by an integer factor
pub struct Interpolator<T> {
    factor: usize,
    taps: Vec<f64>,
    history: Vec<T>,
    pos: usize,
}

impl<T: Sample> Interpolator<T> {
    /// Create interpolator from `input_rate` to `input_rate * factor`
    pub fn new(factor: usize, input_rate: f64) -> Self {
        let factor = factor.max(1);
        let output_rate = input_rate * factor as f64;
        let taps = lowpass_taps(TAPS_PER_RATIO * factor, output_rate, input_rate * 0.45);
        let history = vec![T::zero(); taps.len()];
        Self {
            factor,
            taps,
            history,
            pos: 0,
        }
    }
    /// Append `input.len() * factor` samples to `output`
    pub fn process(&mut self, input: &[T], output: &mut Vec<T>) {
        let gain = self.factor as f64;
        for &sample in input {
            for k in 0..self.factor {
                self.history[self.pos] = if k == 0 { sample * gain } else { T::zero() };
                self.pos += 1;
                if self.pos == self.history.len() {
                    self.pos = 0;
                }
                output.push(convolve(&self.taps, &self.history, self.pos));
            }
        }
    }
    /// Clear internal state
    pub fn reset(&mut self) {
        self.history.fill(T::zero());
        self.pos = 0;
    }
}

/// Sample-rate converter for a fixed integer ratio (in either direction)
pub enum RateConverter<T> {
    /// Rates are equal
    Identity,
    /// Output rate is an integer fraction of the input rate
    Down(Decimator<T>),
    /// Output rate is an integer multiple of the input rate
    Up(Interpolator<T>),
}

impl<T: Sample> RateConverter<T> {
    /// Create converter, failing if the rates have no integer ratio
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self, ConfigError> {
        if input_rate == 0 || output_rate == 0 {
            return Err(ConfigError::RateRatio {
                input: input_rate,
                output: output_rate,
            });
        }
        if input_rate == output_rate {
            Ok(RateConverter::Identity)
        } else if input_rate % output_rate == 0 {
            Ok(RateConverter::Down(Decimator::new(
                (input_rate / output_rate) as usize,
                input_rate as f64,
            )))
        } else if output_rate % input_rate == 0 {
            Ok(RateConverter::Up(Interpolator::new(
                (output_rate / input_rate) as usize,
                input_rate as f64,
            )))
        } else {
            Err(ConfigError::RateRatio {
                input: input_rate,
                output: output_rate,
            })
        }
    }
    /// Append converted samples to `output`
    pub fn process(&mut self, input: &[T], output: &mut Vec<T>) {
        match self {
            RateConverter::Identity => output.extend_from_slice(input),
            RateConverter::Down(decimator) => decimator.process(input, output),
            RateConverter::Up(interpolator) => interpolator.process(input, output),
        }
    }
    /// Clear internal state
    pub fn reset(&mut self) {
        match self {
            RateConverter::Identity => (),
            RateConverter::Down(decimator) => decimator.reset(),
            RateConverter::Up(interpolator) => interpolator.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numbers::Complex;
    #[test]
    fn test_rejects_fractional_ratio() {
        assert!(RateConverter::<f64>::new(48000, 44100).is_err());
        assert!(RateConverter::<f64>::new(0, 8000).is_err());
        assert!(matches!(
            RateConverter::<f64>::new(8000, 8000),
            Ok(RateConverter::Identity)
        ));
    }
    #[test]
    fn test_output_counts() {
        let mut down = RateConverter::<f64>::new(48000, 8000).unwrap();
        let mut up = RateConverter::<Complex<f64>>::new(8000, 48000).unwrap();
        let mut out = Vec::new();
        down.process(&[0.5; 600], &mut out);
        assert_eq!(out.len(), 100);
        let mut out = Vec::new();
        up.process(&[Complex::from(0.5); 100], &mut out);
        assert_eq!(out.len(), 600);
    }
    #[test]
    fn test_dc_passes() {
        let mut down = Decimator::<f64>::new(6, 48000.0);
        let mut out = Vec::new();
        down.process(&[0.5; 4800], &mut out);
        assert!((out[out.len() - 1] - 0.5).abs() < 1e-3);
        let mut up = Interpolator::<f64>::new(6, 8000.0);
        let mut out = Vec::new();
        up.process(&[0.5; 800], &mut out);
        assert!((out[out.len() - 1] - 0.5).abs() < 1e-2);
    }
    #[test]
    fn test_reset_clears_history() {
        for (input_rate, output_rate) in [(48000, 8000), (8000, 48000)] {
            let mut conv = RateConverter::<f64>::new(input_rate, output_rate).unwrap();
            let mut out = Vec::new();
            conv.process(&[1.0; 600], &mut out);
            assert!(out.iter().any(|&x| x.abs() > 0.1));
            conv.reset();
            out.clear();
            conv.process(&[0.0; 600], &mut out);
            assert!(out.iter().all(|&x| x == 0.0));
        }
    }
}

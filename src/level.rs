//! Level primitives: compression curve, peak rounding, AGC, preemphasis,
//! and VOX
//!
//! All primitives work on normalized samples where `1.0` is full scale.

use crate::error::ConfigError;
use crate::numbers::{to_i16, Complex};

/// Soft quadratic compression curve
///
/// The curve has three regions: it is linear up to the knee, follows a
/// quadratic between knee and saturation point, and is flat (the hard
/// ceiling) beyond the saturation point. Value and slope are continuous at
/// both breakpoints and the output magnitude never decreases with the input
/// magnitude.
#[derive(Clone, Debug)]
pub struct SoftCompressor {
    level: f64,
    knee: f64,
    saturation: f64,
}

impl SoftCompressor {
    /// Knee of the default curve
    pub const KNEE: f64 = 0.5;
    /// Saturation point of the default curve
    pub const SATURATION: f64 = 1.5;

    /// Curve with ceiling `1.0`, applied after multiplying by `level`
    pub fn new(level: f64) -> Self {
        Self {
            level,
            knee: Self::KNEE,
            saturation: Self::SATURATION,
        }
    }
    /// Curve with custom breakpoints (`0.0 < knee < saturation`)
    ///
    /// The ceiling is `(knee + saturation) / 2`.
    pub fn with_breakpoints(level: f64, knee: f64, saturation: f64) -> Result<Self, ConfigError> {
        if !(knee > 0.0 && knee < saturation && saturation.is_finite()) {
            return Err(ConfigError::OutOfRange {
                name: "knee",
                value: knee,
            });
        }
        Ok(Self {
            level,
            knee,
            saturation,
        })
    }
    /// Set the linear pre-gain
    pub fn set_level(&mut self, level: f64) {
        self.level = level;
    }
    /// Highest output magnitude
    pub fn ceiling(&self) -> f64 {
        (self.knee + self.saturation) / 2.0
    }
    /// Apply curve to a magnitude (without pre-gain)
    pub fn curve(&self, magnitude: f64) -> f64 {
        let (a, b) = (self.knee, self.saturation);
        if magnitude <= a {
            magnitude
        } else if magnitude < b {
            let over = magnitude - a;
            magnitude - over * over / (2.0 * (b - a))
        } else {
            self.ceiling()
        }
    }
    /// Compress one sample, keeping its sign
    pub fn process(&self, sample: f64) -> f64 {
        let x = sample * self.level;
        self.curve(x.abs()).copysign(x)
    }
}

/// Look-back peak rounding
///
/// Tracks the largest magnitude within a sliding window and divides the
/// signal by a smoothed version of it whenever it exceeds `1.0`. The divisor
/// follows rising peaks fast and falls back slowly.
#[derive(Clone, Debug)]
pub struct PeakSmoother {
    window: Vec<f64>,
    pos: usize,
    max: f64,
    divisor: f64,
}

impl PeakSmoother {
    const ATTACK: f64 = 0.2;
    const RELEASE: f64 = 0.002;

    /// Window of `len` samples, e.g. 30 ms
    pub fn new(len: usize) -> Self {
        Self {
            window: vec![0.0; len.max(1)],
            pos: 0,
            max: 0.0,
            divisor: 1.0,
        }
    }
    /// Forget all tracked peaks
    pub fn reset(&mut self) {
        self.window.fill(0.0);
        self.pos = 0;
        self.max = 0.0;
        self.divisor = 1.0;
    }
    /// Largest magnitude in the window
    pub fn window_max(&self) -> f64 {
        self.max
    }
    fn track(&mut self, magnitude: f64) -> f64 {
        let evicted = self.window[self.pos];
        self.window[self.pos] = magnitude;
        self.pos += 1;
        if self.pos == self.window.len() {
            self.pos = 0;
        }
        if magnitude >= self.max {
            self.max = magnitude;
        } else if evicted >= self.max {
            self.max = self.window.iter().copied().fold(0.0, f64::max);
        }
        let target = self.max.max(1.0);
        let rate = if target > self.divisor {
            Self::ATTACK
        } else {
            Self::RELEASE
        };
        self.divisor += (target - self.divisor) * rate;
        self.divisor
    }
    /// Process one sample
    pub fn process(&mut self, sample: f64) -> f64 {
        sample / self.track(sample.abs())
    }
    /// Process one complex sample, tracking its magnitude
    pub fn process_complex(&mut self, sample: Complex<f64>) -> Complex<f64> {
        sample / self.track(sample.norm())
    }
}

/// Peak-normalizing AGC with separate attack and release time constants
#[derive(Clone, Debug)]
pub struct Agc {
    attack: f64,
    release: f64,
    floor: f64,
    envelope: f64,
}

impl Agc {
    /// Attack time constant in seconds
    pub const ATTACK_SECS: f64 = 0.005;
    /// Release time constant in seconds
    pub const RELEASE_SECS: f64 = 3.0;

    /// AGC for `sample_rate` whose envelope never drops below `floor`
    pub fn new(sample_rate: f64, floor: f64) -> Self {
        Self {
            attack: 1.0 - (-1.0 / (Self::ATTACK_SECS * sample_rate)).exp(),
            release: 1.0 - (-1.0 / (Self::RELEASE_SECS * sample_rate)).exp(),
            floor,
            envelope: floor,
        }
    }
    /// Change the envelope floor
    pub fn set_floor(&mut self, floor: f64) {
        self.floor = floor;
        self.envelope = self.envelope.max(floor);
    }
    /// Current envelope
    pub fn envelope(&self) -> f64 {
        self.envelope
    }
    /// Restart from the floor
    pub fn reset(&mut self) {
        self.envelope = self.floor;
    }
    /// Normalize one sample
    pub fn process(&mut self, sample: f64) -> f64 {
        let magnitude = sample.abs();
        let rate = if magnitude > self.envelope {
            self.attack
        } else {
            self.release
        };
        self.envelope += (magnitude - self.envelope) * rate;
        self.envelope = self.envelope.max(self.floor);
        sample / self.envelope
    }
}

/// Single-pole preemphasis `y[n] = x[n] - c * x[n-1]`
#[derive(Clone, Debug, Default)]
pub struct Preemphasis {
    coefficient: f64,
    previous: f64,
}

impl Preemphasis {
    /// Preemphasis with coefficient `0.0..=1.0`
    pub fn new(coefficient: f64) -> Self {
        Self {
            coefficient,
            previous: 0.0,
        }
    }
    /// Change the coefficient
    pub fn set_coefficient(&mut self, coefficient: f64) {
        self.coefficient = coefficient;
    }
    /// Process one sample
    pub fn process(&mut self, sample: f64) -> f64 {
        let out = sample - self.coefficient * self.previous;
        self.previous = sample;
        out
    }
}

/// Voice-operated transmit switch
#[derive(Clone, Debug)]
pub struct Vox {
    level: i16,
    hang: usize,
    remaining: usize,
}

impl Vox {
    /// Key when a sample reaches `level`, hold for `hang` samples
    pub fn new(level: i16, hang: usize) -> Self {
        Self {
            level,
            hang,
            remaining: 0,
        }
    }
    /// Update with a block, returning whether the transmitter is keyed
    pub fn process(&mut self, block: &[f64]) -> bool {
        let peak = block
            .iter()
            .map(|&x| to_i16(x.abs()))
            .max()
            .unwrap_or(0);
        if peak >= self.level {
            self.remaining = self.hang.max(1);
        } else {
            self.remaining = self.remaining.saturating_sub(block.len());
        }
        self.remaining > 0
    }
    /// Transmitter keyed
    pub fn is_keyed(&self) -> bool {
        self.remaining > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::assert_approx;
    #[test]
    fn test_compression_continuous_at_breakpoints() {
        let comp = SoftCompressor::new(1.0);
        let eps = 1e-9;
        for point in [SoftCompressor::KNEE, SoftCompressor::SATURATION] {
            let below = comp.curve(point - eps);
            let above = comp.curve(point + eps);
            assert!((above - below).abs() < 1e-8);
        }
        assert_approx(comp.curve(5.0), comp.ceiling());
        assert_approx(comp.ceiling(), 1.0);
    }
    #[test]
    fn test_compression_monotonic() {
        let comp = SoftCompressor::new(1.0);
        let mut previous = 0.0;
        for i in 0..=3000 {
            let out = comp.curve(i as f64 / 1000.0);
            assert!(out >= previous);
            previous = out;
        }
    }
    #[test]
    fn test_custom_breakpoints() {
        let comp = SoftCompressor::with_breakpoints(1.0, 0.25, 0.75).unwrap();
        assert_approx(comp.ceiling(), 0.5);
        assert_approx(comp.curve(0.2), 0.2);
        assert!(matches!(
            SoftCompressor::with_breakpoints(1.0, 0.8, 0.5),
            Err(ConfigError::OutOfRange { name: "knee", .. })
        ));
        assert!(SoftCompressor::with_breakpoints(1.0, 0.0, 0.5).is_err());
    }
    #[test]
    fn test_compression_keeps_sign() {
        let comp = SoftCompressor::new(2.0);
        assert_approx(comp.process(0.1), 0.2);
        assert_approx(comp.process(-0.1), -0.2);
        assert_approx(comp.process(-3.0), -1.0);
    }
    #[test]
    fn test_peak_smoother_limits_sustained_peaks() {
        let mut smoother = PeakSmoother::new(240);
        let mut out = 0.0;
        for _ in 0..2000 {
            out = smoother.process(2.0);
        }
        assert!((out - 1.0).abs() < 1e-3);
        smoother.reset();
        assert_approx(smoother.process(0.5), 0.5);
    }
    #[test]
    fn test_peak_smoother_window_max_expires() {
        let mut smoother = PeakSmoother::new(4);
        smoother.process(0.9);
        for _ in 0..3 {
            smoother.process(0.1);
        }
        assert_approx(smoother.window_max(), 0.9);
        smoother.process(0.1);
        assert_approx(smoother.window_max(), 0.1);
    }
    #[test]
    fn test_agc_normalizes_and_floors() {
        let mut agc = Agc::new(8000.0, 0.01);
        let mut out = 0.0;
        for _ in 0..800 {
            out = agc.process(0.25);
        }
        assert!((out - 1.0).abs() < 0.01);
        agc.reset();
        assert_approx(agc.process(0.0), 0.0);
        assert_approx(agc.envelope(), 0.01);
    }
    #[test]
    fn test_preemphasis() {
        let mut pre = Preemphasis::new(0.5);
        assert_approx(pre.process(1.0), 1.0);
        assert_approx(pre.process(1.0), 0.5);
        assert_approx(pre.process(0.0), -0.5);
    }
    #[test]
    fn test_vox_hang() {
        let mut vox = Vox::new(1000, 100);
        assert!(!vox.process(&[0.0; 10]));
        assert!(vox.process(&[0.5; 10]));
        assert!(vox.process(&[0.0; 60]));
        assert!(!vox.process(&[0.0; 60]));
    }
}

//! Feed-forward look-ahead limiter (ALC)
//!
//! Every sample passes through a delay line of `L` samples and leaves it
//! scaled by the current gain. When a sample enters the delay line, the
//! limiter checks whether it would exceed the limit (ceiling minus guard) at
//! the gain projected for the moment it leaves. If so, the gain is ramped
//! linearly so that it arrives at exactly the required value when the sample
//! is emitted. A new ramp never rises above the ramp it replaces, so samples
//! already inside the delay line stay below the limit.
//!
//! When the write index completes a full cycle without a correction, the
//! gain recovers slowly towards the headroom left by the largest sample of
//! that cycle. Cycles in which most samples are too small to estimate the
//! headroom count as faults and are skipped.

use crate::config::AlcConfig;
use crate::mode::TxMode;
use crate::numbers::*;

/// Magnitude below which a sample does not contribute to a gain estimate
const MIN_ESTIMATE_LEVEL: f64 = 1e-3;

/// Look-ahead limiter
pub struct Alc {
    buffer: Vec<Complex<f64>>,
    write: usize,
    mark: usize,
    gain: f64,
    slope: f64,
    ramp_left: usize,
    ramp_target: f64,
    mode: TxMode,
    mode_gain: [f64; TxMode::ALL.len()],
    window_peak: f64,
    window_faults: usize,
    faults: u64,
    limit: f64,
    gain_min: f64,
    gain_max: f64,
    recovery: f64,
}

impl Alc {
    /// Create limiter for signals sampled at `sample_rate`
    pub fn new(config: &AlcConfig, sample_rate: u32) -> Self {
        let len = config.lookahead_samples(sample_rate);
        let window_secs = len as f64 / sample_rate as f64;
        Self {
            buffer: vec![Complex::from(0.0); len],
            write: 0,
            mark: 0,
            gain: config.initial_gain,
            slope: 0.0,
            ramp_left: 0,
            ramp_target: config.initial_gain,
            mode: TxMode::Usb,
            mode_gain: [config.initial_gain; TxMode::ALL.len()],
            window_peak: 0.0,
            window_faults: 0,
            faults: 0,
            limit: config.ceiling - config.guard,
            gain_min: config.gain_min,
            gain_max: config.gain_max,
            recovery: 2f64.powf(window_secs / config.doubling_secs),
        }
    }
    /// Length of the look-ahead window in samples
    pub fn lookahead(&self) -> usize {
        self.buffer.len()
    }
    /// Highest output magnitude
    pub fn limit(&self) -> f64 {
        self.limit
    }
    /// Current gain
    pub fn gain(&self) -> f64 {
        self.gain
    }
    /// Number of cycles skipped because the gain could not be estimated
    pub fn faults(&self) -> u64 {
        self.faults
    }
    /// Operating mode whose gain is in use
    pub fn mode(&self) -> TxMode {
        self.mode
    }
    /// Restart for a key-down transition, resuming the current mode's gain
    ///
    /// The gain reached so far is kept as the current mode's gain.
    pub fn reset(&mut self) {
        self.mode_gain[self.mode.index()] = self.settled_gain();
        self.buffer.fill(Complex::from(0.0));
        self.write = 0;
        self.mark = 0;
        self.gain = self.mode_gain[self.mode.index()];
        self.slope = 0.0;
        self.ramp_left = 0;
        self.ramp_target = self.gain;
        self.window_peak = 0.0;
        self.window_faults = 0;
    }
    /// Switch to the gain of another operating mode
    ///
    /// The gain of the previous mode is stored; the gain is then ramped to
    /// the last gain of `mode` over one window.
    pub fn set_mode(&mut self, mode: TxMode) {
        if mode == self.mode {
            return;
        }
        self.mode_gain[self.mode.index()] = self.settled_gain();
        self.mode = mode;
        let target = self.mode_gain[mode.index()];
        let len = self.buffer.len();
        let peak = self.buffer.iter().map(|x| x.norm()).fold(0.0, f64::max);
        let target = if peak > 0.0 {
            target.min(self.limit / peak).max(self.gain_min)
        } else {
            target
        };
        if target < self.gain {
            self.ramp_down(target);
        } else {
            self.start_ramp(target, (target - self.gain) / len as f64, len);
        }
    }
    fn settled_gain(&self) -> f64 {
        if self.ramp_left > 0 {
            self.ramp_target
        } else {
            self.gain
        }
    }
    fn start_ramp(&mut self, target: f64, slope: f64, steps: usize) {
        self.ramp_target = target;
        self.slope = slope;
        self.ramp_left = steps.max(1);
    }
    /// Ramp down to `target`, never rising above a ramp in progress
    fn ramp_down(&mut self, target: f64) {
        let len = self.buffer.len();
        let needed = (target - self.gain) / len as f64;
        let slope = if self.ramp_left > 0 {
            needed.min(self.slope)
        } else {
            needed
        };
        let steps = if slope < 0.0 {
            ((target - self.gain) / slope).ceil().clamp(1.0, len as f64) as usize
        } else {
            len
        };
        self.start_ramp(target, slope, steps);
    }
    fn correct(&mut self, magnitude: f64) {
        let target = (self.limit / magnitude).clamp(self.gain_min, self.gain_max);
        self.ramp_down(target);
        self.mark = self.write;
        self.window_peak = magnitude;
        self.window_faults = 0;
    }
    fn end_of_window(&mut self) {
        let len = self.buffer.len();
        if self.window_faults > len / 2 || self.window_peak <= 0.0 {
            self.faults += 1;
        } else {
            let target = (self.gain * self.recovery)
                .min(self.limit / self.window_peak)
                .min(self.gain_max);
            if target > self.gain {
                self.start_ramp(target, (target - self.gain) / len as f64, len);
            }
        }
        self.window_peak = 0.0;
        self.window_faults = 0;
    }
    /// Process one sample, returning the sample delayed by the window length
    pub fn process_sample(&mut self, sample: Complex<f64>) -> Complex<f64> {
        let len = self.buffer.len();
        let out = self.buffer[self.write] * self.gain;
        self.buffer[self.write] = sample;
        let magnitude = sample.norm();
        if magnitude < MIN_ESTIMATE_LEVEL {
            self.window_faults += 1;
        }
        self.window_peak = self.window_peak.max(magnitude);
        if magnitude * self.settled_gain() > self.limit {
            self.correct(magnitude);
        }
        self.write += 1;
        if self.write == len {
            self.write = 0;
        }
        if self.ramp_left > 0 {
            self.gain += self.slope;
            self.ramp_left -= 1;
            if self.ramp_left == 0 {
                self.gain = self.ramp_target;
                self.slope = 0.0;
            }
        }
        if self.write == self.mark {
            self.end_of_window();
        }
        out
    }
    /// Process a block in place
    pub fn process(&mut self, block: &mut [Complex<f64>]) {
        for sample in block.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }
}

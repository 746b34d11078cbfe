//! Internal CW keyer
//!
//! Produces the transmit envelope for an internally keyed carrier: the key
//! passes through a bounded delay line, then drives a linear fade envelope.
//! Output is the baseband I/Q pair (envelope on I, zero on Q).

use crate::numbers::to_i16;

use std::collections::VecDeque;

/// Length of the rise and fall ramps in seconds
pub const RAMP_SECS: f64 = 0.005;

/// Fade envelope state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeState {
    /// Output is zero
    Silent,
    /// Ramping up
    FadeIn,
    /// Full amplitude
    Sustain,
    /// Ramping down
    FadeOut,
}

/// Ramped carrier generator
#[derive(Debug)]
pub struct Keyer {
    level: f64,
    key: bool,
    delay: VecDeque<bool>,
    delayed_down: usize,
    fade_state: FadeState,
    fade_pos: usize,
    fade_len: usize,
}

impl Keyer {
    /// Create keyer for `sample_rate` with carrier `level` (normalized) and
    /// a key delay of `delay_ms`
    pub fn new(sample_rate: u32, level: f64, delay_ms: f64) -> Self {
        let delay_len = (delay_ms.max(0.0) * sample_rate as f64 / 1000.0).round() as usize;
        Self {
            level,
            key: false,
            delay: VecDeque::from(vec![false; delay_len]),
            delayed_down: 0,
            fade_state: FadeState::Silent,
            fade_pos: 0,
            fade_len: ((RAMP_SECS * sample_rate as f64).round() as usize).max(1),
        }
    }
    /// Press or release the key
    pub fn set_key(&mut self, down: bool) {
        self.key = down;
    }
    /// Key as pressed (not delayed)
    pub fn key(&self) -> bool {
        self.key
    }
    /// Current fade state
    pub fn fade_state(&self) -> FadeState {
        self.fade_state
    }
    /// Samples per ramp
    pub fn ramp_len(&self) -> usize {
        self.fade_len
    }
    /// Whether the keyer produces (or is about to produce) a carrier
    pub fn is_active(&self) -> bool {
        self.key || self.delayed_down > 0 || self.fade_state != FadeState::Silent
    }
    fn delayed_key(&mut self) -> bool {
        if self.delay.is_empty() {
            return self.key;
        }
        self.delay.push_back(self.key);
        if self.key {
            self.delayed_down += 1;
        }
        let out = self.delay.pop_front().unwrap_or(false);
        if out {
            self.delayed_down -= 1;
        }
        out
    }
    fn envelope(&mut self, key_down: bool) -> f64 {
        match (self.fade_state, key_down) {
            (FadeState::Silent, false) => return 0.0,
            (FadeState::Silent, true) => {
                self.fade_state = FadeState::FadeIn;
                self.fade_pos = 0;
            }
            (FadeState::FadeIn, true) => {
                self.fade_pos += 1;
                if self.fade_pos >= self.fade_len {
                    self.fade_state = FadeState::Sustain;
                }
            }
            (FadeState::Sustain, true) => (),
            (FadeState::FadeIn, false) | (FadeState::Sustain, false) => {
                self.fade_state = FadeState::FadeOut;
                self.fade_pos = self.fade_pos.min(self.fade_len);
            }
            (FadeState::FadeOut, true) => {
                self.fade_state = FadeState::FadeIn;
            }
            (FadeState::FadeOut, false) => {
                if self.fade_pos == 0 {
                    self.fade_state = FadeState::Silent;
                } else {
                    self.fade_pos -= 1;
                }
            }
        }
        match self.fade_state {
            FadeState::Sustain => 1.0,
            _ => self.fade_pos as f64 / self.fade_len as f64,
        }
    }
    /// Next I/Q pair as signed 16-bit values
    pub fn next_pair(&mut self) -> [i16; 2] {
        let key_down = self.delayed_key();
        let env = self.envelope(key_down);
        [to_i16(env * self.level), 0]
    }
    /// Release the key and silence output immediately
    pub fn reset(&mut self) {
        self.key = false;
        self.delay.iter_mut().for_each(|k| *k = false);
        self.delayed_down = 0;
        self.fade_state = FadeState::Silent;
        self.fade_pos = 0;
    }
}

//! Tuning values supplied by the host control surface
//!
//! All structs deserialize with [`serde`] and fall back to their [`Default`]
//! for missing fields. Reading configuration files is left to the host.

use crate::error::ConfigError;
use crate::numbers::{db_to_linear, FULL_SCALE};

use serde::Deserialize;

/// Rate of the conditioning chain in hertz
pub const PROCESSING_RATE: u32 = 8000;

/// Transmit configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct TxConfig {
    /// Microphone sample rate in hertz
    pub mic_rate: u32,
    /// Rate of conditioned I/Q handed to the protocol engines in hertz
    pub output_rate: u32,
    /// Preemphasis coefficient `0.0..=1.0`
    pub preemphasis: f64,
    /// Compression level in decibels
    pub compression_db: f64,
    /// Floor of the AGC envelope in decibels below full scale
    pub noise_floor_db: f64,
    /// VOX threshold in decibels below full scale
    pub vox_threshold_db: f64,
    /// VOX hang time in milliseconds
    pub vox_hang_ms: f64,
    /// Sub-audible FM tone in hertz (`0.0` disables)
    pub fm_tone_hz: f64,
    /// Limiter settings
    pub alc: AlcConfig,
    /// Digital-voice settings
    pub voice: VoiceConfig,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            mic_rate: 48000,
            output_rate: 48000,
            preemphasis: 0.6,
            compression_db: 6.0,
            noise_floor_db: -40.0,
            vox_threshold_db: -30.0,
            vox_hang_ms: 250.0,
            fm_tone_hz: 0.0,
            alc: AlcConfig::default(),
            voice: VoiceConfig::default(),
        }
    }
}

fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { name, value })
    }
}

impl TxConfig {
    /// Check that all values are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        for rate in [self.mic_rate, self.output_rate] {
            if rate == 0 || rate % PROCESSING_RATE != 0 {
                return Err(ConfigError::RateRatio {
                    input: rate,
                    output: PROCESSING_RATE,
                });
            }
        }
        check_range("preemphasis", self.preemphasis, 0.0, 1.0)?;
        check_range("compression_db", self.compression_db, 0.0, 30.0)?;
        check_range("noise_floor_db", self.noise_floor_db, -120.0, 0.0)?;
        check_range("vox_threshold_db", self.vox_threshold_db, -120.0, 0.0)?;
        check_range("vox_hang_ms", self.vox_hang_ms, 0.0, 10_000.0)?;
        if self.fm_tone_hz != 0.0 {
            check_range("fm_tone_hz", self.fm_tone_hz, 9.0, 300.0)?;
        }
        self.alc.validate()?;
        self.voice.validate()
    }
    /// Compression level as linear factor
    pub fn compression_factor(&self) -> f64 {
        db_to_linear(self.compression_db)
    }
    /// AGC floor as linear amplitude
    pub fn noise_floor(&self) -> f64 {
        db_to_linear(self.noise_floor_db)
    }
    /// VOX threshold as 16-bit sample level
    pub fn vox_level(&self) -> i16 {
        (FULL_SCALE * db_to_linear(self.vox_threshold_db)).round() as i16
    }
    /// VOX hang time in samples at `rate`
    pub fn vox_hang_samples(&self, rate: u32) -> usize {
        (self.vox_hang_ms * rate as f64 / 1000.0).round() as usize
    }
}

/// Look-ahead limiter settings
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlcConfig {
    /// Look-ahead window in milliseconds
    pub lookahead_ms: f64,
    /// Maximum output magnitude
    pub ceiling: f64,
    /// Margin kept below the ceiling
    pub guard: f64,
    /// Lowest gain
    pub gain_min: f64,
    /// Highest gain
    pub gain_max: f64,
    /// Seconds the recovery takes to double the gain
    pub doubling_secs: f64,
    /// Gain every mode starts with
    pub initial_gain: f64,
}

impl Default for AlcConfig {
    fn default() -> Self {
        Self {
            lookahead_ms: 10.0,
            ceiling: 1.0,
            guard: 0.02,
            gain_min: 0.01,
            gain_max: 4.0,
            doubling_secs: 2.0,
            initial_gain: 1.0,
        }
    }
}

impl AlcConfig {
    /// Check that all values are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("alc.lookahead_ms", self.lookahead_ms, 0.1, 1000.0)?;
        check_range("alc.ceiling", self.ceiling, 1e-3, 1.0)?;
        check_range("alc.guard", self.guard, 0.0, self.ceiling * 0.5)?;
        check_range("alc.gain_min", self.gain_min, 1e-6, 1.0)?;
        check_range("alc.gain_max", self.gain_max, 1.0, 1000.0)?;
        check_range("alc.doubling_secs", self.doubling_secs, 0.01, 600.0)?;
        check_range(
            "alc.initial_gain",
            self.initial_gain,
            self.gain_min,
            self.gain_max,
        )
    }
    /// Look-ahead window in samples at `rate`
    pub fn lookahead_samples(&self, rate: u32) -> usize {
        ((self.lookahead_ms * rate as f64 / 1000.0).round() as usize).max(1)
    }
}

/// Digital-voice settings
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct VoiceConfig {
    /// Codec squelch enabled at mode open
    pub squelch: bool,
    /// SNR squelch threshold in decibels
    pub snr_squelch_db: f32,
    /// Interleaver frames for modes opened with the advanced call
    pub interleave_frames: u32,
    /// Receive-only channels besides the primary channel
    pub aux_channels: usize,
    /// Band-limit the transmitted modem signal
    pub tx_band_limit: bool,
    /// Outbound text message, sent repeatedly
    pub text: String,
}

/// Highest number of receive-only auxiliary channels
pub const MAX_AUX_CHANNELS: usize = 2;

/// Length of the outbound text message in bytes
pub const TEXT_LEN: usize = 32;

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            squelch: true,
            snr_squelch_db: -2.0,
            interleave_frames: 1,
            aux_channels: 0,
            tx_band_limit: true,
            text: String::new(),
        }
    }
}

impl VoiceConfig {
    /// Check that all values are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "voice.aux_channels",
            self.aux_channels as f64,
            0.0,
            MAX_AUX_CHANNELS as f64,
        )?;
        check_range(
            "voice.interleave_frames",
            self.interleave_frames as f64,
            1.0,
            16.0,
        )?;
        check_range("voice.snr_squelch_db", self.snr_squelch_db as f64, -20.0, 20.0)
    }
}

/// Windowed protocol settings
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Ring capacity in I/Q pairs
    pub ring_capacity: usize,
    /// Number of receivers reported to the radio
    pub receivers: u8,
    /// Active filter selection bits
    pub filter_select: u8,
    /// Send the diagnostic control slot
    pub diagnostic: bool,
    /// Amplitude of internally keyed CW
    pub keyer_level: f64,
    /// Delay of internal keying in milliseconds
    pub keyer_delay_ms: f64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 4096,
            receivers: 1,
            filter_select: 0,
            diagnostic: false,
            keyer_level: 0.9,
            keyer_delay_ms: 10.0,
        }
    }
}

impl ProtocolConfig {
    /// Check that all values are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("ring_capacity", self.ring_capacity as f64, 512.0, 1048576.0)?;
        check_range("receivers", self.receivers as f64, 1.0, 8.0)?;
        check_range("keyer_level", self.keyer_level, 0.0, 1.0)?;
        check_range("keyer_delay_ms", self.keyer_delay_ms, 0.0, 100.0)
    }
}

/// Fixed-block streamer settings
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamerConfig {
    /// Words (16-bit values, I and Q counted separately) per datagram
    pub block_words: usize,
    /// Prefix each datagram with one pad byte
    pub pad_byte: bool,
    /// Apply the static correction
    pub correction: bool,
    /// Correction gain
    pub gain: f64,
    /// Correction offset of the in-phase component
    pub offset_i: f64,
    /// Correction offset of the quadrature component
    pub offset_q: f64,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            block_words: 600,
            pad_byte: false,
            correction: false,
            gain: 1.0,
            offset_i: 0.0,
            offset_q: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_defaults_validate() {
        assert_eq!(TxConfig::default().validate(), Ok(()));
        assert_eq!(ProtocolConfig::default().validate(), Ok(()));
    }
    #[test]
    fn test_conversions() {
        let config = TxConfig {
            vox_threshold_db: -6.0,
            vox_hang_ms: 250.0,
            compression_db: 20.0,
            ..Default::default()
        };
        assert_eq!(config.vox_level(), 16422);
        assert_eq!(config.vox_hang_samples(8000), 2000);
        assert!((config.compression_factor() - 10.0).abs() < 1e-12);
        assert_eq!(config.alc.lookahead_samples(48000), 480);
    }
    #[test]
    fn test_rejects_bad_values() {
        let config = TxConfig {
            preemphasis: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                name: "preemphasis",
                ..
            })
        ));
        let config = TxConfig {
            mic_rate: 44100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = TxConfig {
            fm_tone_hz: 5.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

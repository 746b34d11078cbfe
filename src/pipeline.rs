//! Transmit conditioning pipeline
//!
//! Microphone audio is decimated to [`PROCESSING_RATE`] and conditioned by a
//! chain that depends on the operating mode:
//!
//! | mode          | chain                                                       |
//! |---------------|-------------------------------------------------------------|
//! | LSB, USB      | bandpass, preemphasis, AGC, compression, sideband filter, peak rounding |
//! | AM            | as SSB with a real second bandpass, then DC shift           |
//! | FM            | as AM without DC shift, then phase modulation               |
//! | digital       | single sideband filter                                      |
//! | digital voice | bandpass, compression, rate conversion, voice codec         |
//!
//! The result is converted to the output rate and passes the [`Alc`]
//! limiter. All stages keep their state between calls and are retuned in
//! place when the mode changes; only opening a digital-voice mode builds
//! new rate converters for the codec's rates.

use crate::alc::Alc;
use crate::config::{TxConfig, PROCESSING_RATE};
use crate::dsp::fir::{Fir, Passband};
use crate::dsp::resample::RateConverter;
use crate::error::ConfigError;
use crate::level::*;
use crate::mode::TxMode;
use crate::numbers::*;
use crate::voice::ChannelManager;

use std::f64::consts::TAU;
use std::iter::repeat;

/// Lower edge of the voice band in hertz
pub const VOICE_LOW: f64 = 300.0;
/// Upper edge of the voice band in hertz
pub const VOICE_HIGH: f64 = 2700.0;
/// Half bandwidth of the digital-voice transmit filter in hertz
pub const MODEM_HALF_WIDTH: f64 = 1200.0;
/// Peak phase deviation of FM in radians
pub const PHASE_DEVIATION: f64 = 1.0;
/// Share of the modulation taken by the sub-audible tone
pub const TONE_FRACTION: f64 = 0.15;

const FILTER_TAPS: usize = 127;
const PEAK_WINDOW_SECS: f64 = 0.030;

fn sideband(mode: TxMode) -> Passband {
    match mode {
        TxMode::Lsb => Passband::Complex {
            low: -VOICE_HIGH,
            high: -VOICE_LOW,
        },
        TxMode::Usb | TxMode::Digital | TxMode::DigitalVoice => Passband::Complex {
            low: VOICE_LOW,
            high: VOICE_HIGH,
        },
        TxMode::Am | TxMode::Fm => Passband::Real {
            low: VOICE_LOW,
            high: VOICE_HIGH,
        },
    }
}

/// Codec rates and transmit filter of an open digital-voice mode
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct VoiceTuning {
    /// Speech rate of the codec in hertz
    pub speech_rate: u32,
    /// Modem rate of the codec in hertz
    pub modem_rate: u32,
    /// Codec emits real modem samples
    pub real_modulation: bool,
    /// Center of the transmit filter in hertz (real modulation only)
    pub center: f64,
}

impl VoiceTuning {
    /// Tuning for the mode currently open in `manager`
    pub fn from_manager(manager: &ChannelManager) -> Option<Self> {
        let desc = manager.current_mode()?.descriptor();
        Some(Self {
            speech_rate: manager.speech_sample_rate(),
            modem_rate: manager.modem_sample_rate(),
            real_modulation: desc.is_real_modulation,
            center: desc.filter_center_frequency,
        })
    }
}

/// Operating mode of the pipeline
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Tuning {
    /// Operating mode
    pub mode: TxMode,
    /// Codec rates, required for [`TxMode::DigitalVoice`]
    pub voice: Option<VoiceTuning>,
}

impl Tuning {
    /// Tuning for an analog or generic digital mode
    pub fn analog(mode: TxMode) -> Self {
        Self { mode, voice: None }
    }
    /// Tuning for digital voice through `manager`
    pub fn digital_voice(manager: &ChannelManager) -> Self {
        Self {
            mode: TxMode::DigitalVoice,
            voice: VoiceTuning::from_manager(manager),
        }
    }
}

/// Message handled by [`TxPipeline::handle`]
#[derive(Debug)]
pub enum Control<'a> {
    /// Retune all stages at once, without processing samples
    Retune(Tuning),
    /// Condition a block of microphone samples
    Process(&'a [f64]),
}

struct VoiceChain {
    tuning: VoiceTuning,
    speech: RateConverter<f64>,
    modem_filter: Option<Fir>,
    modem: RateConverter<Complex<f64>>,
}

/// Transmit conditioning chain with its limiter
pub struct TxPipeline {
    config: TxConfig,
    tuning: Tuning,
    pending: Option<Tuning>,
    decimator: RateConverter<f64>,
    bandpass: Fir,
    preemphasis: Preemphasis,
    agc: Agc,
    compressor: SoftCompressor,
    sideband: Fir,
    smoother: PeakSmoother,
    interpolator: RateConverter<Complex<f64>>,
    alc: Alc,
    vox: Vox,
    phase: f64,
    tone_phase: f64,
    voice: Option<VoiceChain>,
    audio: Vec<f64>,
    baseband: Vec<Complex<f64>>,
    speech: Vec<f64>,
    modem: Vec<Complex<f64>>,
}

impl TxPipeline {
    /// Create pipeline for USB
    pub fn new(config: TxConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let rate = PROCESSING_RATE as f64;
        let voice_band = Passband::Real {
            low: VOICE_LOW,
            high: VOICE_HIGH,
        };
        Ok(Self {
            tuning: Tuning::analog(TxMode::Usb),
            pending: None,
            decimator: RateConverter::new(config.mic_rate, PROCESSING_RATE)?,
            bandpass: Fir::new(FILTER_TAPS, rate, voice_band),
            preemphasis: Preemphasis::new(config.preemphasis),
            agc: Agc::new(rate, config.noise_floor()),
            compressor: SoftCompressor::new(config.compression_factor()),
            sideband: Fir::new(FILTER_TAPS, rate, sideband(TxMode::Usb)),
            smoother: PeakSmoother::new((PEAK_WINDOW_SECS * rate).round() as usize),
            interpolator: RateConverter::new(PROCESSING_RATE, config.output_rate)?,
            alc: Alc::new(&config.alc, config.output_rate),
            vox: Vox::new(
                config.vox_level(),
                config.vox_hang_samples(config.mic_rate),
            ),
            phase: 0.0,
            tone_phase: 0.0,
            voice: None,
            audio: Vec::new(),
            baseband: Vec::new(),
            speech: Vec::new(),
            modem: Vec::new(),
            config,
        })
    }
    /// Tuning in effect
    pub fn tuning(&self) -> Tuning {
        self.tuning
    }
    /// Limiter
    pub fn alc(&self) -> &Alc {
        &self.alc
    }
    /// VOX keyed by the last processed block
    pub fn is_vox_keyed(&self) -> bool {
        self.vox.is_keyed()
    }
    /// Change preemphasis coefficient (`0.0..=1.0`)
    pub fn set_preemphasis(&mut self, coefficient: f64) -> Result<(), ConfigError> {
        let config = TxConfig {
            preemphasis: coefficient,
            ..self.config.clone()
        };
        config.validate()?;
        self.preemphasis.set_coefficient(coefficient);
        self.config = config;
        Ok(())
    }
    /// Change compression level in decibels
    pub fn set_compression_db(&mut self, db: f64) -> Result<(), ConfigError> {
        let config = TxConfig {
            compression_db: db,
            ..self.config.clone()
        };
        config.validate()?;
        self.compressor.set_level(config.compression_factor());
        self.config = config;
        Ok(())
    }
    /// Change AGC floor in decibels
    pub fn set_noise_floor_db(&mut self, db: f64) -> Result<(), ConfigError> {
        let config = TxConfig {
            noise_floor_db: db,
            ..self.config.clone()
        };
        config.validate()?;
        self.agc.set_floor(config.noise_floor());
        self.config = config;
        Ok(())
    }
    /// Change VOX threshold in decibels and hang time in milliseconds
    pub fn set_vox(&mut self, threshold_db: f64, hang_ms: f64) -> Result<(), ConfigError> {
        let config = TxConfig {
            vox_threshold_db: threshold_db,
            vox_hang_ms: hang_ms,
            ..self.config.clone()
        };
        config.validate()?;
        self.vox = Vox::new(
            config.vox_level(),
            config.vox_hang_samples(config.mic_rate),
        );
        self.config = config;
        Ok(())
    }
    /// Prepare for a key-down transition
    pub fn key_down(&mut self) {
        self.alc.reset();
    }
    /// Stage `tuning`, to take effect with the next processed block
    pub fn set_tuning(&mut self, tuning: Tuning) {
        if tuning != self.tuning {
            self.pending = Some(tuning);
        } else {
            self.pending = None;
        }
    }
    /// Handle a control message
    ///
    /// Processed samples at the output rate are appended to `output`.
    pub fn handle(
        &mut self,
        control: Control<'_>,
        voice: &mut ChannelManager,
        output: &mut Vec<Complex<f64>>,
    ) -> Result<(), ConfigError> {
        match control {
            Control::Retune(tuning) => self.retune(tuning),
            Control::Process(mic) => self.process(mic, voice, output),
        }
    }
    fn prepare_voice(&mut self, tuning: VoiceTuning) -> Result<(), ConfigError> {
        if self.voice.as_ref().map_or(false, |chain| chain.tuning == tuning) {
            return Ok(());
        }
        let speech = RateConverter::new(PROCESSING_RATE, tuning.speech_rate)?;
        let modem = RateConverter::new(tuning.modem_rate, self.config.output_rate)?;
        let modem_filter = if tuning.real_modulation {
            let band = Passband::Complex {
                low: tuning.center - MODEM_HALF_WIDTH,
                high: tuning.center + MODEM_HALF_WIDTH,
            };
            let reused = match self.voice.take() {
                Some(VoiceChain {
                    tuning: previous,
                    modem_filter: Some(fir),
                    ..
                }) if previous.modem_rate == tuning.modem_rate => Some(fir),
                _ => None,
            };
            Some(match reused {
                Some(mut fir) => {
                    fir.retune(band);
                    fir
                }
                None => {
                    let taps = FILTER_TAPS * (tuning.modem_rate / PROCESSING_RATE).max(1) as usize;
                    Fir::new(taps, tuning.modem_rate as f64, band)
                }
            })
        } else {
            None
        };
        log::debug!(
            "digital voice chain: speech {} Hz, modem {} Hz",
            tuning.speech_rate,
            tuning.modem_rate
        );
        self.voice = Some(VoiceChain {
            tuning,
            speech,
            modem_filter,
            modem,
        });
        Ok(())
    }
    fn retune(&mut self, tuning: Tuning) -> Result<(), ConfigError> {
        self.pending = None;
        match tuning.voice {
            Some(voice) if tuning.mode == TxMode::DigitalVoice => self.prepare_voice(voice)?,
            _ => self.voice = None,
        }
        self.sideband.retune(sideband(tuning.mode));
        if tuning.mode != self.tuning.mode {
            self.agc.reset();
            self.smoother.reset();
            self.interpolator.reset();
            self.phase = 0.0;
            self.alc.set_mode(tuning.mode);
            log::debug!("transmit chain retuned to {:?}", tuning.mode);
        }
        self.tuning = tuning;
        Ok(())
    }
    fn condition(&mut self, sample: f64) -> f64 {
        let x = self.bandpass.process_real(sample);
        let x = self.preemphasis.process(x);
        let x = self.agc.process(x);
        self.compressor.process(x)
    }
    fn phase_modulate(&mut self, block: &mut [Complex<f64>]) {
        let tone_step = TAU * self.config.fm_tone_hz / self.config.output_rate as f64;
        let tone = self.config.fm_tone_hz > 0.0;
        for sample in block.iter_mut() {
            let mut m = sample.re;
            if tone {
                m = m * (1.0 - TONE_FRACTION) + self.tone_phase.sin() * TONE_FRACTION;
                self.tone_phase = (self.tone_phase + tone_step) % TAU;
            }
            self.phase = m * PHASE_DEVIATION;
            let (im, re) = self.phase.sin_cos();
            *sample = Complex::new(re, im);
        }
    }
    fn process_voice(
        &mut self,
        audio: &mut [f64],
        voice: &mut ChannelManager,
        output: &mut Vec<Complex<f64>>,
    ) {
        let Some(chain) = self.voice.as_mut() else {
            let count = audio.len() * self.config.output_rate as usize / PROCESSING_RATE as usize;
            output.extend(repeat(Complex::from(0.0)).take(count));
            return;
        };
        for x in audio.iter_mut() {
            *x = self.compressor.process(self.bandpass.process_real(*x));
        }
        self.speech.clear();
        chain.speech.process(audio, &mut self.speech);
        self.modem.clear();
        if voice.encode_block(&self.speech, &mut self.modem) == 0 {
            let count = self.speech.len() * chain.tuning.modem_rate as usize
                / chain.tuning.speech_rate as usize;
            self.modem.resize(count, Complex::from(0.0));
        }
        if let Some(fir) = chain.modem_filter.as_mut() {
            for sample in self.modem.iter_mut() {
                *sample = fir.process(*sample);
            }
        }
        chain.modem.process(&self.modem, output);
    }
    fn process(
        &mut self,
        mic: &[f64],
        voice: &mut ChannelManager,
        output: &mut Vec<Complex<f64>>,
    ) -> Result<(), ConfigError> {
        if let Some(tuning) = self.pending.take() {
            self.retune(tuning)?;
        }
        self.vox.process(mic);
        let mut audio = std::mem::take(&mut self.audio);
        audio.clear();
        self.decimator.process(mic, &mut audio);
        self.baseband.clear();
        let start = output.len();
        match self.tuning.mode {
            TxMode::Lsb | TxMode::Usb => {
                for &x in &audio {
                    let y = self.condition(x);
                    let y = self.sideband.process(Complex::from(y));
                    self.baseband.push(self.smoother.process_complex(y));
                }
            }
            TxMode::Am => {
                for &x in &audio {
                    let y = self.condition(x);
                    let y = self.smoother.process(self.sideband.process_real(y));
                    self.baseband.push(Complex::new(0.5 + y / 2.0, 0.0));
                }
            }
            TxMode::Fm => {
                for &x in &audio {
                    let y = self.condition(x);
                    let y = self.smoother.process(self.sideband.process_real(y));
                    self.baseband.push(Complex::from(y));
                }
            }
            TxMode::Digital => {
                for &x in &audio {
                    self.baseband.push(self.sideband.process(Complex::from(x)));
                }
            }
            TxMode::DigitalVoice => self.process_voice(&mut audio, voice, output),
        }
        if self.tuning.mode != TxMode::DigitalVoice {
            self.interpolator.process(&self.baseband, output);
        }
        if self.tuning.mode == TxMode::Fm {
            self.phase_modulate(&mut output[start..]);
        }
        self.alc.process(&mut output[start..]);
        self.audio = audio;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::fake::FakeLibrary;
    use crate::codec::CodecLibrary;
    use crate::config::VoiceConfig;
    use crate::mode::VoiceMode;
    use std::sync::Arc;

    fn tone(freq: f64, level: f64, start: usize, len: usize) -> Vec<f64> {
        (start..start + len)
            .map(|i| level * (TAU * freq * i as f64 / 48000.0).sin())
            .collect()
    }
    fn no_voice() -> ChannelManager {
        ChannelManager::new(None, VoiceConfig::default())
    }
    fn run(
        pipeline: &mut TxPipeline,
        voice: &mut ChannelManager,
        freq: f64,
        level: f64,
        blocks: usize,
    ) -> Vec<Complex<f64>> {
        let mut output = Vec::new();
        for b in 0..blocks {
            let mic = tone(freq, level, b * 480, 480);
            pipeline
                .handle(Control::Process(&mic), voice, &mut output)
                .unwrap();
        }
        output
    }
    fn mean_rotation(block: &[Complex<f64>]) -> f64 {
        let sum: Complex<f64> = block
            .windows(2)
            .map(|w| w[1] * w[0].conj())
            .sum();
        sum.arg()
    }

    #[test]
    fn test_output_count_and_limit() {
        let mut pipeline = TxPipeline::new(TxConfig::default()).unwrap();
        let mut voice = no_voice();
        let output = run(&mut pipeline, &mut voice, 1000.0, 0.8, 20);
        assert_eq!(output.len(), 20 * 480);
        let limit = pipeline.alc().limit();
        assert!(output.iter().all(|x| x.norm() <= limit + 1e-9));
        assert!(output[4800..].iter().any(|x| x.norm() > 0.1));
    }
    #[test]
    fn test_sideband_selection() {
        let mut pipeline = TxPipeline::new(TxConfig::default()).unwrap();
        let mut voice = no_voice();
        let usb = run(&mut pipeline, &mut voice, 1000.0, 0.5, 20);
        assert!(mean_rotation(&usb[6000..]) > 0.05);
        pipeline
            .handle(Control::Retune(Tuning::analog(TxMode::Lsb)), &mut voice, &mut Vec::new())
            .unwrap();
        assert_eq!(pipeline.tuning().mode, TxMode::Lsb);
        let lsb = run(&mut pipeline, &mut voice, 1000.0, 0.5, 20);
        assert!(mean_rotation(&lsb[6000..]) < -0.05);
    }
    #[test]
    fn test_lazy_retune() {
        let mut pipeline = TxPipeline::new(TxConfig::default()).unwrap();
        let mut voice = no_voice();
        pipeline.set_tuning(Tuning::analog(TxMode::Am));
        assert_eq!(pipeline.tuning().mode, TxMode::Usb);
        let output = run(&mut pipeline, &mut voice, 1000.0, 0.5, 20);
        assert_eq!(pipeline.tuning().mode, TxMode::Am);
        assert_eq!(pipeline.alc().mode(), TxMode::Am);
        assert!(output.iter().all(|x| x.im == 0.0));
        let mean: f64 = output[4800..].iter().map(|x| x.re).sum::<f64>() / 4800.0;
        assert!(mean > 0.2);
    }
    #[test]
    fn test_fm_constant_envelope() {
        let config = TxConfig {
            fm_tone_hz: 88.5,
            ..Default::default()
        };
        let mut pipeline = TxPipeline::new(config).unwrap();
        let mut voice = no_voice();
        pipeline
            .handle(Control::Retune(Tuning::analog(TxMode::Fm)), &mut voice, &mut Vec::new())
            .unwrap();
        let output = run(&mut pipeline, &mut voice, 1000.0, 0.5, 20);
        let limit = pipeline.alc().limit();
        for x in &output[4800..] {
            assert!((x.norm() - limit).abs() < 1e-6);
        }
    }
    #[test]
    fn test_digital_skips_agc() {
        let mut pipeline = TxPipeline::new(TxConfig::default()).unwrap();
        let mut voice = no_voice();
        pipeline.set_tuning(Tuning::analog(TxMode::Digital));
        let output = run(&mut pipeline, &mut voice, 1500.0, 0.01, 20);
        assert!(output.iter().all(|x| x.norm() < 0.05));
        assert!(output[4800..].iter().any(|x| x.norm() > 0.001));
    }
    #[test]
    fn test_digital_voice_encodes_through_codec() {
        let library: Arc<dyn CodecLibrary> = Arc::new(FakeLibrary::new(14));
        let mut voice = ChannelManager::new(Some(library), VoiceConfig::default());
        voice.select_mode(Some(VoiceMode::Mode700D)).unwrap();
        voice.apply_pending_mode().unwrap();
        let mut pipeline = TxPipeline::new(TxConfig::default()).unwrap();
        pipeline
            .handle(Control::Retune(Tuning::digital_voice(&voice)), &mut voice, &mut Vec::new())
            .unwrap();
        let output = run(&mut pipeline, &mut voice, 1000.0, 0.5, 20);
        assert_eq!(output.len(), 20 * 480);
        assert!(output[4800..].iter().any(|x| x.norm() > 0.01));
        let limit = pipeline.alc().limit();
        assert!(output.iter().all(|x| x.norm() <= limit + 1e-9));
    }
    #[test]
    fn test_digital_voice_without_codec_is_silent() {
        let mut voice = no_voice();
        let mut pipeline = TxPipeline::new(TxConfig::default()).unwrap();
        pipeline.set_tuning(Tuning::digital_voice(&voice));
        let output = run(&mut pipeline, &mut voice, 1000.0, 0.5, 4);
        assert_eq!(output.len(), 4 * 480);
        assert!(output.iter().all(|x| x.norm() == 0.0));
    }
    #[test]
    fn test_bad_codec_rates_rejected() {
        let mut pipeline = TxPipeline::new(TxConfig::default()).unwrap();
        let tuning = Tuning {
            mode: TxMode::DigitalVoice,
            voice: Some(VoiceTuning {
                speech_rate: 44100,
                modem_rate: 8000,
                real_modulation: true,
                center: 1500.0,
            }),
        };
        assert!(matches!(
            pipeline.handle(Control::Retune(tuning), &mut no_voice(), &mut Vec::new()),
            Err(ConfigError::RateRatio { .. })
        ));
    }
    #[test]
    fn test_vox_and_tuning_knobs() {
        let mut pipeline = TxPipeline::new(TxConfig::default()).unwrap();
        let mut voice = no_voice();
        run(&mut pipeline, &mut voice, 1000.0, 0.5, 1);
        assert!(pipeline.is_vox_keyed());
        run(&mut pipeline, &mut voice, 1000.0, 0.0, 30);
        assert!(!pipeline.is_vox_keyed());
        assert!(pipeline.set_preemphasis(1.5).is_err());
        assert!(pipeline.set_preemphasis(0.3).is_ok());
        assert!(pipeline.set_compression_db(12.0).is_ok());
        assert!(pipeline.set_noise_floor_db(-60.0).is_ok());
        assert!(pipeline.set_vox(-20.0, 100.0).is_ok());
    }
}

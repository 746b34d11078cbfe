//! Transceiver context owned by the host
//!
//! A [`Transceiver`] bundles all per-radio state: the transmit pipeline with
//! its limiter, the digital-voice channel manager, and both protocol
//! engines. The host owns it and drives it from its audio thread; other
//! threads reach it only through a [`ControlHandle`].

use crate::codec::CodecLibrary;
use crate::config::{ProtocolConfig, StreamerConfig, TxConfig};
use crate::control::ControlHandle;
use crate::dsp::resample::RateConverter;
use crate::error::{ConfigError, TransportError};
use crate::mode::TxMode;
use crate::numbers::*;
use crate::pipeline::{Control, Tuning, TxPipeline};
use crate::protocol::streamer::FixedBlockStreamer;
use crate::protocol::windowed::{WindowedProtocol, REFERENCE_RATE};
use crate::protocol::{DatagramSink, Notifier};
use crate::voice::ChannelManager;

use serde::Deserialize;

use std::sync::Arc;

/// Complete transceiver configuration
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransceiverConfig {
    /// Transmit chain, including limiter and digital voice
    pub tx: TxConfig,
    /// Windowed protocol engine
    pub protocol: ProtocolConfig,
    /// Fixed-block streamer
    pub streamer: StreamerConfig,
}

/// Audio core of one radio
pub struct Transceiver {
    pipeline: TxPipeline,
    voice: ChannelManager,
    protocol: WindowedProtocol,
    streamer: FixedBlockStreamer,
    to_reference: RateConverter<Complex<f64>>,
    mode: TxMode,
    keyed: bool,
    tx_block: Vec<Complex<f64>>,
    reference_block: Vec<Complex<f64>>,
}

impl Transceiver {
    /// Create context
    ///
    /// `library` is the resolved voice codec, if any. Transport notices of
    /// both protocol engines go to `notifier`.
    pub fn new(
        config: TransceiverConfig,
        library: Option<Arc<dyn CodecLibrary>>,
        notifier: Notifier,
    ) -> Result<Self, ConfigError> {
        config.protocol.validate()?;
        config.tx.voice.validate()?;
        let to_reference = RateConverter::new(config.tx.output_rate, REFERENCE_RATE)?;
        let voice = ChannelManager::new(library, config.tx.voice.clone());
        Ok(Self {
            pipeline: TxPipeline::new(config.tx)?,
            voice,
            protocol: WindowedProtocol::new(config.protocol, notifier.clone()),
            streamer: FixedBlockStreamer::new(config.streamer, notifier),
            to_reference,
            mode: TxMode::Usb,
            keyed: false,
            tx_block: Vec::new(),
            reference_block: Vec::new(),
        })
    }
    /// Handle for mode and squelch requests from other threads
    pub fn control(&self) -> ControlHandle {
        self.voice.control()
    }
    /// Transmit pipeline
    pub fn pipeline(&self) -> &TxPipeline {
        &self.pipeline
    }
    /// Transmit pipeline, for tuning knobs
    pub fn pipeline_mut(&mut self) -> &mut TxPipeline {
        &mut self.pipeline
    }
    /// Digital-voice channel manager
    pub fn voice(&self) -> &ChannelManager {
        &self.voice
    }
    /// Digital-voice channel manager, for text and direct mode selection
    pub fn voice_mut(&mut self) -> &mut ChannelManager {
        &mut self.voice
    }
    /// Windowed protocol engine
    pub fn protocol(&self) -> &WindowedProtocol {
        &self.protocol
    }
    /// Windowed protocol engine, for registers, writes and the CW key
    pub fn protocol_mut(&mut self) -> &mut WindowedProtocol {
        &mut self.protocol
    }
    /// Fixed-block streamer
    pub fn streamer(&self) -> &FixedBlockStreamer {
        &self.streamer
    }
    /// Fixed-block streamer, for its correction
    pub fn streamer_mut(&mut self) -> &mut FixedBlockStreamer {
        &mut self.streamer
    }
    /// Selected transmit mode
    pub fn tx_mode(&self) -> TxMode {
        self.mode
    }
    /// Whether the last transmitted block was keyed
    pub fn is_keyed(&self) -> bool {
        self.keyed
    }
    /// Select the transmit mode, effective with the next block
    pub fn set_tx_mode(&mut self, mode: TxMode) {
        self.mode = mode;
        self.pipeline.set_tuning(self.tuning());
    }
    fn tuning(&self) -> Tuning {
        match self.mode {
            TxMode::DigitalVoice => Tuning::digital_voice(&self.voice),
            mode => Tuning::analog(mode),
        }
    }
    fn sync_voice_mode(&mut self) {
        match self.voice.apply_pending_mode() {
            Ok(false) => return,
            Ok(true) => (),
            Err(err) => log::warn!("digital voice mode not opened: {}", err),
        }
        if self.mode == TxMode::DigitalVoice {
            self.pipeline.set_tuning(self.tuning());
        }
    }
    /// Condition a microphone block and queue it for the windowed protocol
    ///
    /// The transmitter is keyed by `ptt` or by VOX. A staged voice mode is
    /// opened first. Returns whether the block was keyed.
    pub fn transmit_block(&mut self, mic: &[f64], ptt: bool) -> Result<bool, ConfigError> {
        self.sync_voice_mode();
        if (ptt || self.pipeline.is_vox_keyed()) && !self.keyed {
            self.pipeline.key_down();
        }
        self.tx_block.clear();
        self.pipeline
            .handle(Control::Process(mic), &mut self.voice, &mut self.tx_block)?;
        let keyed = ptt || self.pipeline.is_vox_keyed();
        if keyed && !self.keyed {
            log::debug!("transmitter keyed");
        }
        self.reference_block.clear();
        self.to_reference
            .process(&self.tx_block, &mut self.reference_block);
        self.protocol.add_samples(&self.reference_block, keyed);
        self.keyed = keyed;
        Ok(keyed)
    }
    /// Conditioned I/Q of the last transmitted block at the output rate
    pub fn last_tx_block(&self) -> &[Complex<f64>] {
        &self.tx_block
    }
    /// Build and send the next windowed-protocol packet
    pub fn send_packet(&mut self, sink: &mut dyn DatagramSink) -> Result<(), TransportError> {
        self.protocol.send_next_packet(sink)
    }
    /// Stream I/Q through the fixed-block streamer
    ///
    /// Returns the number of datagrams sent.
    pub fn stream_block(
        &mut self,
        iq: &[Complex<f64>],
        sink: &mut dyn DatagramSink,
    ) -> Result<usize, TransportError> {
        self.streamer.push(iq, sink)
    }
    /// Decode demodulated samples of `channel` into speech
    ///
    /// Speech is appended to `speech`; returns the number of samples
    /// appended.
    pub fn receive_block(
        &mut self,
        iq: &[Complex<f64>],
        channel: usize,
        speech: &mut Vec<f64>,
    ) -> usize {
        self.sync_voice_mode();
        self.voice.decode_block(iq, channel, speech)
    }
    /// Close and release the codec, silencing the transmitter
    pub fn shutdown(&mut self) {
        self.voice.shutdown();
        self.protocol.reset();
        self.keyed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::fake::FakeLibrary;
    use crate::mode::VoiceMode;
    use crate::protocol::testing::RecordingSink;
    use crate::protocol::windowed::PACKET_LEN;
    use std::f64::consts::TAU;

    fn tone(level: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| level * (TAU * 1000.0 * i as f64 / 48000.0).sin())
            .collect()
    }
    fn quiet_config() -> TransceiverConfig {
        let mut config = TransceiverConfig::default();
        config.tx.vox_threshold_db = -0.5;
        config
    }
    #[test]
    fn test_key_up_holds_cushion() {
        let mut radio = Transceiver::new(quiet_config(), None, Notifier::new()).unwrap();
        let cushion = radio.protocol().ring().cushion();
        for _ in 0..5 {
            assert!(!radio.transmit_block(&tone(0.3, 480), false).unwrap());
            assert_eq!(radio.protocol().ring().len(), cushion);
        }
        assert!(radio.protocol().ring().is_zeroed());
    }
    #[test]
    fn test_ptt_queues_reference_rate_samples() {
        let mut radio = Transceiver::new(quiet_config(), None, Notifier::new()).unwrap();
        let cushion = radio.protocol().ring().cushion();
        assert!(radio.transmit_block(&tone(0.3, 480), true).unwrap());
        assert!(radio.is_keyed());
        assert_eq!(radio.last_tx_block().len(), 480);
        assert_eq!(radio.protocol().ring().len(), cushion + 480);
        let mut sink = RecordingSink::default();
        radio.send_packet(&mut sink).unwrap();
        assert_eq!(sink.datagrams[0].len(), PACKET_LEN);
        assert!(!radio.transmit_block(&tone(0.3, 480), false).unwrap());
        assert_eq!(radio.protocol().ring().len(), cushion);
    }
    #[test]
    fn test_vox_keys_transmitter() {
        let mut config = TransceiverConfig::default();
        config.tx.vox_threshold_db = -20.0;
        let mut radio = Transceiver::new(config, None, Notifier::new()).unwrap();
        for _ in 0..3 {
            assert!(radio.transmit_block(&tone(0.5, 480), false).unwrap());
        }
        assert!(!radio.protocol().ring().is_zeroed());
    }
    #[test]
    fn test_lower_output_rate_is_converted() {
        let mut config = quiet_config();
        config.tx.output_rate = 16000;
        let mut radio = Transceiver::new(config, None, Notifier::new()).unwrap();
        let cushion = radio.protocol().ring().cushion();
        radio.transmit_block(&tone(0.3, 480), true).unwrap();
        assert_eq!(radio.last_tx_block().len(), 160);
        assert_eq!(radio.protocol().ring().len(), cushion + 480);
    }
    #[test]
    fn test_output_rate_without_ratio_is_rejected() {
        let mut config = quiet_config();
        config.tx.output_rate = 32000;
        assert!(matches!(
            Transceiver::new(config, None, Notifier::new()),
            Err(ConfigError::RateRatio { .. })
        ));
    }
    #[test]
    fn test_digital_voice_through_control_handle() {
        let library: Arc<dyn CodecLibrary> = Arc::new(FakeLibrary::new(14));
        let mut radio = Transceiver::new(quiet_config(), Some(library), Notifier::new()).unwrap();
        radio.set_tx_mode(TxMode::DigitalVoice);
        let control = radio.control();
        std::thread::spawn(move || control.request_mode(Some(VoiceMode::Mode700D)))
            .join()
            .unwrap();
        let mut output = Vec::new();
        for _ in 0..20 {
            radio.transmit_block(&tone(0.5, 480), true).unwrap();
            output.extend_from_slice(radio.last_tx_block());
        }
        assert_eq!(radio.voice().current_mode(), Some(VoiceMode::Mode700D));
        assert_eq!(radio.pipeline().tuning().mode, TxMode::DigitalVoice);
        assert!(radio.pipeline().tuning().voice.is_some());
        assert!(output[4800..].iter().any(|x| x.norm() > 0.01));
        let mut speech = Vec::new();
        let iq = vec![Complex::new(0.0, 0.0); 800];
        assert_eq!(radio.receive_block(&iq, 0, &mut speech), 800);
        radio.shutdown();
        assert_eq!(radio.voice().current_mode(), None);
        assert!(!radio.is_keyed());
    }
    #[test]
    fn test_failed_voice_mode_keeps_transmitting() {
        let library: Arc<dyn CodecLibrary> = Arc::new(FakeLibrary::new(12));
        let mut radio = Transceiver::new(quiet_config(), Some(library), Notifier::new()).unwrap();
        radio.set_tx_mode(TxMode::DigitalVoice);
        radio.control().request_mode(Some(VoiceMode::Mode700E));
        for _ in 0..4 {
            radio.transmit_block(&tone(0.5, 480), true).unwrap();
            assert!(radio.last_tx_block().iter().all(|x| x.norm() == 0.0));
        }
        assert_eq!(radio.voice().current_mode(), None);
    }
    #[test]
    fn test_shutdown_silences_transmitter() {
        let mut radio = Transceiver::new(quiet_config(), None, Notifier::new()).unwrap();
        radio.transmit_block(&tone(0.3, 480), true).unwrap();
        radio.protocol_mut().set_cw_key(true);
        radio.shutdown();
        assert!(!radio.is_keyed());
        assert!(!radio.protocol().is_keyed());
        assert!(radio.protocol().ring().is_zeroed());
    }
    #[test]
    fn test_stream_block() {
        let mut radio = Transceiver::new(quiet_config(), None, Notifier::new()).unwrap();
        let mut sink = RecordingSink::default();
        let iq = vec![Complex::new(0.1, -0.1); 450];
        assert_eq!(radio.stream_block(&iq, &mut sink).unwrap(), 1);
        assert_eq!(radio.streamer().buffered_pairs(), 150);
    }
}

//! Digital-voice channel manager
//!
//! Bridges host audio blocks of arbitrary size to the codec, whose frame
//! sizes are fixed per mode (speech) or vary with the demodulator's
//! synchronization state (modem input, see [`CodecSession::nin`]).
//!
//! Mode changes are staged: [`ChannelManager::select_mode`] or a
//! [`ControlHandle`] records a request, and
//! [`ChannelManager::apply_pending_mode`] closes the current mode completely
//! before it opens the requested one. A failed open leaves the manager
//! closed; it is not retried.

use crate::codec::*;
use crate::config::{VoiceConfig, MAX_AUX_CHANNELS, TEXT_LEN};
use crate::control::{control_channel, ControlHandle, ControlState};
use crate::error::{CodecError, GateFailure};
use crate::mode::VoiceMode;
use crate::numbers::*;

use std::collections::{TryReserveError, VecDeque};
use std::iter::repeat;
use std::sync::Arc;

/// Speech frames buffered before playback starts
const PLAYBACK_THRESHOLD_FRAMES: usize = 2;

/// Capacity of the speech ring in frames
const RING_FRAMES: usize = 8;

/// Longest received text kept for the host
const MAX_RX_TEXT: usize = 256;

fn zeroed<T: Clone + Default>(len: usize) -> Result<Vec<T>, TryReserveError> {
    let mut vec = Vec::new();
    vec.try_reserve_exact(len)?;
    vec.resize(len, T::default());
    Ok(vec)
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Scales sample counts by a rational factor without losing remainders
#[derive(Clone, Copy, Debug)]
struct CountRatio {
    num: usize,
    den: usize,
    rem: usize,
}

impl CountRatio {
    fn new(output_rate: u32, input_rate: u32) -> Self {
        let (output_rate, input_rate) = (output_rate as usize, input_rate as usize);
        let g = gcd(output_rate, input_rate).max(1);
        Self {
            num: output_rate / g,
            den: (input_rate / g).max(1),
            rem: 0,
        }
    }
    fn scale(&mut self, count: usize) -> usize {
        let total = count * self.num + self.rem;
        self.rem = total % self.den;
        total / self.den
    }
}

/// Fixed-capacity FIFO of decoded speech samples
#[derive(Debug)]
pub struct SpeechRing {
    buf: Vec<i16>,
    write: usize,
    available: usize,
}

impl SpeechRing {
    /// Allocate ring for `capacity` samples
    pub fn with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        Ok(Self {
            buf: zeroed(capacity.max(1))?,
            write: 0,
            available: 0,
        })
    }
    /// Capacity in samples
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
    /// Samples waiting to be played
    pub fn available(&self) -> usize {
        self.available
    }
    /// Position the next sample is written to
    pub fn write_cursor(&self) -> usize {
        self.write
    }
    /// Append all of `samples`, or nothing if they don't fit
    pub fn push(&mut self, samples: &[i16]) -> bool {
        if samples.len() > self.capacity() - self.available {
            return false;
        }
        let cap = self.capacity();
        for &sample in samples {
            self.buf[self.write] = sample;
            self.write += 1;
            if self.write == cap {
                self.write = 0;
            }
        }
        self.available += samples.len();
        true
    }
    /// Move up to `count` samples to `output`, returning how many were moved
    pub fn pop_into(&mut self, count: usize, output: &mut Vec<f64>) -> usize {
        let cap = self.capacity();
        let count = count.min(self.available);
        let mut read = (self.write + cap - self.available) % cap;
        for _ in 0..count {
            output.push(from_i16(self.buf[read]));
            read += 1;
            if read == cap {
                read = 0;
            }
        }
        self.available -= count;
        count
    }
    /// Discard all samples
    pub fn clear(&mut self) {
        self.write = 0;
        self.available = 0;
    }
}

/// Text side channel between host and codec
///
/// The outbound message has a fixed length and is sent over and over.
#[derive(Debug)]
pub struct TextRelay {
    outbound: [u8; TEXT_LEN],
    tx_pos: usize,
    inbound: String,
}

impl Default for TextRelay {
    fn default() -> Self {
        Self {
            outbound: [b' '; TEXT_LEN],
            tx_pos: 0,
            inbound: String::new(),
        }
    }
}

impl TextRelay {
    /// Replace the outbound message (ASCII, padded or cut to fixed length)
    pub fn set_message(&mut self, text: &str) {
        self.outbound = [b' '; TEXT_LEN];
        for (dst, src) in self
            .outbound
            .iter_mut()
            .zip(text.bytes().filter(|c| c.is_ascii() && !c.is_ascii_control()))
        {
            *dst = src;
        }
        self.tx_pos = 0;
    }
    /// Take received text
    pub fn take_received(&mut self) -> String {
        std::mem::take(&mut self.inbound)
    }
}

impl TextPort for TextRelay {
    fn next_tx_char(&mut self) -> u8 {
        let c = self.outbound[self.tx_pos];
        self.tx_pos = (self.tx_pos + 1) % TEXT_LEN;
        c
    }
    fn put_rx_char(&mut self, c: u8) {
        if c.is_ascii() && (!c.is_ascii_control() || c == b'\r' || c == b'\n') {
            if self.inbound.len() >= MAX_RX_TEXT {
                self.inbound.remove(0);
            }
            self.inbound.push(c as char);
        }
    }
}

/// One codec instance with its receive buffers
pub struct VoiceChannel {
    session: Box<dyn CodecSession>,
    demod: Vec<Complex<f32>>,
    demod_fill: usize,
    nin: usize,
    modem_scratch: Vec<i16>,
    speech_scratch: Vec<i16>,
    ring: SpeechRing,
    playing: bool,
    overflows: u64,
    out_ratio: CountRatio,
    n_speech: usize,
}

struct FrameStatus {
    sync: bool,
    snr: Option<f32>,
}

impl VoiceChannel {
    fn new(
        session: Box<dyn CodecSession>,
        speech_rate: u32,
        modem_rate: u32,
    ) -> Result<Self, TryReserveError> {
        let n_speech = session.n_speech_samples();
        let n_max = session.n_max_modem_samples().max(session.n_nom_modem_samples());
        let nin = session.nin().clamp(1, n_max.max(1));
        Ok(Self {
            demod: zeroed(n_max)?,
            demod_fill: 0,
            nin,
            modem_scratch: zeroed(n_max)?,
            speech_scratch: zeroed(2 * n_speech)?,
            ring: SpeechRing::with_capacity(RING_FRAMES * n_speech)?,
            playing: false,
            overflows: 0,
            out_ratio: CountRatio::new(speech_rate, modem_rate),
            n_speech,
            session,
        })
    }
    fn decode_frame(
        &mut self,
        mode: VoiceMode,
        caps: Capabilities,
        squelch: bool,
        text: &mut dyn TextPort,
    ) -> FrameStatus {
        let nin = self.nin;
        let count = if mode.descriptor().is_real_modulation {
            for (dst, src) in self.modem_scratch[..nin].iter_mut().zip(&self.demod[..nin]) {
                *dst = src.re.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            }
            self.session
                .decode(&self.modem_scratch[..nin], &mut self.speech_scratch, text)
        } else {
            self.session
                .decode_complex(&self.demod[..nin], &mut self.speech_scratch, text)
        };
        self.demod_fill = 0;
        self.nin = self.session.nin().clamp(1, self.demod.len());
        let status = if caps.contains(Capabilities::MODEM_STATS) {
            let (sync, snr) = self.session.modem_stats();
            FrameStatus {
                sync,
                snr: Some(snr),
            }
        } else {
            FrameStatus {
                sync: self.session.sync(),
                snr: None,
            }
        };
        let count = count.min(self.speech_scratch.len());
        if count > 0 {
            let require_sync = squelch && mode.squelch_requires_sync();
            if require_sync {
                if status.sync && !self.ring.push(&self.speech_scratch[..count]) {
                    self.overflows += 1;
                }
            } else if self.ring.available() >= self.ring.capacity() * 2 / 3
                || !self.ring.push(&self.speech_scratch[..count])
            {
                self.overflows += 1;
            }
        }
        status
    }
    fn play(&mut self, count: usize, output: &mut Vec<f64>) {
        if !self.playing && self.ring.available() >= PLAYBACK_THRESHOLD_FRAMES * self.n_speech {
            self.playing = true;
        }
        let played = if self.playing {
            let played = self.ring.pop_into(count, output);
            if self.ring.available() == 0 {
                self.playing = false;
            }
            played
        } else {
            0
        };
        output.extend(repeat(0.0).take(count - played));
    }
}

/// Transmit side of the primary channel
struct Encoder {
    speech: Vec<i16>,
    fill: usize,
    modem_real: Vec<i16>,
    modem_complex: Vec<Complex<f32>>,
    fifo: VecDeque<Complex<f64>>,
    ratio: CountRatio,
    real: bool,
}

impl Encoder {
    fn new(
        session: &dyn CodecSession,
        real: bool,
        speech_rate: u32,
        modem_rate: u32,
    ) -> Result<Self, TryReserveError> {
        let n_nom = session.n_nom_modem_samples();
        let mut fifo = VecDeque::new();
        fifo.try_reserve_exact(4 * n_nom)?;
        Ok(Self {
            speech: zeroed(session.n_speech_samples().max(1))?,
            fill: 0,
            modem_real: if real { zeroed(n_nom)? } else { Vec::new() },
            modem_complex: if real { Vec::new() } else { zeroed(n_nom)? },
            fifo,
            ratio: CountRatio::new(modem_rate, speech_rate),
            real,
        })
    }
    fn encode_frame(&mut self, session: &mut dyn CodecSession, text: &mut dyn TextPort) {
        if self.real {
            session.encode(&self.speech, &mut self.modem_real, text);
            self.fifo.extend(
                self.modem_real
                    .iter()
                    .map(|&x| Complex::new(from_i16(x), 0.0)),
            );
        } else {
            session.encode_complex(&self.speech, &mut self.modem_complex, text);
            self.fifo.extend(self.modem_complex.iter().map(|x| {
                Complex::new(x.re as f64 / FULL_SCALE, x.im as f64 / FULL_SCALE)
            }));
        }
        self.fill = 0;
    }
}

/// Availability of the codec library
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CodecStatus {
    /// No usable library; all calls are no-ops
    Unavailable,
    /// Library loaded
    Ready {
        /// Library version
        version: i32,
    },
}

/// Owner of the codec instances and their buffers
pub struct ChannelManager {
    library: Option<Arc<dyn CodecLibrary>>,
    caps: Capabilities,
    version: i32,
    config: VoiceConfig,
    handle: ControlHandle,
    control: ControlState,
    squelch: bool,
    requested: Option<VoiceMode>,
    current: Option<VoiceMode>,
    speech_rate: u32,
    modem_rate: u32,
    channels: Vec<VoiceChannel>,
    encoder: Option<Encoder>,
    text: TextRelay,
    sync: bool,
    snr: Option<f32>,
}

impl ChannelManager {
    /// Create manager; without a `library` the subsystem stays disabled
    pub fn new(library: Option<Arc<dyn CodecLibrary>>, config: VoiceConfig) -> Self {
        let (handle, control) = control_channel(config.squelch);
        let (caps, version) = match &library {
            Some(library) => (library.capabilities(), library.version()),
            None => (Capabilities::NONE, -1),
        };
        let mut text = TextRelay::default();
        text.set_message(&config.text);
        Self {
            library,
            caps,
            version,
            squelch: config.squelch,
            config,
            handle,
            control,
            requested: None,
            current: None,
            speech_rate: DEFAULT_SAMPLE_RATE,
            modem_rate: DEFAULT_SAMPLE_RATE,
            channels: Vec::new(),
            encoder: None,
            text,
            sync: false,
            snr: None,
        }
    }
    /// Handle for staging requests from other threads
    pub fn control(&self) -> ControlHandle {
        self.handle.clone()
    }
    /// Availability of the codec library
    pub fn status(&self) -> CodecStatus {
        match self.library {
            Some(_) => CodecStatus::Ready {
                version: self.version,
            },
            None => CodecStatus::Unavailable,
        }
    }
    /// Mode in effect
    pub fn current_mode(&self) -> Option<VoiceMode> {
        self.current
    }
    /// Mode staged by the last request
    pub fn requested_mode(&self) -> Option<VoiceMode> {
        self.requested
    }
    /// Speech rate of the open mode
    pub fn speech_sample_rate(&self) -> u32 {
        self.speech_rate
    }
    /// Modem rate of the open mode
    pub fn modem_sample_rate(&self) -> u32 {
        self.modem_rate
    }
    /// Number of open channels (primary plus auxiliary)
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
    /// Decoded speech samples waiting in a channel's ring
    pub fn available(&self, channel: usize) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |ch| ch.ring.available())
    }
    /// Whether a channel is currently playing decoded speech
    pub fn is_playing(&self, channel: usize) -> bool {
        self.channels.get(channel).map_or(false, |ch| ch.playing)
    }
    /// Decoded frames dropped because a channel's ring was too full
    pub fn overflows(&self, channel: usize) -> u64 {
        self.channels.get(channel).map_or(0, |ch| ch.overflows)
    }
    /// Primary channel is synchronized
    pub fn sync(&self) -> bool {
        self.sync
    }
    /// SNR estimate of the primary channel in decibels, if the library
    /// reports one
    pub fn snr_estimate(&self) -> Option<f32> {
        self.snr
    }
    /// Squelch flag in effect
    pub fn squelch(&self) -> bool {
        self.squelch
    }
    /// Replace the outbound text message
    pub fn set_tx_text(&mut self, text: &str) {
        self.text.set_message(text);
    }
    /// Take text received since the last call
    pub fn take_rx_text(&mut self) -> String {
        self.text.take_received()
    }
    fn check_gate(&self, mode: VoiceMode) -> Result<(), CodecError> {
        if self.library.is_none() {
            return Err(CodecError::Disabled);
        }
        let desc = mode.descriptor();
        if desc.needs_vector_math && !self.caps.contains(Capabilities::VECTOR_MATH) {
            return Err(CodecError::CapabilityGate {
                mode,
                reason: GateFailure::VectorMath,
            });
        }
        if self.version < desc.min_version {
            return Err(CodecError::CapabilityGate {
                mode,
                reason: GateFailure::LibraryVersion {
                    required: desc.min_version,
                    found: self.version,
                },
            });
        }
        Ok(())
    }
    fn clear_request(&mut self) {
        self.requested = None;
        self.handle.request_mode(None);
    }
    /// Stage a mode, to take effect on [`apply_pending_mode`]
    ///
    /// A mode failing its capability gate clears the request.
    ///
    /// [`apply_pending_mode`]: Self::apply_pending_mode
    pub fn select_mode(&mut self, mode: Option<VoiceMode>) -> Result<(), CodecError> {
        if let Some(mode) = mode {
            if let Err(err) = self.check_gate(mode) {
                log::warn!("cannot select voice mode {}: {}", mode, err);
                self.clear_request();
                return Err(err);
            }
        }
        self.requested = mode;
        self.handle.request_mode(mode);
        Ok(())
    }
    /// Stage a mode given by its codec library id
    pub fn select_mode_id(&mut self, id: i32) -> Result<(), CodecError> {
        match VoiceMode::from_id(id) {
            Some(mode) => self.select_mode(Some(mode)),
            None => {
                self.clear_request();
                Err(CodecError::UnknownMode(id))
            }
        }
    }
    fn poll_control(&mut self) {
        if let Some(mode) = self.control.poll_mode() {
            self.requested = mode;
        }
        if let Some(squelch) = self.control.poll_squelch() {
            self.squelch = squelch;
            if self.caps.contains(Capabilities::SQUELCH) {
                let threshold = self.config.snr_squelch_db;
                for ch in self.channels.iter_mut() {
                    ch.session.set_squelch(squelch, threshold);
                }
            }
        }
    }
    /// Switch to the staged mode if it differs from the current one
    ///
    /// Returns whether the mode changed. On error the manager is closed and
    /// the request is cleared.
    pub fn apply_pending_mode(&mut self) -> Result<bool, CodecError> {
        self.poll_control();
        if self.requested == self.current {
            return Ok(false);
        }
        self.close();
        let Some(mode) = self.requested else {
            return Ok(true);
        };
        match self.open(mode) {
            Ok(()) => {
                log::info!(
                    "voice mode {} open, speech {} Hz, modem {} Hz, {} channel(s)",
                    mode,
                    self.speech_rate,
                    self.modem_rate,
                    self.channels.len()
                );
                self.current = Some(mode);
                Ok(true)
            }
            Err(err) => {
                log::warn!("opening voice mode {} failed: {}", mode, err);
                self.close();
                self.clear_request();
                Err(err)
            }
        }
    }
    fn open_session(
        &self,
        library: &dyn CodecLibrary,
        mode: VoiceMode,
    ) -> Option<Box<dyn CodecSession>> {
        if mode.descriptor().advanced_open && self.caps.contains(Capabilities::ADVANCED_OPEN) {
            library.open_advanced(
                mode,
                &AdvancedParams {
                    interleave_frames: self.config.interleave_frames,
                },
            )
        } else {
            library.open(mode)
        }
    }
    fn open(&mut self, mode: VoiceMode) -> Result<(), CodecError> {
        self.check_gate(mode)?;
        let library = self.library.clone().ok_or(CodecError::Disabled)?;
        let rejected = |_| CodecError::OpenRejected(mode);
        let count = 1 + self.config.aux_channels.min(MAX_AUX_CHANNELS);
        let mut channels = Vec::with_capacity(count);
        for _ in 0..count {
            let mut session = self
                .open_session(library.as_ref(), mode)
                .ok_or(CodecError::OpenRejected(mode))?;
            if channels.is_empty() {
                if self.caps.contains(Capabilities::SAMPLE_RATES) {
                    self.speech_rate = session.speech_sample_rate();
                    self.modem_rate = session.modem_sample_rate();
                } else {
                    self.speech_rate = DEFAULT_SAMPLE_RATE;
                    self.modem_rate = DEFAULT_SAMPLE_RATE;
                }
            }
            if self.speech_rate == 0
                || self.modem_rate == 0
                || session.n_speech_samples() == 0
                || session.n_nom_modem_samples() == 0
            {
                return Err(CodecError::OpenRejected(mode));
            }
            if self.caps.contains(Capabilities::SQUELCH) {
                session.set_squelch(self.squelch, self.config.snr_squelch_db);
            }
            if self.caps.contains(Capabilities::BAND_LIMIT) {
                session.set_tx_band_limit(self.config.tx_band_limit);
            }
            channels.push(
                VoiceChannel::new(session, self.speech_rate, self.modem_rate).map_err(rejected)?,
            );
        }
        let encoder = Encoder::new(
            channels[0].session.as_ref(),
            mode.descriptor().is_real_modulation,
            self.speech_rate,
            self.modem_rate,
        )
        .map_err(rejected)?;
        self.channels = channels;
        self.encoder = Some(encoder);
        Ok(())
    }
    /// Release the codec instances and buffers of the current mode
    ///
    /// Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(mode) = self.current.take() {
            log::info!("voice mode {} closed", mode);
        }
        self.channels.clear();
        self.encoder = None;
        self.sync = false;
        self.snr = None;
        self.speech_rate = DEFAULT_SAMPLE_RATE;
        self.modem_rate = DEFAULT_SAMPLE_RATE;
    }
    /// Close the current mode and release the library
    pub fn shutdown(&mut self) {
        self.close();
        self.requested = None;
        self.library = None;
        self.caps = Capabilities::NONE;
    }
    /// Decode demodulated samples of `channel`
    ///
    /// `input` has the modem rate; real modes use the real part only. Speech
    /// at the speech rate is appended to `output`, its count being
    /// `input.len()` scaled by the ratio of speech rate to modem rate.
    /// Returns the number of appended samples (zero when no mode is open).
    pub fn decode_block(
        &mut self,
        input: &[Complex<f64>],
        channel: usize,
        output: &mut Vec<f64>,
    ) -> usize {
        let Some(mode) = self.current else {
            return 0;
        };
        let caps = self.caps;
        let squelch = self.squelch;
        let Some(ch) = self.channels.get_mut(channel) else {
            return 0;
        };
        let mut no_text = NoText;
        let text: &mut dyn TextPort = if channel == 0 && caps.contains(Capabilities::TEXT) {
            &mut self.text
        } else {
            &mut no_text
        };
        let mut last_status = None;
        for &sample in input {
            ch.demod[ch.demod_fill] = Complex::new(
                (sample.re * FULL_SCALE) as f32,
                (sample.im * FULL_SCALE) as f32,
            );
            ch.demod_fill += 1;
            if ch.demod_fill >= ch.nin {
                last_status = Some(ch.decode_frame(mode, caps, squelch, text));
            }
        }
        let count = ch.out_ratio.scale(input.len());
        ch.play(count, output);
        if let (0, Some(status)) = (channel, last_status) {
            self.sync = status.sync;
            self.snr = status.snr;
        }
        count
    }
    /// Encode speech at the speech rate into modem samples
    ///
    /// Modem samples are appended to `output` in proportion to the consumed
    /// speech; output not yet covered by an encoded frame is zero. Returns
    /// the number of appended samples (zero when no mode is open).
    pub fn encode_block(&mut self, speech: &[f64], output: &mut Vec<Complex<f64>>) -> usize {
        let (Some(ch), Some(encoder)) = (self.channels.first_mut(), self.encoder.as_mut()) else {
            return 0;
        };
        let mut no_text = NoText;
        let text: &mut dyn TextPort = if self.caps.contains(Capabilities::TEXT) {
            &mut self.text
        } else {
            &mut no_text
        };
        for &sample in speech {
            encoder.speech[encoder.fill] = to_i16(sample);
            encoder.fill += 1;
            if encoder.fill == encoder.speech.len() {
                encoder.encode_frame(ch.session.as_mut(), text);
            }
        }
        let count = encoder.ratio.scale(speech.len());
        for _ in 0..count {
            output.push(encoder.fifo.pop_front().unwrap_or_default());
        }
        count
    }
}

//! Scripted in-memory codec for tests
//!
//! Frames last 40 ms. Decoding an all-zero frame loses sync and yields no
//! speech; any other frame is "in sync" and yields one frame of speech equal
//! to the first modem sample. Encoding stretches the speech frame over the
//! modem frame.

use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub(crate) struct FakeLibrary {
    version: i32,
    caps: Capabilities,
    nin_script: Vec<usize>,
    unsynced: bool,
    pub(crate) live: Arc<AtomicUsize>,
    pub(crate) opened: Arc<AtomicUsize>,
    pub(crate) tx_text: Arc<Mutex<Vec<u8>>>,
}

impl FakeLibrary {
    pub(crate) fn new(version: i32) -> Self {
        Self {
            version,
            caps: Capabilities::SAMPLE_RATES
                | Capabilities::MODEM_STATS
                | Capabilities::ADVANCED_OPEN
                | Capabilities::TEXT
                | Capabilities::SQUELCH
                | Capabilities::VECTOR_MATH,
            nin_script: Vec::new(),
            unsynced: false,
            live: Default::default(),
            opened: Default::default(),
            tx_text: Default::default(),
        }
    }
    pub(crate) fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }
    /// Cycle through the given `nin` values instead of the nominal frame
    pub(crate) fn with_nin_script(mut self, script: Vec<usize>) -> Self {
        self.nin_script = script;
        self
    }
    /// Decode speech from non-silent frames without ever reporting sync
    pub(crate) fn with_unsynced_speech(mut self) -> Self {
        self.unsynced = true;
        self
    }
}

impl CodecLibrary for FakeLibrary {
    fn version(&self) -> i32 {
        self.version
    }
    fn capabilities(&self) -> Capabilities {
        self.caps
    }
    fn open(&self, mode: VoiceMode) -> Option<Box<dyn CodecSession>> {
        let desc = mode.descriptor();
        let n_speech = desc.speech_sample_rate as usize / 25;
        let n_nom = desc.modem_sample_rate as usize / 25;
        self.live.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(FakeSession {
            desc: *desc,
            n_speech,
            n_nom,
            nin_script: self.nin_script.clone(),
            nin_pos: 0,
            sync: false,
            unsynced: self.unsynced,
            live: self.live.clone(),
            tx_text: self.tx_text.clone(),
        }))
    }
    fn open_advanced(
        &self,
        mode: VoiceMode,
        _params: &AdvancedParams,
    ) -> Option<Box<dyn CodecSession>> {
        self.open(mode)
    }
}

pub(crate) struct FakeSession {
    desc: crate::mode::ModeDescriptor,
    n_speech: usize,
    n_nom: usize,
    nin_script: Vec<usize>,
    nin_pos: usize,
    sync: bool,
    unsynced: bool,
    live: Arc<AtomicUsize>,
    tx_text: Arc<Mutex<Vec<u8>>>,
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeSession {
    fn stretch<T: Copy>(&self, speech: &[i16], modem: &mut [T], f: impl Fn(i16) -> T) {
        let len = modem.len();
        for (i, out) in modem.iter_mut().enumerate() {
            *out = f(speech[(i * speech.len() / len).min(speech.len() - 1)]);
        }
    }
    fn frame_done(&mut self, first: i16, silent: bool, speech: &mut [i16], text: &mut dyn TextPort) -> usize {
        if !self.nin_script.is_empty() {
            self.nin_pos = (self.nin_pos + 1) % self.nin_script.len();
        }
        self.sync = !silent && !self.unsynced;
        if silent {
            return 0;
        }
        text.put_rx_char(b'K');
        speech[..self.n_speech].fill(first);
        self.n_speech
    }
}

impl CodecSession for FakeSession {
    fn n_speech_samples(&self) -> usize {
        self.n_speech
    }
    fn n_max_modem_samples(&self) -> usize {
        self.n_nom + self.n_nom / 10
    }
    fn n_nom_modem_samples(&self) -> usize {
        self.n_nom
    }
    fn nin(&self) -> usize {
        if self.nin_script.is_empty() {
            self.n_nom
        } else {
            self.nin_script[self.nin_pos]
        }
    }
    fn encode(&mut self, speech: &[i16], modem: &mut [i16], text: &mut dyn TextPort) {
        assert!(self.desc.is_real_modulation);
        self.tx_text.lock().unwrap().push(text.next_tx_char());
        self.stretch(speech, modem, |x| x);
    }
    fn encode_complex(
        &mut self,
        speech: &[i16],
        modem: &mut [Complex<f32>],
        text: &mut dyn TextPort,
    ) {
        assert!(!self.desc.is_real_modulation);
        self.tx_text.lock().unwrap().push(text.next_tx_char());
        self.stretch(speech, modem, |x| Complex::new(x as f32, 0.0));
    }
    fn decode(&mut self, modem: &[i16], speech: &mut [i16], text: &mut dyn TextPort) -> usize {
        let silent = modem.iter().all(|&x| x == 0);
        self.frame_done(modem[0], silent, speech, text)
    }
    fn decode_complex(
        &mut self,
        modem: &[Complex<f32>],
        speech: &mut [i16],
        text: &mut dyn TextPort,
    ) -> usize {
        let silent = modem.iter().all(|x| x.re == 0.0 && x.im == 0.0);
        self.frame_done(modem[0].re as i16, silent, speech, text)
    }
    fn sync(&self) -> bool {
        self.sync
    }
    fn modem_stats(&self) -> (bool, f32) {
        (self.sync, if self.sync { 7.5 } else { -5.0 })
    }
    fn speech_sample_rate(&self) -> u32 {
        self.desc.speech_sample_rate
    }
    fn modem_sample_rate(&self) -> u32 {
        self.desc.modem_sample_rate
    }
}

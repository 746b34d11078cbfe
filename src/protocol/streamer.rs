//! Fixed-block I/Q streamer
//!
//! Collects interleaved little-endian 16-bit I/Q words into one datagram of
//! a fixed number of words and sends it as soon as it is full.

use super::{send_counted, Counters, DatagramSink, Notifier};
use crate::config::StreamerConfig;
use crate::error::TransportError;
use crate::numbers::*;

/// Streamer of fixed-size I/Q datagrams
pub struct FixedBlockStreamer {
    config: StreamerConfig,
    words: usize,
    buffer: Vec<u8>,
    counters: Counters,
    notifier: Notifier,
}

impl FixedBlockStreamer {
    /// Create streamer
    ///
    /// The block size is rounded down to whole I/Q pairs.
    pub fn new(config: StreamerConfig, notifier: Notifier) -> Self {
        let words = (config.block_words & !1).max(2);
        let mut streamer = Self {
            buffer: Vec::with_capacity(2 * words + 1),
            words,
            config,
            counters: Counters::default(),
            notifier,
        };
        streamer.reset();
        streamer
    }
    /// Size of a full datagram in bytes
    pub fn datagram_len(&self) -> usize {
        2 * self.words + self.config.pad_byte as usize
    }
    /// Pairs buffered for the next datagram
    pub fn buffered_pairs(&self) -> usize {
        (self.buffer.len() - self.config.pad_byte as usize) / 4
    }
    /// Event counters
    pub fn counters(&self) -> Counters {
        self.counters
    }
    /// Enable or disable the static correction
    pub fn set_correction(&mut self, enabled: bool, gain: f64, offset: Complex<f64>) {
        self.config.correction = enabled;
        self.config.gain = gain;
        self.config.offset_i = offset.re;
        self.config.offset_q = offset.im;
    }
    fn reset(&mut self) {
        self.buffer.clear();
        if self.config.pad_byte {
            self.buffer.push(0);
        }
    }
    fn correct(&self, sample: Complex<f64>) -> Complex<f64> {
        if self.config.correction {
            Complex::new(
                sample.re * self.config.gain + self.config.offset_i,
                sample.im * self.config.gain + self.config.offset_q,
            )
        } else {
            sample
        }
    }
    /// Append samples, sending every datagram that fills up
    ///
    /// All of `samples` is consumed even if a send fails; the last failure
    /// is returned. On success, returns the number of datagrams sent.
    pub fn push(
        &mut self,
        samples: &[Complex<f64>],
        sink: &mut dyn DatagramSink,
    ) -> Result<usize, TransportError> {
        let mut sent = 0;
        let mut failure = None;
        for &sample in samples {
            let sample = self.correct(sample);
            self.buffer.extend_from_slice(&to_i16(sample.re).to_le_bytes());
            self.buffer.extend_from_slice(&to_i16(sample.im).to_le_bytes());
            if self.buffer.len() == self.datagram_len() {
                self.counters.packets += 1;
                match send_counted(sink, &self.buffer, &mut self.counters, &self.notifier) {
                    Ok(()) => sent += 1,
                    Err(err) => {
                        log::debug!("streamer datagram dropped: {}", err);
                        failure = Some(err);
                    }
                }
                self.reset();
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(sent),
        }
    }
}

//! Windowed 1032-byte packet protocol
//!
//! Each packet carries an 8-byte header and two 512-byte sub-frames. A
//! sub-frame starts with three sync bytes, a control byte holding the
//! rotating register index and the transmit key, and four bytes of register
//! payload; the rest is 63 sample frames of four reserved bytes and
//! big-endian I and Q.
//!
//! The transmit samples are taken from a [`ProtocolRing`] at
//! [`REFERENCE_RATE`]. The ring is kept half full with silence while the key
//! is up, so keying down never starts with an underflow.

use super::keyer::Keyer;
use super::{send_counted, Counters, DatagramSink, Notice, Notifier};
use crate::config::ProtocolConfig;
use crate::error::TransportError;
use crate::numbers::*;

use std::collections::VecDeque;

/// Sample rate of the ring and of the packets
pub const REFERENCE_RATE: u32 = 48000;
/// Bytes per packet
pub const PACKET_LEN: usize = 1032;
/// Bytes per sub-frame
pub const SUBFRAME_LEN: usize = 512;
/// Sample frames per sub-frame
pub const PAIRS_PER_SUBFRAME: usize = 63;
/// Sample frames per packet
pub const PAIRS_PER_PACKET: usize = 2 * PAIRS_PER_SUBFRAME;
/// Number of control register indices
pub const REGISTER_COUNT: u8 = 17;
/// Register index carrying diagnostics
pub const DIAGNOSTIC_REGISTER: u8 = 9;
/// Minimum time between two hardware writes in packets
pub const WRITE_INTERVAL_PACKETS: u64 =
    (REFERENCE_RATE as u64 * 20 / 1000 + PAIRS_PER_PACKET as u64 - 1) / PAIRS_PER_PACKET as u64;

const HEADER_SYNC: [u8; 4] = [0xEF, 0xFE, 0x01, 0x02];
const SUBFRAME_SYNC: [u8; 3] = [0x7F, 0x7F, 0x7F];
const HEADER_LEN: usize = 8;
const CONTROL_LEN: usize = 8;
const SAMPLE_FRAME_LEN: usize = 8;
const WRITE_FLAG: u8 = 0x80;
const DUPLEX: u8 = 0x04;
const MAX_PENDING_WRITES: usize = 64;
/// Smallest ring whose cushion covers one packet
const MIN_RING_CAPACITY: usize = 2 * PAIRS_PER_PACKET;

/// Ring of interleaved signed 16-bit I/Q pairs
#[derive(Debug)]
pub struct ProtocolRing {
    buf: Vec<[i16; 2]>,
    read: usize,
    count: usize,
    zeroed: bool,
}

impl ProtocolRing {
    /// Ring holding `capacity` pairs, initially a silent cushion
    pub fn with_capacity(capacity: usize) -> Self {
        let mut ring = Self {
            buf: vec![[0; 2]; capacity.max(2)],
            read: 0,
            count: 0,
            zeroed: false,
        };
        ring.reset_cushion();
        ring
    }
    /// Capacity in pairs
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
    /// Buffered pairs
    pub fn len(&self) -> usize {
        self.count
    }
    /// True if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
    /// Pairs kept as cushion
    pub fn cushion(&self) -> usize {
        self.capacity() / 2
    }
    /// Position of the next pair read
    pub fn read_cursor(&self) -> usize {
        self.read
    }
    /// Position of the next pair written
    pub fn write_cursor(&self) -> usize {
        (self.read + self.count) % self.capacity()
    }
    /// True if the whole buffer is silence since the last reset
    pub fn is_zeroed(&self) -> bool {
        self.zeroed
    }
    /// Buffered pairs, oldest first
    pub fn pairs(&self) -> impl Iterator<Item = [i16; 2]> + '_ {
        (0..self.count).map(move |i| self.buf[(self.read + i) % self.capacity()])
    }
    /// Fill with silence, leaving a half-full cushion
    pub fn reset_cushion(&mut self) {
        self.buf.fill([0; 2]);
        self.zeroed = true;
        self.reset_cursors();
    }
    /// Rewind to a half-full cushion without touching the contents
    pub fn reset_cursors(&mut self) {
        self.read = 0;
        self.count = self.cushion();
    }
    /// Drop the oldest pairs, keeping the newest cushion, and return how
    /// many were dropped
    pub fn trim_to_cushion(&mut self) -> usize {
        let dropped = self.count.saturating_sub(self.cushion());
        self.read = (self.read + dropped) % self.capacity();
        self.count -= dropped;
        dropped
    }
    /// Append a pair unless full
    pub fn push(&mut self, pair: [i16; 2]) -> bool {
        if self.count == self.capacity() {
            return false;
        }
        let write = self.write_cursor();
        self.buf[write] = pair;
        self.count += 1;
        if pair != [0; 2] {
            self.zeroed = false;
        }
        true
    }
    /// Remove the oldest pair
    pub fn pop(&mut self) -> Option<[i16; 2]> {
        if self.count == 0 {
            return None;
        }
        let pair = self.buf[self.read];
        self.read = (self.read + 1) % self.capacity();
        self.count -= 1;
        Some(pair)
    }
}

/// State of the hardware-write credit
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WriteCredit {
    /// No write pending
    Idle,
    /// A write is queued and waits for its slot
    Ready,
    /// A write was sent and waits for acknowledgment
    AwaitingAck,
}

/// Queued hardware register write
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HardwareWrite {
    /// Register address (7 bits)
    pub address: u8,
    /// Register payload
    pub payload: [u8; 4],
}

/// Packet builder and sender of the windowed protocol
pub struct WindowedProtocol {
    config: ProtocolConfig,
    ring: ProtocolRing,
    keyer: Keyer,
    key_down: bool,
    registers: [[u8; 4]; REGISTER_COUNT as usize],
    index: u8,
    sequence: u32,
    packet: [u8; PACKET_LEN],
    pending: VecDeque<HardwareWrite>,
    credit: WriteCredit,
    last_write: Option<u64>,
    counters: Counters,
    notifier: Notifier,
}

impl WindowedProtocol {
    /// Create engine
    ///
    /// The ring holds at least two packets of pairs.
    pub fn new(config: ProtocolConfig, notifier: Notifier) -> Self {
        Self {
            ring: ProtocolRing::with_capacity(config.ring_capacity.max(MIN_RING_CAPACITY)),
            keyer: Keyer::new(REFERENCE_RATE, config.keyer_level, config.keyer_delay_ms),
            config,
            key_down: false,
            registers: [[0; 4]; REGISTER_COUNT as usize],
            index: 0,
            sequence: 0,
            packet: [0; PACKET_LEN],
            pending: VecDeque::new(),
            credit: WriteCredit::Idle,
            last_write: None,
            counters: Counters::default(),
            notifier,
        }
    }
    /// Transmit ring
    pub fn ring(&self) -> &ProtocolRing {
        &self.ring
    }
    /// Event counters
    pub fn counters(&self) -> Counters {
        self.counters
    }
    /// Sequence number of the next packet
    pub fn sequence(&self) -> u32 {
        self.sequence
    }
    /// Register index of the next sub-frame
    pub fn register_index(&self) -> u8 {
        self.index
    }
    /// State of the hardware-write credit
    pub fn write_credit(&self) -> WriteCredit {
        self.credit
    }
    /// Whether the transmit key bit is set in outgoing packets
    pub fn is_keyed(&self) -> bool {
        self.key_down || self.keyer.is_active()
    }
    /// Internal keyer
    pub fn keyer(&self) -> &Keyer {
        &self.keyer
    }
    /// Press or release the internal CW key
    pub fn set_cw_key(&mut self, down: bool) {
        self.keyer.set_key(down);
    }
    /// Unkey, silence the internal keyer and refill the ring with its cushion
    pub fn reset(&mut self) {
        self.keyer.reset();
        self.key_down = false;
        self.ring.reset_cushion();
    }
    /// Set payload sent with register `index`
    ///
    /// Index 0 is computed from the configuration and cannot be set.
    pub fn set_control_register(&mut self, index: u8, payload: [u8; 4]) -> bool {
        if index == 0 || index >= REGISTER_COUNT {
            return false;
        }
        self.registers[index as usize] = payload;
        true
    }
    /// Number of receivers reported to the radio
    pub fn set_receivers(&mut self, receivers: u8) {
        self.config.receivers = receivers.clamp(1, 8);
    }
    /// Filter selection reported to the radio
    pub fn set_filter_select(&mut self, filter_select: u8) {
        self.config.filter_select = filter_select;
    }
    /// Queue a hardware register write
    ///
    /// Returns false if the queue is full or the address is out of range.
    pub fn request_write(&mut self, write: HardwareWrite) -> bool {
        if write.address > 0x3F || self.pending.len() >= MAX_PENDING_WRITES {
            return false;
        }
        self.pending.push_back(write);
        if self.credit == WriteCredit::Idle {
            self.credit = WriteCredit::Ready;
        }
        true
    }
    /// Acknowledge the outstanding hardware write
    pub fn acknowledge_write(&mut self) {
        if self.credit == WriteCredit::AwaitingAck {
            self.credit = if self.pending.is_empty() {
                WriteCredit::Idle
            } else {
                WriteCredit::Ready
            };
        }
    }
    /// Append transmit samples at [`REFERENCE_RATE`]
    ///
    /// While `key_down` is false the block is discarded and the ring is held
    /// at its silent cushion.
    pub fn add_samples(&mut self, block: &[Complex<f64>], key_down: bool) {
        if !key_down {
            if self.ring.is_zeroed() {
                self.ring.reset_cursors();
            } else {
                self.ring.reset_cushion();
            }
            self.key_down = false;
            return;
        }
        self.key_down = true;
        for sample in block {
            let pair = [to_i16(sample.re), to_i16(sample.im)];
            if !self.ring.push(pair) {
                let dropped = self.ring.trim_to_cushion();
                self.counters.overflows += 1;
                self.notifier.notify(Notice::Overflow { dropped });
                self.ring.push(pair);
            }
        }
    }
    fn register_payload(&self, index: u8) -> [u8; 4] {
        match index {
            0 => {
                let receivers = self.config.receivers.clamp(1, 8);
                [
                    rate_code(REFERENCE_RATE),
                    self.config.filter_select,
                    0,
                    ((receivers - 1) << 3) | DUPLEX,
                ]
            }
            DIAGNOSTIC_REGISTER if !self.config.diagnostic => [0; 4],
            _ => self.registers[index as usize],
        }
    }
    fn take_write(&mut self) -> Option<HardwareWrite> {
        if self.credit != WriteCredit::Ready {
            return None;
        }
        let packets = self.counters.packets;
        if let Some(last) = self.last_write {
            if packets - last < WRITE_INTERVAL_PACKETS {
                return None;
            }
        }
        let write = self.pending.pop_front()?;
        self.last_write = Some(packets);
        self.credit = WriteCredit::AwaitingAck;
        Some(write)
    }
    /// Build the next packet
    ///
    /// Never blocks: on a short ring the ring is reset to its cushion.
    pub fn next_packet(&mut self) -> &[u8; PACKET_LEN] {
        let keyer_active = self.keyer.is_active();
        if !keyer_active && self.ring.len() < PAIRS_PER_PACKET {
            self.counters.underflows += 1;
            self.notifier.notify(Notice::Underflow {
                buffered: self.ring.len(),
            });
            self.ring.reset_cushion();
        }
        let key = self.is_keyed() as u8;
        let write = self.take_write();
        self.packet[..4].copy_from_slice(&HEADER_SYNC);
        self.packet[4..HEADER_LEN].copy_from_slice(&self.sequence.to_be_bytes());
        for sub in 0..2 {
            let start = HEADER_LEN + sub * SUBFRAME_LEN;
            let (c0, payload) = match (sub, write) {
                (1, Some(write)) => ((write.address << 1) | key | WRITE_FLAG, write.payload),
                _ => ((self.index << 1) | key, self.register_payload(self.index)),
            };
            self.index = (self.index + 1) % REGISTER_COUNT;
            let control = &mut self.packet[start..start + CONTROL_LEN];
            control[..3].copy_from_slice(&SUBFRAME_SYNC);
            control[3] = c0;
            control[4..].copy_from_slice(&payload);
            let samples = start + CONTROL_LEN;
            for i in 0..PAIRS_PER_SUBFRAME {
                let pair = if keyer_active {
                    self.keyer.next_pair()
                } else {
                    self.ring.pop().unwrap_or([0; 2])
                };
                let frame = &mut self.packet
                    [samples + i * SAMPLE_FRAME_LEN..samples + (i + 1) * SAMPLE_FRAME_LEN];
                frame[..4].fill(0);
                frame[4..6].copy_from_slice(&pair[0].to_be_bytes());
                frame[6..].copy_from_slice(&pair[1].to_be_bytes());
            }
        }
        self.sequence = self.sequence.wrapping_add(1);
        self.counters.packets += 1;
        &self.packet
    }
    /// Build the next packet and send it
    pub fn send_next_packet(&mut self, sink: &mut dyn DatagramSink) -> Result<(), TransportError> {
        self.next_packet();
        send_counted(sink, &self.packet, &mut self.counters, &self.notifier)
    }
}

fn rate_code(rate: u32) -> u8 {
    match rate {
        96000 => 1,
        192000 => 2,
        384000 => 3,
        _ => 0,
    }
}

//! Transmit/receive audio core of a software defined radio transceiver
//!
//! **Note:** This crate is in an early alpha stage.
//!
//! The host owns a [`context::Transceiver`] and drives it from its audio
//! thread:
//!
//! * [`pipeline`] conditions microphone audio into baseband I/Q for the
//!   selected transmit mode and limits it with the look-ahead [`alc`].
//! * [`voice`] bridges the FreeDV-style [`codec`] into digital voice, on
//!   transmit and on up to three receive channels.
//! * [`protocol`] frames transmit I/Q into 1032-byte windowed packets or
//!   fixed-size streaming datagrams.
//!
//! Mode and squelch requests from other threads go through a
//! [`control::ControlHandle`].

#![warn(missing_docs)]

pub mod alc;
pub mod codec;
pub mod config;
pub mod context;
pub mod control;
pub mod dsp;
pub mod error;
pub mod level;
pub mod mode;
pub mod numbers;
pub mod pipeline;
pub mod prelude;
pub mod protocol;
pub mod voice;

#[cfg(test)]
mod tests {
    const PRECISION: f64 = 1e-10;
    pub fn assert_approx(a: f64, b: f64) {
        assert!((a - b).abs() <= PRECISION || (a / b).ln().abs() <= PRECISION);
    }
}

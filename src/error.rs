//! Error types
//!
//! None of these errors is fatal for the host process: the subsystem that
//! reports one degrades to a disabled or silent state and keeps running.

use crate::mode::VoiceMode;

use std::io;
use std::path::PathBuf;

/// Errors of the voice codec and the digital-voice channel manager
#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    /// No codec library was found at any of the searched locations
    #[error("voice codec library not found")]
    NotFound,
    /// A library was found but lacks the version entry point
    #[error("voice codec library at {path:?} is incompatible")]
    Incompatible {
        /// Location of the rejected library
        path: PathBuf,
    },
    /// The subsystem is disabled because no codec was resolved
    #[error("digital voice is disabled")]
    Disabled,
    /// Mode id is not known
    #[error("unsupported voice mode id {0}")]
    UnknownMode(i32),
    /// Mode needs a feature the platform or library lacks
    #[error("mode {mode} unavailable: {reason}")]
    CapabilityGate {
        /// Requested mode
        mode: VoiceMode,
        /// Which gate failed
        reason: GateFailure,
    },
    /// The codec refused to open the mode (or allocation failed)
    #[error("codec rejected mode {0}")]
    OpenRejected(VoiceMode),
}

/// Reason for a failed capability gate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateFailure {
    /// Mode needs hardware vector math
    VectorMath,
    /// Mode needs a newer codec library
    LibraryVersion {
        /// Minimum version
        required: i32,
        /// Version of the loaded library
        found: i32,
    },
}

impl std::fmt::Display for GateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateFailure::VectorMath => write!(f, "hardware vector math not available"),
            GateFailure::LibraryVersion { required, found } => {
                write!(f, "codec version {found} found, {required} required")
            }
        }
    }
}

/// Invalid configuration values
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Sample rates without integer ratio
    #[error("no integer ratio between {input} Hz and {output} Hz")]
    RateRatio {
        /// Input rate in hertz
        input: u32,
        /// Output rate in hertz
        output: u32,
    },
    /// Value outside its permitted range
    #[error("{name} = {value} is out of range")]
    OutOfRange {
        /// Name of the setting
        name: &'static str,
        /// Offending value
        value: f64,
    },
}

/// Errors when handing a datagram to the link
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// Fewer bytes than the datagram size were sent
    #[error("short send: {sent} of {expected} bytes")]
    ShortSend {
        /// Bytes accepted by the socket
        sent: usize,
        /// Datagram size
        expected: usize,
    },
    /// Socket error
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

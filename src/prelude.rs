//! Re-export of certain important items

pub use super::alc::Alc;
pub use super::codec::{resolve, Capabilities, CodecLibrary, CodecLoader};
pub use super::config::{AlcConfig, ProtocolConfig, StreamerConfig, TxConfig, VoiceConfig};
pub use super::context::{Transceiver, TransceiverConfig};
pub use super::control::ControlHandle;
pub use super::error::{CodecError, ConfigError, TransportError};
pub use super::mode::{TxMode, VoiceMode};
pub use super::numbers::Complex;
pub use super::pipeline::{Control, Tuning, TxPipeline};
pub use super::protocol::streamer::FixedBlockStreamer;
pub use super::protocol::windowed::WindowedProtocol;
pub use super::protocol::{DatagramSink, Notice, Notifier};
pub use super::voice::ChannelManager;

//! Capability interface to the external voice codec library
//!
//! The codec library is resolved once at startup. Its optional entry points
//! differ between library versions; instead of probing them at each call,
//! a [`Capabilities`] bitmask is computed when the library is loaded and call
//! sites branch on it. Methods of [`CodecSession`] which belong to a
//! capability must only be called if the library reports that capability.

#[cfg(feature = "dynamic-codec")]
pub mod dynamic;
#[cfg(test)]
pub(crate) mod fake;

use crate::error::CodecError;
use crate::mode::VoiceMode;
use crate::numbers::Complex;

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Speech sample rate assumed when the library cannot report it
pub const DEFAULT_SAMPLE_RATE: u32 = 8000;

/// Set of optional features offered by a codec library
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u32);

impl Capabilities {
    /// No optional feature
    pub const NONE: Self = Self(0);
    /// Speech and modem sample rates can be queried
    pub const SAMPLE_RATES: Self = Self(1 << 0);
    /// Modem statistics (sync and SNR) replace the plain sync query
    pub const MODEM_STATS: Self = Self(1 << 1);
    /// Modes can be opened with advanced parameters
    pub const ADVANCED_OPEN: Self = Self(1 << 2);
    /// Text side channel
    pub const TEXT: Self = Self(1 << 3);
    /// Squelch can be configured
    pub const SQUELCH: Self = Self(1 << 4);
    /// Transmit band limiting can be configured
    pub const BAND_LIMIT: Self = Self(1 << 5);
    /// Platform offers the vector math some modes need
    pub const VECTOR_MATH: Self = Self(1 << 6);

    /// True if all capabilities in `other` are present
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
    /// Add capabilities
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl BitOr for Capabilities {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Capabilities, &str); 7] = [
            (Capabilities::SAMPLE_RATES, "SAMPLE_RATES"),
            (Capabilities::MODEM_STATS, "MODEM_STATS"),
            (Capabilities::ADVANCED_OPEN, "ADVANCED_OPEN"),
            (Capabilities::TEXT, "TEXT"),
            (Capabilities::SQUELCH, "SQUELCH"),
            (Capabilities::BAND_LIMIT, "BAND_LIMIT"),
            (Capabilities::VECTOR_MATH, "VECTOR_MATH"),
        ];
        let mut list = f.debug_set();
        for (cap, name) in NAMES {
            if self.contains(cap) {
                list.entry(&format_args!("{name}"));
            }
        }
        list.finish()
    }
}

/// Whether the host CPU offers the vector instructions needed by neural
/// vocoder modes
pub fn platform_vector_math() -> bool {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        is_x86_feature_detected!("avx")
    }
    #[cfg(target_arch = "aarch64")]
    {
        true
    }
    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
    {
        false
    }
}

/// Parameters of [`CodecLibrary::open_advanced`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdvancedParams {
    /// Frames spanned by the interleaver
    pub interleave_frames: u32,
}

/// Text side channel, driven by the codec once per frame
pub trait TextPort {
    /// Next character to transmit
    fn next_tx_char(&mut self) -> u8;
    /// Character received
    fn put_rx_char(&mut self, c: u8);
}

/// [`TextPort`] that sends spaces and drops received text
pub struct NoText;

impl TextPort for NoText {
    fn next_tx_char(&mut self) -> u8 {
        b' '
    }
    fn put_rx_char(&mut self, _: u8) {}
}

/// Loaded codec library
pub trait CodecLibrary: Send + Sync {
    /// Library version
    fn version(&self) -> i32;
    /// Optional features, computed once at load
    fn capabilities(&self) -> Capabilities;
    /// Open a codec instance for `mode`
    fn open(&self, mode: VoiceMode) -> Option<Box<dyn CodecSession>>;
    /// Open a codec instance with advanced parameters
    /// (needs [`Capabilities::ADVANCED_OPEN`])
    fn open_advanced(
        &self,
        mode: VoiceMode,
        params: &AdvancedParams,
    ) -> Option<Box<dyn CodecSession>>;
}

/// Open codec instance; dropping it releases the codec handle
pub trait CodecSession: Send {
    /// Speech samples per frame
    fn n_speech_samples(&self) -> usize;
    /// Largest modem frame
    fn n_max_modem_samples(&self) -> usize;
    /// Nominal modem frame
    fn n_nom_modem_samples(&self) -> usize;
    /// Modem samples needed by the next [`decode`](Self::decode) call
    fn nin(&self) -> usize;
    /// Encode one speech frame into a real modem frame
    fn encode(&mut self, speech: &[i16], modem: &mut [i16], text: &mut dyn TextPort);
    /// Encode one speech frame into a complex modem frame
    fn encode_complex(
        &mut self,
        speech: &[i16],
        modem: &mut [Complex<f32>],
        text: &mut dyn TextPort,
    );
    /// Decode a real modem frame, returning the number of speech samples
    fn decode(&mut self, modem: &[i16], speech: &mut [i16], text: &mut dyn TextPort) -> usize;
    /// Decode a complex modem frame, returning the number of speech samples
    fn decode_complex(
        &mut self,
        modem: &[Complex<f32>],
        speech: &mut [i16],
        text: &mut dyn TextPort,
    ) -> usize;
    /// Demodulator is synchronized
    fn sync(&self) -> bool;
    /// Sync and SNR estimate in decibels (needs [`Capabilities::MODEM_STATS`])
    fn modem_stats(&self) -> (bool, f32) {
        (self.sync(), f32::NAN)
    }
    /// Speech rate (needs [`Capabilities::SAMPLE_RATES`])
    fn speech_sample_rate(&self) -> u32 {
        DEFAULT_SAMPLE_RATE
    }
    /// Modem rate (needs [`Capabilities::SAMPLE_RATES`])
    fn modem_sample_rate(&self) -> u32 {
        DEFAULT_SAMPLE_RATE
    }
    /// Configure squelch (needs [`Capabilities::SQUELCH`])
    fn set_squelch(&mut self, _enabled: bool, _snr_threshold_db: f32) {}
    /// Configure transmit band limiting (needs [`Capabilities::BAND_LIMIT`])
    fn set_tx_band_limit(&mut self, _enabled: bool) {}
}

/// Loads a codec library from a path
pub trait CodecLoader {
    /// Load library at `path`
    ///
    /// Must return [`CodecError::NotFound`] if nothing loadable exists at
    /// `path` and [`CodecError::Incompatible`] if the library lacks the
    /// version entry point.
    fn load(&self, path: &Path) -> Result<Arc<dyn CodecLibrary>, CodecError>;
}

/// Install locations searched for the codec library, in priority order
pub fn default_search_paths() -> Vec<PathBuf> {
    let names: &[&str] = if cfg!(target_os = "windows") {
        &["libcodec2.dll", "codec2.dll"]
    } else if cfg!(target_os = "macos") {
        &["libcodec2.dylib"]
    } else {
        &["libcodec2.so", "libcodec2.so.1.2", "libcodec2.so.1.0"]
    };
    let dirs: &[&str] = if cfg!(target_os = "windows") {
        &["freedvpkg", "."]
    } else {
        &[
            "freedvpkg",
            "/usr/local/lib",
            "/usr/lib",
            "/usr/lib/x86_64-linux-gnu",
            "/usr/lib/aarch64-linux-gnu",
        ]
    };
    let mut paths = Vec::new();
    for dir in dirs {
        for name in names {
            paths.push(Path::new(dir).join(name));
        }
    }
    paths
}

/// Try each candidate path in order and return the first loadable library
///
/// Fails with [`CodecError::Incompatible`] if some candidate existed but was
/// rejected, otherwise with [`CodecError::NotFound`].
pub fn resolve(
    loader: &dyn CodecLoader,
    candidates: &[PathBuf],
) -> Result<Arc<dyn CodecLibrary>, CodecError> {
    let mut rejected: Option<PathBuf> = None;
    for path in candidates {
        match loader.load(path) {
            Ok(library) => {
                log::info!(
                    "voice codec version {} loaded from {:?}, capabilities {:?}",
                    library.version(),
                    path,
                    library.capabilities()
                );
                return Ok(library);
            }
            Err(CodecError::Incompatible { path }) => {
                log::warn!("voice codec at {:?} is incompatible", path);
                rejected.get_or_insert(path);
            }
            Err(_) => (),
        }
    }
    match rejected {
        Some(path) => Err(CodecError::Incompatible { path }),
        None => {
            log::info!("no voice codec found, digital voice disabled");
            Err(CodecError::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    struct ScriptedLoader;
    impl CodecLoader for ScriptedLoader {
        fn load(&self, path: &Path) -> Result<Arc<dyn CodecLibrary>, CodecError> {
            match path.to_str() {
                Some("old") => Err(CodecError::Incompatible {
                    path: path.to_path_buf(),
                }),
                Some("good") => Ok(Arc::new(fake::FakeLibrary::new(14))),
                _ => Err(CodecError::NotFound),
            }
        }
    }
    #[test]
    fn test_capabilities() {
        let mut caps = Capabilities::SAMPLE_RATES | Capabilities::TEXT;
        assert!(caps.contains(Capabilities::TEXT));
        assert!(!caps.contains(Capabilities::TEXT | Capabilities::SQUELCH));
        caps.insert(Capabilities::SQUELCH);
        assert!(caps.contains(Capabilities::TEXT | Capabilities::SQUELCH));
        assert_eq!(format!("{:?}", Capabilities::TEXT), "{TEXT}");
    }
    #[test]
    fn test_resolve_priority() {
        let paths: Vec<PathBuf> = ["missing", "old", "good"].iter().map(PathBuf::from).collect();
        let library = resolve(&ScriptedLoader, &paths).unwrap();
        assert_eq!(library.version(), 14);
    }
    #[test]
    fn test_resolve_failures() {
        let paths: Vec<PathBuf> = ["missing", "old"].iter().map(PathBuf::from).collect();
        assert!(matches!(
            resolve(&ScriptedLoader, &paths),
            Err(CodecError::Incompatible { .. })
        ));
        assert!(matches!(
            resolve(&ScriptedLoader, &[PathBuf::from("missing")]),
            Err(CodecError::NotFound)
        ));
    }
    #[test]
    fn test_search_paths_not_empty() {
        assert!(!default_search_paths().is_empty());
    }
}

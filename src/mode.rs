//! Operating modes and digital-voice mode descriptors

use std::fmt;

/// Transmit operating mode, selecting the conditioning chain
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TxMode {
    /// Lower sideband
    Lsb,
    /// Upper sideband
    Usb,
    /// Amplitude modulation
    Am,
    /// Frequency (phase) modulation
    Fm,
    /// Generic digital data through a sound card modem, upper sideband
    Digital,
    /// Digital voice through the voice codec
    DigitalVoice,
}

impl TxMode {
    /// All operating modes
    pub const ALL: [TxMode; 6] = [
        TxMode::Lsb,
        TxMode::Usb,
        TxMode::Am,
        TxMode::Fm,
        TxMode::Digital,
        TxMode::DigitalVoice,
    ];
    /// Position in per-mode tables
    pub fn index(self) -> usize {
        match self {
            TxMode::Lsb => 0,
            TxMode::Usb => 1,
            TxMode::Am => 2,
            TxMode::Fm => 3,
            TxMode::Digital => 4,
            TxMode::DigitalVoice => 5,
        }
    }
}

/// Digital-voice codec mode
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum VoiceMode {
    /// FreeDV 1600
    Mode1600,
    /// FreeDV 700
    Mode700,
    /// FreeDV 700B
    Mode700B,
    /// FreeDV 2400A
    Mode2400A,
    /// FreeDV 2400B
    Mode2400B,
    /// FreeDV 800XA
    Mode800XA,
    /// FreeDV 700C
    Mode700C,
    /// FreeDV 700D
    Mode700D,
    /// FreeDV 2020
    Mode2020,
    /// FreeDV 700E
    Mode700E,
}

/// Immutable constants of a [`VoiceMode`]
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct ModeDescriptor {
    /// Rate of the modulated waveform in hertz
    pub modem_sample_rate: u32,
    /// Rate of speech consumed and produced by the codec in hertz
    pub speech_sample_rate: u32,
    /// Real (rather than complex) modulation
    pub is_real_modulation: bool,
    /// Center of the transmit filter in hertz
    pub filter_center_frequency: f64,
    /// Oldest codec library version supporting the mode
    pub min_version: i32,
    /// Mode needs hardware vector math
    pub needs_vector_math: bool,
    /// Mode is opened with the advanced open call
    pub advanced_open: bool,
}

const fn descriptor(
    modem_sample_rate: u32,
    speech_sample_rate: u32,
    is_real_modulation: bool,
    filter_center_frequency: f64,
    min_version: i32,
) -> ModeDescriptor {
    ModeDescriptor {
        modem_sample_rate,
        speech_sample_rate,
        is_real_modulation,
        filter_center_frequency,
        min_version,
        needs_vector_math: false,
        advanced_open: false,
    }
}

static MODE_1600: ModeDescriptor = descriptor(8000, 8000, true, 1500.0, 0);
static MODE_700: ModeDescriptor = descriptor(8000, 8000, true, 1500.0, 0);
static MODE_700B: ModeDescriptor = descriptor(8000, 8000, true, 1500.0, 0);
static MODE_2400A: ModeDescriptor = descriptor(48000, 8000, false, 0.0, 0);
static MODE_2400B: ModeDescriptor = descriptor(48000, 8000, true, 1800.0, 0);
static MODE_800XA: ModeDescriptor = descriptor(8000, 8000, true, 1500.0, 0);
static MODE_700C: ModeDescriptor = descriptor(8000, 8000, true, 1500.0, 10);
static MODE_700D: ModeDescriptor = ModeDescriptor {
    advanced_open: true,
    ..descriptor(8000, 8000, true, 1500.0, 11)
};
static MODE_2020: ModeDescriptor = ModeDescriptor {
    needs_vector_math: true,
    ..descriptor(8000, 16000, true, 1500.0, 12)
};
static MODE_700E: ModeDescriptor = ModeDescriptor {
    advanced_open: true,
    ..descriptor(8000, 8000, true, 1500.0, 14)
};

impl VoiceMode {
    /// All voice modes
    pub const ALL: [VoiceMode; 10] = [
        VoiceMode::Mode1600,
        VoiceMode::Mode700,
        VoiceMode::Mode700B,
        VoiceMode::Mode2400A,
        VoiceMode::Mode2400B,
        VoiceMode::Mode800XA,
        VoiceMode::Mode700C,
        VoiceMode::Mode700D,
        VoiceMode::Mode2020,
        VoiceMode::Mode700E,
    ];
    /// Mode id used by the codec library
    pub fn id(self) -> i32 {
        match self {
            VoiceMode::Mode1600 => 0,
            VoiceMode::Mode700 => 1,
            VoiceMode::Mode700B => 2,
            VoiceMode::Mode2400A => 3,
            VoiceMode::Mode2400B => 4,
            VoiceMode::Mode800XA => 5,
            VoiceMode::Mode700C => 6,
            VoiceMode::Mode700D => 7,
            VoiceMode::Mode2020 => 8,
            VoiceMode::Mode700E => 13,
        }
    }
    /// Mode for codec library id
    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.id() == id)
    }
    /// Constants of the mode
    pub fn descriptor(self) -> &'static ModeDescriptor {
        match self {
            VoiceMode::Mode1600 => &MODE_1600,
            VoiceMode::Mode700 => &MODE_700,
            VoiceMode::Mode700B => &MODE_700B,
            VoiceMode::Mode2400A => &MODE_2400A,
            VoiceMode::Mode2400B => &MODE_2400B,
            VoiceMode::Mode800XA => &MODE_800XA,
            VoiceMode::Mode700C => &MODE_700C,
            VoiceMode::Mode700D => &MODE_700D,
            VoiceMode::Mode2020 => &MODE_2020,
            VoiceMode::Mode700E => &MODE_700E,
        }
    }
    /// Decoded audio is kept only while the codec reports sync
    pub fn squelch_requires_sync(self) -> bool {
        self == VoiceMode::Mode1600
    }
}

impl fmt::Display for VoiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VoiceMode::Mode1600 => "1600",
            VoiceMode::Mode700 => "700",
            VoiceMode::Mode700B => "700B",
            VoiceMode::Mode2400A => "2400A",
            VoiceMode::Mode2400B => "2400B",
            VoiceMode::Mode800XA => "800XA",
            VoiceMode::Mode700C => "700C",
            VoiceMode::Mode700D => "700D",
            VoiceMode::Mode2020 => "2020",
            VoiceMode::Mode700E => "700E",
        };
        f.write_str(name)
    }
}

//! Cross-thread control of the audio thread
//!
//! The host control surface may run on any thread. It stages a requested
//! voice mode and the squelch flag through [`watch`] channels; the audio
//! thread picks up changes at a point of its own choosing, so a codec is
//! never torn down while a block is being processed.

use crate::mode::VoiceMode;

use tokio::sync::watch;

use std::sync::Arc;

/// Cloneable handle used by the host to steer the audio thread
#[derive(Clone, Debug)]
pub struct ControlHandle {
    mode: Arc<watch::Sender<Option<VoiceMode>>>,
    squelch: Arc<watch::Sender<bool>>,
}

impl ControlHandle {
    /// Stage a voice mode (or `None` to leave digital voice)
    ///
    /// The request takes effect when the audio thread applies it.
    pub fn request_mode(&self, mode: Option<VoiceMode>) {
        self.mode.send_replace(mode);
    }
    /// Currently staged voice mode
    pub fn requested_mode(&self) -> Option<VoiceMode> {
        *self.mode.borrow()
    }
    /// Enable or disable the squelch
    pub fn set_squelch(&self, enabled: bool) {
        self.squelch.send_replace(enabled);
    }
    /// Squelch flag as last set
    pub fn squelch(&self) -> bool {
        *self.squelch.borrow()
    }
}

/// Audio-thread side of a [`ControlHandle`]
#[derive(Debug)]
pub struct ControlState {
    mode: watch::Receiver<Option<VoiceMode>>,
    squelch: watch::Receiver<bool>,
}

impl ControlState {
    /// Newly staged mode, if the request changed since the last poll
    pub fn poll_mode(&mut self) -> Option<Option<VoiceMode>> {
        if self.mode.has_changed().unwrap_or(false) {
            Some(*self.mode.borrow_and_update())
        } else {
            None
        }
    }
    /// New squelch flag, if it changed since the last poll
    pub fn poll_squelch(&mut self) -> Option<bool> {
        if self.squelch.has_changed().unwrap_or(false) {
            Some(*self.squelch.borrow_and_update())
        } else {
            None
        }
    }
    /// Current squelch flag
    pub fn squelch(&self) -> bool {
        *self.squelch.borrow()
    }
}

/// Create a connected handle and state
pub fn control_channel(squelch: bool) -> (ControlHandle, ControlState) {
    let (mode_tx, mode_rx) = watch::channel(None);
    let (squelch_tx, squelch_rx) = watch::channel(squelch);
    (
        ControlHandle {
            mode: Arc::new(mode_tx),
            squelch: Arc::new(squelch_tx),
        },
        ControlState {
            mode: mode_rx,
            squelch: squelch_rx,
        },
    )
}

//! Session state shared with the rendering and controls layers
//!
//! The pipeline is the only writer. Readers subscribe to a
//! [`tokio::sync::watch`] channel and only ever see whole snapshots.

use std::fmt;

use serde::Serialize;
use tokio::sync::watch;

use super::emotion::Emotion;
use crate::{Error, Result};

/// Where the current turn is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    #[default]
    Idle,
    Listening,
    Transcribing,
    GeneratingReply,
    Responding,
    Ready,
    Error,
    MicError,
}

impl Status {
    /// Whether a new turn may start from this status
    #[must_use]
    pub const fn accepts_start(self) -> bool {
        matches!(self, Self::Idle | Self::Ready | Self::Error | Self::MicError)
    }

    /// Human-readable label for the controls layer
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Listening => "Listening...",
            Self::Transcribing => "Transcribing...",
            Self::GeneratingReply => "Generating reply...",
            Self::Responding => "Responding...",
            Self::Ready => "Ready",
            Self::Error => "Error",
            Self::MicError => "Microphone error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Snapshot of the session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub status: Status,
    pub input_text: String,
    pub reply_text: String,
    pub emotion: Emotion,
    pub is_listening: bool,
    pub is_speaking: bool,
}

/// What the face renderer consumes
#[derive(Debug, Clone)]
pub struct RenderView {
    pub expression: Emotion,
    pub is_speaking: bool,
    /// Output level of the audio currently playing, when the sink reports one
    pub audio_energy: Option<watch::Receiver<f32>>,
}

/// What the controls layer displays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlsView {
    pub status: String,
    pub input_text: String,
    pub reply_text: String,
    pub is_listening: bool,
}

impl SessionState {
    /// Controls projection of this snapshot
    #[must_use]
    pub fn controls(&self) -> ControlsView {
        ControlsView {
            status: self.status.label().to_string(),
            input_text: self.input_text.clone(),
            reply_text: self.reply_text.clone(),
            is_listening: self.is_listening,
        }
    }
}

/// Writer handle for the session state
#[derive(Debug)]
pub struct Session {
    tx: watch::Sender<SessionState>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create an idle session
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::default());
        Self { tx }
    }

    /// Subscribe to snapshots
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> Status {
        self.tx.borrow().status
    }

    /// Claim the session for a new turn
    ///
    /// Resets texts and emotion and enters `Listening`. The check and the
    /// transition happen under one lock, so two racing starts cannot both win.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] if a turn is already in flight
    pub fn begin_turn(&self) -> Result<()> {
        let mut rejected = None;
        self.tx.send_if_modified(|state| {
            if !state.status.accepts_start() {
                rejected = Some(state.status);
                return false;
            }
            *state = SessionState {
                status: Status::Listening,
                is_listening: true,
                ..SessionState::default()
            };
            true
        });

        match rejected {
            Some(status) => Err(Error::Busy(status)),
            None => Ok(()),
        }
    }

    /// Move to a new status
    pub fn set_status(&self, status: Status) {
        self.update(|state| state.status = status);
    }

    /// Recording has stopped
    pub fn stop_listening(&self) {
        self.update(|state| state.is_listening = false);
    }

    /// Record the transcript
    pub fn set_input(&self, text: &str) {
        self.update(|state| text.clone_into(&mut state.input_text));
    }

    /// Append a streamed reply fragment
    pub fn append_reply(&self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        self.update(|state| state.reply_text.push_str(fragment));
    }

    /// Set the avatar's expression
    pub fn set_emotion(&self, emotion: Emotion) {
        self.update(|state| state.emotion = emotion);
    }

    /// Set the speaking flag
    pub fn set_speaking(&self, speaking: bool) {
        self.update(|state| state.is_speaking = speaking);
    }

    /// End the turn in the status matching `error`
    ///
    /// Reply text already shown is left as-is.
    pub fn fail(&self, error: &Error) {
        let status = error.terminal_status();
        self.update(|state| {
            state.status = status;
            state.is_listening = false;
            state.is_speaking = false;
        });
    }

    /// Snapshot for the face renderer
    #[must_use]
    pub fn render_view(&self, audio_energy: Option<watch::Receiver<f32>>) -> RenderView {
        let state = self.tx.borrow();
        RenderView {
            expression: state.emotion,
            is_speaking: state.is_speaking,
            audio_energy,
        }
    }

    fn update(&self, f: impl FnOnce(&mut SessionState)) {
        self.tx.send_if_modified(|state| {
            let before = state.clone();
            f(state);
            *state != before
        });
    }
}

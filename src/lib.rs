//! Avatar Voice - a voice-driven avatar assistant
//!
//! One spoken turn flows through a streaming pipeline:
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────────┐   ┌───────────┐
//! │ Recorder │──▶│ Transcribe │──▶│ Reply stream │──▶│ Segmenter │
//! │ (silence)│   │   (STT)    │   │    (SSE)     │   │ sentences │
//! └──────────┘   └────────────┘   └──────────────┘   └─────┬─────┘
//!                                                          │
//!                  ┌──────────┐   ┌──────────────┐         │
//!                  │ Playback │◀──│ Speech queue │◀────────┘
//!                  │  driver  │   │    (TTS)     │
//!                  └──────────┘   └──────────────┘
//! ```
//!
//! The first sentence is spoken while later ones are still being generated.
//! Progress is published as [`assistant::SessionState`] snapshots, and the
//! finished reply sets the avatar's [`assistant::Emotion`].

pub mod assistant;
pub mod config;
pub mod error;
pub mod voice;

pub use assistant::Assistant;
pub use config::Config;
pub use error::{Error, Result};

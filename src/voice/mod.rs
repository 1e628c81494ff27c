//! Voice processing module
//!
//! Handles microphone capture with silence endpointing, speech-to-text,
//! text-to-speech, and playback.

mod capture;
mod playback;
mod recorder;
mod stt;
mod tts;

pub use capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use playback::{AudioPlayback, AudioSink, PLAYBACK_SAMPLE_RATE, decode_mp3};
pub use recorder::{
    LEVEL_WINDOW, MicSource, RecorderConfig, Recording, SilenceGate, SilenceGatedRecorder,
    StopReason, rms,
};
pub use stt::{SpeechToText, Transcriber};
pub use tts::{Synthesizer, TextToSpeech};

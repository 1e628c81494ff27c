//! TOML configuration file loading
//!
//! Supports `~/.config/avatar-voice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct AvatarConfigFile {
    /// Upstream API configuration
    #[serde(default)]
    pub api: ApiFileConfig,

    /// LLM configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Reference material injected on trigger keywords
    #[serde(default)]
    pub knowledge: KnowledgeFileConfig,
}

/// Upstream API configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiFileConfig {
    /// Base URL of the OpenAI-compatible API or a proxy in front of it
    pub base_url: Option<String>,

    /// API key (prefer the `AVATAR_API_KEY` env var)
    pub key: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Model identifier (e.g. "gpt-4")
    pub model: Option<String>,

    /// System prompt describing the avatar's persona
    pub system_prompt: Option<String>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1-hd")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "fable")
    pub tts_voice: Option<String>,

    /// RMS level below which input counts as silence
    pub silence_threshold: Option<f32>,

    /// Sustained silence (ms) that ends a recording
    pub silence_ms: Option<u64>,

    /// Silence evaluation rate
    pub tick_hz: Option<u32>,

    /// Hard cap on a single recording
    pub max_recording_secs: Option<u64>,

    /// Pause between spoken units
    pub playback_gap_ms: Option<u64>,

    /// "serial" or "concurrent"
    pub synthesis: Option<String>,

    /// Concurrent synthesis bound
    pub max_in_flight: Option<usize>,
}

/// Knowledge injection configuration
#[derive(Debug, Default, Deserialize)]
pub struct KnowledgeFileConfig {
    /// Path to a text/markdown file with reference material
    pub path: Option<String>,

    /// Transcript keywords that trigger injection
    pub triggers: Option<Vec<String>>,
}

/// Load the TOML config file from the standard path
///
/// Returns `AvatarConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> AvatarConfigFile {
    config_file_path().map_or_else(AvatarConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Missing, unreadable, or malformed files yield the defaults.
pub fn load_from(path: &Path) -> AvatarConfigFile {
    if !path.exists() {
        return AvatarConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match parse(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                AvatarConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            AvatarConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns [`crate::Error::Toml`] if the contents are not valid for the schema
pub fn parse(content: &str) -> Result<AvatarConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/avatar-voice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("avatar-voice").join("config.toml"))
}

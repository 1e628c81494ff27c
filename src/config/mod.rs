//! Configuration management for the avatar assistant

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::assistant::SynthesisPolicy;
use crate::{Error, Result};

/// Default OpenAI-compatible API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default persona prompt
pub const DEFAULT_SYSTEM_PROMPT: &str = "Your name is Embeddy. You are the cheerful and \
slightly quirky office assistant. Your replies are warm, witty, and direct, with a sprinkle \
of humor, and you always get straight to the point without unnecessary fluff. Keep answers \
short enough to be spoken aloud.";

/// Avatar assistant configuration
#[derive(Debug)]
pub struct Config {
    /// Upstream API access
    pub api: ApiConfig,

    /// Language model settings
    pub llm: LlmConfig,

    /// Voice capture, synthesis, and playback settings
    pub voice: VoiceConfig,

    /// Optional reference material injection
    pub knowledge: Option<KnowledgeConfig>,
}

/// Upstream API configuration
#[derive(Debug)]
pub struct ApiConfig {
    /// OpenAI-compatible base URL; may point at a credential-holding proxy
    pub base_url: String,

    /// Bearer credential (from `AVATAR_API_KEY` / `OPENAI_API_KEY`)
    pub api_key: Option<SecretString>,

    /// Per-request timeout applied to every upstream call
    pub timeout: Duration,
}

/// Language model configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Chat model identifier
    pub model: String,

    /// Persona system prompt
    pub system_prompt: String,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// TTS model (e.g. "tts-1-hd")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// RMS level below which input counts as silence
    pub silence_threshold: f32,

    /// Sustained silence that ends a recording
    pub silence_duration: Duration,

    /// Silence evaluation rate
    pub tick_hz: u32,

    /// Optional hard cap on a single recording
    pub max_recording: Option<Duration>,

    /// Pause inserted after each spoken unit
    pub playback_gap: Duration,

    /// How synthesis requests are scheduled
    pub synthesis: SynthesisPolicy,
}

/// Knowledge injection configuration
#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    /// File holding the reference material
    pub path: PathBuf,

    /// Lowercase transcript keywords that trigger injection
    pub triggers: Vec<String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1-hd".to_string(),
            tts_voice: "fable".to_string(),
            silence_threshold: 0.01,
            silence_duration: Duration::from_millis(1000),
            tick_hz: 60,
            max_recording: None,
            playback_gap: Duration::from_millis(100),
            synthesis: SynthesisPolicy::Serial,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from env, the TOML config file, and defaults
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        Self::from_file(file::load_config_file())
    }

    /// Build configuration from a parsed config file, with env overrides
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn from_file(fc: file::AvatarConfigFile) -> Result<Self> {
        // API access (env > toml > default)
        let api = ApiConfig {
            base_url: std::env::var("AVATAR_API_BASE_URL")
                .ok()
                .or(fc.api.base_url)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: std::env::var("AVATAR_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok()
                .or(fc.api.key)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
            timeout: Duration::from_secs(
                std::env::var("AVATAR_API_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .or(fc.api.timeout_secs)
                    .unwrap_or(60),
            ),
        };

        let defaults = LlmConfig::default();
        let llm = LlmConfig {
            model: std::env::var("AVATAR_LLM_MODEL")
                .ok()
                .or(fc.llm.model)
                .unwrap_or(defaults.model),
            system_prompt: fc.llm.system_prompt.unwrap_or(defaults.system_prompt),
        };

        let voice = Self::voice_from_file(fc.voice)?;

        let knowledge = std::env::var("AVATAR_KNOWLEDGE_PATH")
            .ok()
            .or(fc.knowledge.path)
            .map(|path| KnowledgeConfig {
                path: PathBuf::from(path),
                triggers: fc
                    .knowledge
                    .triggers
                    .unwrap_or_else(|| vec!["thesis".to_string()])
                    .into_iter()
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect(),
            });

        Ok(Self {
            api,
            llm,
            voice,
            knowledge,
        })
    }

    fn voice_from_file(fv: file::VoiceFileConfig) -> Result<VoiceConfig> {
        let defaults = VoiceConfig::default();

        let synthesis = match fv.synthesis.as_deref() {
            None | Some("serial") => SynthesisPolicy::Serial,
            Some("concurrent") => SynthesisPolicy::Concurrent {
                max_in_flight: fv.max_in_flight.unwrap_or(3).max(1),
            },
            Some(other) => {
                return Err(Error::Config(format!(
                    "voice.synthesis must be \"serial\" or \"concurrent\", got \"{other}\""
                )));
            }
        };

        let tick_hz = fv.tick_hz.unwrap_or(defaults.tick_hz);
        if tick_hz == 0 {
            return Err(Error::Config("voice.tick_hz must be positive".to_string()));
        }

        Ok(VoiceConfig {
            stt_model: std::env::var("AVATAR_STT_MODEL")
                .ok()
                .or(fv.stt_model)
                .unwrap_or(defaults.stt_model),
            tts_model: std::env::var("AVATAR_TTS_MODEL")
                .ok()
                .or(fv.tts_model)
                .unwrap_or(defaults.tts_model),
            tts_voice: std::env::var("AVATAR_TTS_VOICE")
                .ok()
                .or(fv.tts_voice)
                .unwrap_or(defaults.tts_voice),
            silence_threshold: fv.silence_threshold.unwrap_or(defaults.silence_threshold),
            silence_duration: fv
                .silence_ms
                .map_or(defaults.silence_duration, Duration::from_millis),
            tick_hz,
            max_recording: fv.max_recording_secs.map(Duration::from_secs),
            playback_gap: fv
                .playback_gap_ms
                .map_or(defaults.playback_gap, Duration::from_millis),
            synthesis,
        })
    }

    /// Shared HTTP client for all upstream calls, with the configured timeout
    ///
    /// # Errors
    ///
    /// Returns error if the client cannot be built
    pub fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder().timeout(self.api.timeout).build()?)
    }
}

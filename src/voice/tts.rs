//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::{Error, Result};

/// Converts one sentence unit into playable audio
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize text to audio bytes
    ///
    /// # Errors
    ///
    /// Returns [`Error::Synthesis`] if synthesis fails
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Synthesizes speech via an OpenAI-compatible `/audio/speech` endpoint
pub struct TextToSpeech {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    voice: String,
    model: String,
}

impl TextToSpeech {
    /// Create a new TTS client
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        voice: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            voice: voice.into(),
            model: model.into(),
        }
    }
}

#[derive(serde::Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    /// Returns MP3 audio bytes
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let request = SpeechRequest {
            model: &self.model,
            voice: &self.voice,
            input: text,
        };

        let mut builder = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("TTS error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;
        if audio.is_empty() {
            return Err(Error::Synthesis("empty audio response".to_string()));
        }

        tracing::debug!(chars = text.len(), audio_bytes = audio.len(), "synthesized unit");
        Ok(audio.to_vec())
    }
}

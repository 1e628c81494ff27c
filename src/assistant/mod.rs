//! The voice assistant turn pipeline
//!
//! A turn runs `Listening → Transcribing → GeneratingReply → Responding →
//! Ready`. While responding, the reply stream feeds the segmenter and the
//! synthesis queue as fragments arrive, and the playback driver drains the
//! queue concurrently, so the first sentence is spoken while later ones are
//! still being generated.

mod driver;
mod emotion;
mod prompt;
mod segmenter;
mod session;
mod speech_queue;
mod stream;

use std::sync::Arc;
use std::time::Duration;

pub use driver::PlaybackDriver;
pub use emotion::{Emotion, classify};
pub use prompt::{ChatMessage, Knowledge, PromptBuilder};
pub use segmenter::{MIN_UNIT_CHARS, SentenceSegmenter, extract};
pub use session::{ControlsView, RenderView, Session, SessionState, Status};
pub use speech_queue::{AudioEntry, AudioQueue, SpeechQueue, SynthesisPolicy, speech_queue};
pub use stream::{ChatClient, ReplyGenerator, ReplyStream, SseDecoder, SseEvent};
use tokio::sync::watch;

use crate::config::{Config, VoiceConfig};
use crate::voice::{
    AudioPlayback, AudioSink, MicSource, RecorderConfig, SilenceGatedRecorder, SpeechToText,
    Synthesizer, TextToSpeech, Transcriber, samples_to_wav,
};
use crate::{Error, Result};

/// Upstream and device services a turn talks to
#[derive(Clone)]
pub struct Services {
    pub transcriber: Arc<dyn Transcriber>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub sink: Arc<dyn AudioSink>,
}

/// Per-turn tuning
#[derive(Debug, Clone)]
pub struct TurnOptions {
    pub recorder: RecorderConfig,
    pub synthesis: SynthesisPolicy,
    pub playback_gap: Duration,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self::from(&VoiceConfig::default())
    }
}

impl From<&VoiceConfig> for TurnOptions {
    fn from(voice: &VoiceConfig) -> Self {
        Self {
            recorder: RecorderConfig::from(voice),
            synthesis: voice.synthesis,
            playback_gap: voice.playback_gap,
        }
    }
}

/// Owns the session and runs turns against it
pub struct Assistant {
    session: Session,
    recorder: SilenceGatedRecorder,
    prompt: PromptBuilder,
    transcriber: Arc<dyn Transcriber>,
    generator: Arc<dyn ReplyGenerator>,
    synthesizer: Arc<dyn Synthesizer>,
    driver: PlaybackDriver,
    synthesis: SynthesisPolicy,
}

impl Assistant {
    /// Assemble an assistant from its services
    #[must_use]
    pub fn new(services: Services, prompt: PromptBuilder, options: TurnOptions) -> Self {
        Self {
            session: Session::new(),
            recorder: SilenceGatedRecorder::new(options.recorder),
            prompt,
            transcriber: services.transcriber,
            generator: services.generator,
            synthesizer: services.synthesizer,
            driver: PlaybackDriver::new(services.sink, options.playback_gap),
            synthesis: options.synthesis,
        }
    }

    /// Build the upstream clients and the default output device from config
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client or the output device cannot be set up
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = config.http_client()?;
        let api = &config.api;

        if api.api_key.is_none() {
            tracing::warn!(
                base_url = %api.base_url,
                "no API key configured, requests rely on the endpoint to authenticate"
            );
        }

        let services = Services {
            transcriber: Arc::new(SpeechToText::new(
                client.clone(),
                &api.base_url,
                api.api_key.clone(),
                &config.voice.stt_model,
            )),
            generator: Arc::new(ChatClient::new(
                client.clone(),
                &api.base_url,
                api.api_key.clone(),
                &config.llm.model,
            )),
            synthesizer: Arc::new(TextToSpeech::new(
                client,
                &api.base_url,
                api.api_key.clone(),
                &config.voice.tts_model,
                &config.voice.tts_voice,
            )),
            sink: Arc::new(AudioPlayback::new()?),
        };

        let mut prompt = PromptBuilder::new(&config.llm.system_prompt);
        if let Some(knowledge) = &config.knowledge {
            match Knowledge::load(knowledge) {
                Ok(loaded) => prompt = prompt.with_knowledge(loaded),
                Err(e) => tracing::warn!(
                    path = %knowledge.path.display(),
                    error = %e,
                    "failed to load knowledge, continuing without it"
                ),
            }
        }

        Ok(Self::new(services, prompt, TurnOptions::from(&config.voice)))
    }

    /// The session this assistant writes to
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Subscribe to session snapshots
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    /// Current face renderer inputs
    #[must_use]
    pub fn render_view(&self) -> RenderView {
        self.session.render_view(self.driver.sink().energy())
    }

    /// Run one full turn: record, transcribe, reply, speak
    ///
    /// The session ends in `Ready` on success. On failure it ends in
    /// `MicError` or `Error` and the error is returned as well.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] without touching the session if a turn is
    /// already running; otherwise the error that ended the turn
    #[allow(clippy::future_not_send)]
    pub async fn start<M: MicSource + ?Sized>(&self, mic: &mut M) -> Result<()> {
        self.session.begin_turn()?;
        tracing::debug!("turn started");

        match self.run_turn(mic).await {
            Ok(()) => {
                self.session.set_status(Status::Ready);
                tracing::info!(emotion = %self.session.snapshot().emotion, "turn complete");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "turn failed");
                self.session.fail(&e);
                Err(e)
            }
        }
    }

    #[allow(clippy::future_not_send)]
    async fn run_turn<M: MicSource + ?Sized>(&self, mic: &mut M) -> Result<()> {
        let recording = self.recorder.record(mic).await?;
        self.session.stop_listening();

        self.session.set_status(Status::Transcribing);
        let wav = samples_to_wav(&recording.samples, recording.sample_rate)?;
        let transcript = self.transcriber.transcribe(&wav).await?;
        tracing::info!(transcript = %transcript, "heard");
        self.session.set_input(&transcript);

        self.session.set_status(Status::GeneratingReply);
        let messages = self.prompt.build(&transcript);
        let mut stream = self.generator.open(&messages).await?;

        self.session.set_status(Status::Responding);
        let (speech, mut audio) = speech_queue(Arc::clone(&self.synthesizer), self.synthesis);

        let produce = self.consume_reply(&mut stream, speech);
        let drain = self.driver.play_audio_queue(&mut audio, &self.session);
        let (outcome, drained) = tokio::join!(produce, drain);

        if !drained {
            return Err(Error::Playback("playback already active".to_string()));
        }
        outcome
    }

    /// Feed the reply stream through the segmenter into the synthesis queue
    ///
    /// The queue is closed however the stream ends, so the driver can drain
    /// what was already submitted. A partial sentence left by a broken stream
    /// is not spoken.
    async fn consume_reply(&self, stream: &mut ReplyStream, mut speech: SpeechQueue) -> Result<()> {
        let mut segmenter = SentenceSegmenter::new();
        let mut reply = String::new();

        let outcome = loop {
            match stream.next_fragment().await {
                Ok(Some(fragment)) => {
                    self.session.append_reply(&fragment);
                    reply.push_str(&fragment);
                    for unit in segmenter.push(&fragment) {
                        speech.enqueue(unit);
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        if outcome.is_ok() {
            if let Some(rest) = segmenter.flush() {
                speech.enqueue(rest);
            }
            let emotion = classify(&reply);
            tracing::debug!(%emotion, chars = reply.len(), "reply complete");
            self.session.set_emotion(emotion);
        }

        speech.close();
        outcome
    }
}

//! Shared test utilities
//!
//! Scripted stand-ins for the microphone and every upstream service, so whole
//! turns run without audio hardware or network access.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::Instant;

use avatar_voice::assistant::{
    Assistant, ChatMessage, PromptBuilder, ReplyGenerator, ReplyStream, Services, SessionState,
    SynthesisPolicy, TurnOptions,
};
use avatar_voice::voice::{AudioSink, MicSource, SAMPLE_RATE, Synthesizer, Transcriber};
use avatar_voice::{Error, Result};

/// Level used for "someone is talking"
pub const SPEECH: f32 = 0.3;

/// Level used for room noise below the default threshold
pub const QUIET: f32 = 0.002;

/// Microphone that plays back a timeline of input levels
///
/// Time is measured with tokio's clock, so tests run with paused time.
/// After the script ends the input is silent.
#[derive(Debug, Default)]
pub struct ScriptedMic {
    segments: Vec<(Duration, f32)>,
    started: Option<Instant>,
    deny: bool,
    pub stopped: bool,
}

impl ScriptedMic {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mic that fails to start, as when access is denied
    #[must_use]
    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    /// Append `len` of input at `level`
    #[must_use]
    pub fn then(mut self, len: Duration, level: f32) -> Self {
        self.segments.push((len, level));
        self
    }

    /// The usual utterance: half a second of speech, then quiet
    #[must_use]
    pub fn utterance() -> Self {
        Self::new().then(Duration::from_millis(500), SPEECH)
    }

    fn level_at(&self, t: Duration) -> f32 {
        let mut end = Duration::ZERO;
        for &(len, level) in &self.segments {
            end += len;
            if t < end {
                return level;
            }
        }
        QUIET
    }

    fn elapsed(&self) -> Option<Duration> {
        self.started.map(|s| s.elapsed())
    }
}

/// Square wave whose RMS equals `level`
fn square(level: f32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| if i % 2 == 0 { level } else { -level })
        .collect()
}

impl MicSource for ScriptedMic {
    fn start(&mut self) -> Result<()> {
        if self.deny {
            return Err(Error::Permission("microphone access denied".to_string()));
        }
        self.started = Some(Instant::now());
        self.stopped = false;
        Ok(())
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn latest(&self, len: usize) -> Vec<f32> {
        self.elapsed()
            .map(|t| square(self.level_at(t), len))
            .unwrap_or_default()
    }

    fn take_buffer(&mut self) -> Vec<f32> {
        let Some(elapsed) = self.elapsed() else {
            return Vec::new();
        };
        let per_ms = (SAMPLE_RATE / 1000) as usize;
        let ms = usize::try_from(elapsed.as_millis()).unwrap_or(0);

        (0..ms)
            .flat_map(|m| square(self.level_at(Duration::from_millis(m as u64)), per_ms))
            .collect()
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// Transcriber that always hears the same thing
pub struct FixedTranscriber {
    text: String,
    pub calls: AtomicUsize,
}

impl FixedTranscriber {
    #[must_use]
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(&audio[0..4], b"RIFF", "transcriber expects WAV input");

        tokio::time::sleep(Duration::from_millis(200)).await;
        let text = self.text.trim();
        if text.is_empty() {
            return Err(Error::Transcription("empty transcript".to_string()));
        }
        Ok(text.to_string())
    }
}

/// SSE frame carrying one text increment
#[must_use]
pub fn sse_frame(content: &str) -> Vec<u8> {
    format!(
        "data: {}\n\n",
        serde_json::json!({"choices": [{"delta": {"content": content}}]})
    )
    .into_bytes()
}

/// Reply generator that streams scripted fragments as SSE frames
pub struct ScriptedGenerator {
    fragments: Vec<String>,
    fail_after: Option<usize>,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedGenerator {
    #[must_use]
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| (*f).to_string()).collect(),
            fail_after: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Break the connection after `n` fragments
    #[must_use]
    pub const fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    #[must_use]
    pub fn opened(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ReplyGenerator for ScriptedGenerator {
    async fn open(&self, messages: &[ChatMessage]) -> Result<ReplyStream> {
        self.requests.lock().unwrap().push(messages.to_vec());

        let mut chunks: Vec<std::result::Result<Vec<u8>, std::io::Error>> = Vec::new();
        for (i, fragment) in self.fragments.iter().enumerate() {
            if self.fail_after == Some(i) {
                chunks.push(Err(std::io::Error::other("connection reset")));
                break;
            }
            chunks.push(Ok(sse_frame(fragment)));
        }
        if self.fail_after.is_none() {
            chunks.push(Ok(b"data: [DONE]\n\n".to_vec()));
        }

        // Tokens trickle in
        let body = futures::stream::iter(chunks).then(|chunk| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            chunk
        });
        Ok(ReplyStream::from_body(body))
    }
}

/// Synthesizer with random latency that echoes the text back as "audio"
pub struct RandomLatencySynth {
    fail_on: Option<String>,
    max_latency_ms: u64,
    pub calls: AtomicUsize,
}

impl RandomLatencySynth {
    #[must_use]
    pub fn new() -> Self {
        Self {
            fail_on: None,
            max_latency_ms: 400,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail synthesis for the unit with exactly this text
    #[must_use]
    pub fn failing_on(mut self, text: &str) -> Self {
        self.fail_on = Some(text.to_string());
        self
    }
}

#[async_trait]
impl Synthesizer for RandomLatencySynth {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = rand::thread_rng().gen_range(1..=self.max_latency_ms);
        tokio::time::sleep(Duration::from_millis(latency)).await;

        if self.fail_on.as_deref() == Some(text) {
            return Err(Error::Synthesis("upstream 500".to_string()));
        }
        Ok(text.as_bytes().to_vec())
    }
}

/// Sink that records what it played and whether the session said it was
/// speaking at the time
#[derive(Default)]
pub struct RecordingSink {
    session: Mutex<Option<watch::Receiver<SessionState>>>,
    pub played: Mutex<Vec<String>>,
    pub speaking_during_play: Mutex<Vec<bool>>,
}

impl RecordingSink {
    /// Watch the session so plays can observe `is_speaking`
    pub fn attach(&self, rx: watch::Receiver<SessionState>) {
        *self.session.lock().unwrap() = Some(rx);
    }

    #[must_use]
    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, audio: &[u8]) -> Result<()> {
        let speaking = self
            .session
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|rx| rx.borrow().is_speaking);
        self.speaking_during_play.lock().unwrap().push(speaking);

        // Roughly the length of a short spoken sentence
        tokio::time::sleep(Duration::from_millis(250)).await;
        self.played
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(audio).into_owned());
        Ok(())
    }
}

/// An assistant wired to scripted services
pub struct Harness {
    pub assistant: Assistant,
    pub transcriber: Arc<FixedTranscriber>,
    pub generator: Arc<ScriptedGenerator>,
    pub synthesizer: Arc<RandomLatencySynth>,
    pub sink: Arc<RecordingSink>,
}

impl Harness {
    #[must_use]
    pub fn new(
        transcriber: FixedTranscriber,
        generator: ScriptedGenerator,
        synthesizer: RandomLatencySynth,
        policy: SynthesisPolicy,
    ) -> Self {
        Self::with_prompt(
            transcriber,
            generator,
            synthesizer,
            policy,
            PromptBuilder::new("You are Embeddy."),
        )
    }

    #[must_use]
    pub fn with_prompt(
        transcriber: FixedTranscriber,
        generator: ScriptedGenerator,
        synthesizer: RandomLatencySynth,
        policy: SynthesisPolicy,
        prompt: PromptBuilder,
    ) -> Self {
        let transcriber = Arc::new(transcriber);
        let generator = Arc::new(generator);
        let synthesizer = Arc::new(synthesizer);
        let sink = Arc::new(RecordingSink::default());

        let services = Services {
            transcriber: transcriber.clone(),
            generator: generator.clone(),
            synthesizer: synthesizer.clone(),
            sink: sink.clone(),
        };
        let options = TurnOptions {
            synthesis: policy,
            ..TurnOptions::default()
        };

        let assistant = Assistant::new(services, prompt, options);
        sink.attach(assistant.subscribe());

        Self {
            assistant,
            transcriber,
            generator,
            synthesizer,
            sink,
        }
    }
}

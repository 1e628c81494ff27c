//! Silence-gated recording
//!
//! Records from a [`MicSource`] until the input level stays below a threshold
//! for a sustained interval. The level is sampled once per tick (~60 Hz) as the
//! RMS of the most recent window of samples.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::Result;
use crate::config::VoiceConfig;

/// Number of most recent samples the RMS level is computed over
pub const LEVEL_WINDOW: usize = 2048;

/// A source of microphone samples
///
/// Implemented by [`super::AudioCapture`] for real hardware; tests provide
/// scripted sources.
pub trait MicSource {
    /// Begin capturing. Fails with [`crate::Error::Permission`] when the
    /// device is unavailable or access is denied
    ///
    /// # Errors
    ///
    /// Returns error if capture cannot start
    fn start(&mut self) -> Result<()>;

    /// Stop capturing
    fn stop(&mut self);

    /// The most recent `len` samples (fewer if less has been captured)
    fn latest(&self, len: usize) -> Vec<f32>;

    /// Take everything captured so far, clearing the buffer
    fn take_buffer(&mut self) -> Vec<f32>;

    /// Capture sample rate in Hz
    fn sample_rate(&self) -> u32;
}

/// Why a recording ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Sustained silence was detected
    Silence,
    /// The optional safety cap was reached
    MaxDuration,
}

/// Captured utterance
#[derive(Debug, Clone)]
pub struct Recording {
    /// Raw mono samples in [-1, 1]
    pub samples: Vec<f32>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
    /// Wall time from start to stop
    pub duration: Duration,
    /// What ended the recording
    pub stop_reason: StopReason,
}

/// Recorder tuning
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// RMS level below which a tick counts as silent
    pub threshold: f32,
    /// Silence must last longer than this to stop
    pub min_silence: Duration,
    /// Interval between level evaluations
    pub tick: Duration,
    /// Samples per level evaluation
    pub window: usize,
    /// Optional hard cap
    pub max_duration: Option<Duration>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self::from(&VoiceConfig::default())
    }
}

impl From<&VoiceConfig> for RecorderConfig {
    fn from(voice: &VoiceConfig) -> Self {
        Self {
            threshold: voice.silence_threshold,
            min_silence: voice.silence_duration,
            tick: Duration::from_secs(1) / voice.tick_hz.max(1),
            window: LEVEL_WINDOW,
            max_duration: voice.max_recording,
        }
    }
}

/// Tracks how long the level has continuously stayed below the threshold
#[derive(Debug, Clone)]
pub struct SilenceGate {
    threshold: f32,
    min_silence: Duration,
    silence_start: Option<Duration>,
}

impl SilenceGate {
    /// Create a gate with the given threshold and minimum silence
    #[must_use]
    pub const fn new(threshold: f32, min_silence: Duration) -> Self {
        Self {
            threshold,
            min_silence,
            silence_start: None,
        }
    }

    /// Feed one level observation taken at `now` (time since recording start)
    ///
    /// Returns true once the level has stayed below the threshold for longer
    /// than the minimum silence. Any louder observation resets the timer.
    pub fn observe(&mut self, level: f32, now: Duration) -> bool {
        if level >= self.threshold {
            self.silence_start = None;
            return false;
        }

        match self.silence_start {
            None => {
                self.silence_start = Some(now);
                false
            }
            Some(start) => now.saturating_sub(start) > self.min_silence,
        }
    }

    /// When the current silent stretch began, if one is in progress
    #[must_use]
    pub const fn silence_start(&self) -> Option<Duration> {
        self.silence_start
    }

    /// Forget any silent stretch in progress
    pub const fn reset(&mut self) {
        self.silence_start = None;
    }
}

/// Records one utterance, ending on sustained silence
#[derive(Debug, Clone, Default)]
pub struct SilenceGatedRecorder {
    config: RecorderConfig,
}

impl SilenceGatedRecorder {
    /// Create a recorder with the given tuning
    #[must_use]
    pub const fn new(config: RecorderConfig) -> Self {
        Self { config }
    }

    /// Recorder tuning
    #[must_use]
    pub const fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Start the source and record until silence (or the optional cap)
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Permission`] if the source cannot start
    #[allow(clippy::future_not_send)]
    pub async fn record<M: MicSource + ?Sized>(&self, mic: &mut M) -> Result<Recording> {
        mic.start()?;

        let started = Instant::now();
        let mut gate = SilenceGate::new(self.config.threshold, self.config.min_silence);
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(
            threshold = self.config.threshold,
            min_silence_ms = self.config.min_silence.as_millis(),
            "recording until silence"
        );

        let stop_reason = loop {
            ticker.tick().await;
            let elapsed = started.elapsed();
            let level = rms(&mic.latest(self.config.window));

            if gate.observe(level, elapsed) {
                break StopReason::Silence;
            }

            if self.config.max_duration.is_some_and(|max| elapsed >= max) {
                tracing::warn!(elapsed_ms = elapsed.as_millis(), "recording hit duration cap");
                break StopReason::MaxDuration;
            }
        };

        mic.stop();
        let samples = mic.take_buffer();
        let duration = started.elapsed();

        tracing::debug!(
            samples = samples.len(),
            duration_ms = duration.as_millis(),
            ?stop_reason,
            "recording stopped"
        );

        Ok(Recording {
            samples,
            sample_rate: mic.sample_rate(),
            duration,
            stop_reason,
        })
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

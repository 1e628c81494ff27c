//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::watch;

use super::recorder::rms;
use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Plays one synthesized unit to completion
///
/// The returned future resolves when playback has finished or failed; the
/// playback driver awaits it before moving to the next unit.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play encoded audio (MP3) fully
    ///
    /// # Errors
    ///
    /// Returns [`Error::Playback`] if decoding or output fails
    async fn play(&self, audio: &[u8]) -> Result<()>;

    /// Live output level for mouth animation, if the sink measures one
    fn energy(&self) -> Option<watch::Receiver<f32>> {
        None
    }
}

/// Plays audio to the default output device
pub struct AudioPlayback {
    config: StreamConfig,
    energy: Arc<watch::Sender<f32>>,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        let (energy, _) = watch::channel(0.0);
        Ok(Self {
            config,
            energy: Arc::new(energy),
        })
    }

    /// Play raw mono samples at [`PLAYBACK_SAMPLE_RATE`]
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub async fn play_samples(&self, samples: Vec<f32>) -> Result<()> {
        let config = self.config.clone();
        let energy = Arc::clone(&self.energy);

        tokio::task::spawn_blocking(move || play_blocking(&config, &samples, &energy))
            .await
            .map_err(|e| Error::Playback(e.to_string()))?
    }
}

#[async_trait]
impl AudioSink for AudioPlayback {
    async fn play(&self, audio: &[u8]) -> Result<()> {
        let samples = decode_mp3(audio)?;
        self.play_samples(samples).await
    }

    fn energy(&self) -> Option<watch::Receiver<f32>> {
        Some(self.energy.subscribe())
    }
}

/// Play samples on a fresh output stream, blocking until done
fn play_blocking(
    config: &StreamConfig,
    samples: &[f32],
    energy: &Arc<watch::Sender<f32>>,
) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Playback("no output device".to_string()))?;

    let channels = usize::from(config.channels);
    let shared: Arc<[f32]> = Arc::from(samples);
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let shared = Arc::clone(&shared);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);
        let energy = Arc::clone(energy);

        device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let start = position.load(Ordering::Relaxed);
                    let frames = data.len() / channels.max(1);
                    let end = (start + frames).min(shared.len());

                    for (i, frame) in data.chunks_mut(channels.max(1)).enumerate() {
                        let sample = shared.get(start + i).copied().unwrap_or(0.0);
                        frame.fill(if start + i < end { sample } else { 0.0 });
                    }

                    position.store(end, Ordering::Relaxed);
                    energy.send_replace(rms(&shared[start..end]));
                    if end >= shared.len() {
                        finished.store(true, Ordering::Release);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Playback(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Playback(e.to_string()))?;

    #[allow(clippy::cast_possible_truncation)]
    let duration_ms = (shared.len() as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);

    // Poll for completion with timeout
    let start = Instant::now();
    let timeout = Duration::from_millis(duration_ms + 500);

    while !finished.load(Ordering::Acquire) {
        if start.elapsed() > timeout {
            tracing::warn!(duration_ms, "playback did not drain before timeout");
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    drop(stream);
    energy.send_replace(0.0);
    tracing::debug!(samples = shared.len(), "playback complete");

    Ok(())
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns [`Error::Playback`] if the data is not decodable MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() {
        return Err(Error::Playback("no audio frames decoded".to_string()));
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_is_not_mp3() {
        assert!(matches!(
            decode_mp3(b"definitely not an mp3 stream"),
            Err(Error::Playback(_))
        ));
    }

    #[test]
    fn empty_input_decodes_to_error() {
        assert!(decode_mp3(&[]).is_err());
    }
}

//! Audio capture from microphone

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig, SupportedStreamConfigRange};

use super::recorder::MicSource;
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Captures audio from the default input device
///
/// The device is only opened on [`MicSource::start`]. Any failure to open
/// it is an [`Error::Permission`], so the turn ends in `MicError`.
pub struct AudioCapture {
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new, idle audio capture instance
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        }
    }
}

/// Microphone could not be used for recording
fn unavailable(reason: impl ToString) -> Error {
    Error::Permission(reason.to_string())
}

fn records_speech(range: &SupportedStreamConfigRange) -> bool {
    range.channels() == 1
        && (range.min_sample_rate()..=range.max_sample_rate()).contains(&SampleRate(SAMPLE_RATE))
}

/// Default input device with a mono 16kHz stream config
fn open_input() -> Result<(cpal::Device, StreamConfig)> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| unavailable("no input device available"))?;

    let config = device
        .supported_input_configs()
        .map_err(unavailable)?
        .find(records_speech)
        .ok_or_else(|| unavailable("input device cannot record 16 kHz mono"))?
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = SAMPLE_RATE,
        "microphone opened"
    );
    Ok((device, config))
}

impl Default for AudioCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl MicSource for AudioCapture {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
        let (device, config) = open_input()?;
        let buffer = Arc::clone(&self.buffer);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(unavailable)?;

        stream.play().map_err(unavailable)?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    fn latest(&self, len: usize) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|buf| buf[buf.len().saturating_sub(len)..].to_vec())
            .unwrap_or_default()
    }

    fn take_buffer(&mut self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

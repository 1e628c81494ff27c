//! Sequential playback of synthesized units

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::session::Session;
use super::speech_queue::AudioQueue;
use crate::voice::AudioSink;

/// Plays queued audio one unit at a time, in position order
pub struct PlaybackDriver {
    sink: Arc<dyn AudioSink>,
    gap: Duration,
    active: AtomicBool,
}

/// Clears the active flag however the drain ends
struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PlaybackDriver {
    /// Create a driver that pauses `gap` between spoken units
    #[must_use]
    pub fn new(sink: Arc<dyn AudioSink>, gap: Duration) -> Self {
        Self {
            sink,
            gap,
            active: AtomicBool::new(false),
        }
    }

    /// Whether a drain is in progress
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// The sink units are played through
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn AudioSink> {
        &self.sink
    }

    /// Drain `queue` until it is exhausted
    ///
    /// Returns `false` without touching the queue when another drain is
    /// already running. Failed units (synthesis or playback) are skipped.
    /// `is_speaking` is raised on the first played unit and cleared once the
    /// queue is exhausted.
    pub async fn play_audio_queue(&self, queue: &mut AudioQueue, session: &Session) -> bool {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("playback already active, ignoring");
            return false;
        }
        let _guard = ActiveGuard(&self.active);

        let mut played = 0usize;
        let mut skipped = 0usize;
        let mut after_unit = false;

        while let Some(entry) = queue.next().await {
            let Some(audio) = entry.audio else {
                tracing::debug!(position = entry.position, "skipping unit without audio");
                skipped += 1;
                continue;
            };

            // No pause before the first unit or after the last
            if after_unit {
                tokio::time::sleep(self.gap).await;
            }
            after_unit = true;

            session.set_speaking(true);
            tracing::debug!(
                position = entry.position,
                bytes = audio.len(),
                text = %entry.text,
                "playing unit"
            );

            match self.sink.play(&audio).await {
                Ok(()) => played += 1,
                Err(e) => {
                    tracing::warn!(position = entry.position, error = %e, "playback failed, skipping unit");
                    skipped += 1;
                }
            }
        }

        session.set_speaking(false);
        tracing::debug!(played, skipped, "audio queue drained");
        true
    }
}

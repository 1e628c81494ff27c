//! Speech synthesis queue
//!
//! Sentence units are submitted as they are segmented and synthesized out of
//! band, so the reply stream never waits on TTS. Every unit gets a position in
//! submission order; the consumer side ([`AudioQueue`]) releases entries
//! strictly by position, whatever order synthesis finished in.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};

use crate::voice::Synthesizer;

/// How synthesis requests are scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SynthesisPolicy {
    /// One request at a time, in submission order
    #[default]
    Serial,
    /// Up to `max_in_flight` requests at once, reordered by position
    Concurrent { max_in_flight: usize },
}

/// A resolved unit, ready for playback
#[derive(Debug, Clone)]
pub struct AudioEntry {
    /// Submission order, starting at 0
    pub position: u64,
    /// The sentence unit that was synthesized
    pub text: String,
    /// Encoded audio, or `None` when synthesis failed and the unit is skipped
    pub audio: Option<Vec<u8>>,
}

enum Submitter {
    Serial(mpsc::UnboundedSender<(u64, String)>),
    Concurrent {
        synthesizer: Arc<dyn Synthesizer>,
        permits: Arc<Semaphore>,
        results: mpsc::UnboundedSender<AudioEntry>,
    },
}

/// Producer side: accepts sentence units in order
pub struct SpeechQueue {
    submitter: Submitter,
    next_position: u64,
}

/// Consumer side: yields entries in submission order
pub struct AudioQueue {
    results: mpsc::UnboundedReceiver<AudioEntry>,
    pending: BTreeMap<u64, AudioEntry>,
    next_position: u64,
}

/// Create a linked producer/consumer pair
///
/// Must be called within a tokio runtime; synthesis runs on spawned tasks.
#[must_use]
pub fn speech_queue(
    synthesizer: Arc<dyn Synthesizer>,
    policy: SynthesisPolicy,
) -> (SpeechQueue, AudioQueue) {
    let (results_tx, results_rx) = mpsc::unbounded_channel();

    let submitter = match policy {
        SynthesisPolicy::Serial => {
            let (units_tx, mut units_rx) = mpsc::unbounded_channel::<(u64, String)>();
            tokio::spawn(async move {
                while let Some((position, text)) = units_rx.recv().await {
                    let entry = synthesize_entry(synthesizer.as_ref(), position, text).await;
                    if results_tx.send(entry).is_err() {
                        tracing::debug!("audio queue dropped, stopping synthesis");
                        break;
                    }
                }
            });
            Submitter::Serial(units_tx)
        }
        SynthesisPolicy::Concurrent { max_in_flight } => Submitter::Concurrent {
            synthesizer,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            results: results_tx,
        },
    };

    (
        SpeechQueue {
            submitter,
            next_position: 0,
        },
        AudioQueue {
            results: results_rx,
            pending: BTreeMap::new(),
            next_position: 0,
        },
    )
}

impl SpeechQueue {
    /// Submit a unit for synthesis; returns its position
    pub fn enqueue(&mut self, text: String) -> u64 {
        let position = self.next_position;
        self.next_position += 1;
        tracing::debug!(position, text = %text, "queueing unit for synthesis");

        match &self.submitter {
            Submitter::Serial(units) => {
                if units.send((position, text)).is_err() {
                    tracing::warn!(position, "synthesis worker gone, unit dropped");
                }
            }
            Submitter::Concurrent {
                synthesizer,
                permits,
                results,
            } => {
                let synthesizer = Arc::clone(synthesizer);
                let permits = Arc::clone(permits);
                let results = results.clone();
                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await.ok();
                    let entry = synthesize_entry(synthesizer.as_ref(), position, text).await;
                    // Receiver gone means the turn is over
                    let _ = results.send(entry);
                });
            }
        }

        position
    }

    /// Number of units submitted so far
    #[must_use]
    pub const fn submitted(&self) -> u64 {
        self.next_position
    }

    /// Signal that no more units will arrive
    ///
    /// The consumer ends once every submitted unit has resolved.
    pub fn close(self) {
        tracing::debug!(units = self.next_position, "speech queue closed");
    }
}

impl AudioQueue {
    /// Next entry in submission order, or `None` once the producer has
    /// closed and every unit has been handed out
    pub async fn next(&mut self) -> Option<AudioEntry> {
        loop {
            if let Some(entry) = self.pending.remove(&self.next_position) {
                self.next_position += 1;
                return Some(entry);
            }

            if let Some(entry) = self.results.recv().await {
                self.pending.insert(entry.position, entry);
            } else {
                // A synthesis task died without reporting; skip past its slot
                let (&position, _) = self.pending.first_key_value()?;
                tracing::warn!(
                    expected = self.next_position,
                    position,
                    "synthesis result missing, skipping ahead"
                );
                self.next_position = position;
            }
        }
    }
}

async fn synthesize_entry(synthesizer: &dyn Synthesizer, position: u64, text: String) -> AudioEntry {
    let audio = match synthesizer.synthesize(&text).await {
        Ok(audio) => Some(audio),
        Err(e) => {
            tracing::warn!(position, error = %e, "synthesis failed, unit will be skipped");
            None
        }
    };

    AudioEntry {
        position,
        text,
        audio,
    }
}

//! Sentence segmentation of a streamed reply
//!
//! Reply fragments arrive in arbitrary pieces. The segmenter keeps the text
//! that has not yet formed a complete sentence and hands out units as soon as
//! a boundary (`.`, `!` or `?` followed by whitespace) closes one. Units are
//! emitted in receipt order; nothing is duplicated or dropped between the
//! extractions and the final flush.

use std::sync::LazyLock;

use regex::Regex;

/// Units must be longer than this (in characters, after trimming)
pub const MIN_UNIT_CHARS: usize = 5;

static BOUNDARY: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[.!?]\s").ok());

/// Split the shortest complete unit off the front of `buffer`
///
/// Only the first boundary is considered. If its trimmed prefix is not
/// longer than [`MIN_UNIT_CHARS`], or there is no boundary at all, the buffer
/// comes back unchanged and the text waits for the final flush. The remainder
/// has its leading whitespace removed.
#[must_use]
pub fn extract(buffer: &str) -> (Option<String>, String) {
    let Some(m) = BOUNDARY.as_ref().and_then(|b| b.find(buffer)) else {
        return (None, buffer.to_string());
    };

    // The match is punctuation plus one whitespace char; keep the punctuation
    let end = m.start() + 1;
    let unit = buffer[..end].trim();
    if unit.chars().count() <= MIN_UNIT_CHARS {
        return (None, buffer.to_string());
    }

    (
        Some(unit.to_string()),
        buffer[end..].trim_start().to_string(),
    )
}

/// Per-turn stream buffer
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    /// Create an empty segmenter
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Append a fragment and return every unit it completed, in order
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);

        let mut units = Vec::new();
        loop {
            let (unit, remainder) = extract(&self.buffer);
            let Some(unit) = unit else { break };
            self.buffer = remainder;
            units.push(unit);
        }
        units
    }

    /// Flush whatever is left at end of stream as a final unit
    ///
    /// Ignores the length and punctuation rules; returns `None` only when the
    /// remainder is blank.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    /// Text received but not yet emitted
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

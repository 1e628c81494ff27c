//! Emotion classification of reply text
//!
//! The avatar's expression is derived from the finished reply by keyword
//! patterns checked in a fixed precedence order.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Expression shown by the avatar
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Sad,
    Angry,
    Surprised,
    Shy,
}

impl Emotion {
    /// Lowercase tag as consumed by the renderer
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Surprised => "surprised",
            Self::Shy => "shy",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Patterns in precedence order; first match wins
static PATTERNS: LazyLock<Vec<(Emotion, Regex)>> = LazyLock::new(|| {
    [
        (Emotion::Sad, r"(?i)sorry|unfortunately|sad|bad"),
        (Emotion::Happy, r"(?i)great|glad|awesome|happy|nice"),
        (Emotion::Surprised, r"(?i)wow|amazing|really|huh"),
        (Emotion::Shy, r"(?i)hmm|maybe|not sure"),
        (Emotion::Angry, r"(?i)angry|mad|annoyed|upset"),
    ]
    .into_iter()
    .filter_map(|(emotion, pattern)| Regex::new(pattern).ok().map(|re| (emotion, re)))
    .collect()
});

/// Classify reply text into an expression
#[must_use]
pub fn classify(text: &str) -> Emotion {
    PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map_or(Emotion::Neutral, |(emotion, _)| *emotion)
}

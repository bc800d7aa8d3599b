use chrono::{DateTime, Utc};
use clap::ValueEnum;
use derive_builder::Builder;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use strum::{AsRefStr, Display as StrumDisplay, EnumString};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Upper-cased character -> number of occurrences. Only characters that were
/// seen are present, so every count is positive.
pub type CharacterCounts = BTreeMap<String, u64>;

pub const NO_RELEVANT_CHARACTERS: &str = "No relevant characters found or empty input.";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    StrumDisplay,
    EnumString,
    AsRefStr,
    ValueEnum,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisKind {
    /// Count a, e, i, o and u
    Vowels,
    /// Count every other letter
    Consonants,
}

impl AnalysisKind {
    pub fn label(&self) -> &'static str {
        match self {
            AnalysisKind::Vowels => "vowels",
            AnalysisKind::Consonants => "consonants",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, Serialize, Deserialize)]
pub enum AnalysisMode {
    Online,
    Offline,
}

impl AnalysisMode {
    pub fn from_online(online: bool) -> Self {
        if online {
            AnalysisMode::Online
        } else {
            AnalysisMode::Offline
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, AnalysisMode::Online)
    }
}

/// Identifies "the same analysis" for duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnalysisKey {
    pub text: String,
    pub kind: AnalysisKind,
    pub mode: AnalysisMode,
}

impl AnalysisKey {
    pub fn new(text: &str, kind: AnalysisKind, mode: AnalysisMode) -> Self {
        Self {
            text: text.to_string(),
            kind,
            mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisResult {
    Success(CharacterCounts),
    Error(String),
}

impl AnalysisResult {
    pub fn is_error(&self) -> bool {
        matches!(self, AnalysisResult::Error(_))
    }

    /// Render for display. Errors keep the `Error: ` prefix users are used to,
    /// counts are listed one per line in alphabetical order.
    pub fn format(&self) -> String {
        match self {
            AnalysisResult::Error(message) => format!("Error: {}", message),
            AnalysisResult::Success(counts) if counts.is_empty() => {
                NO_RELEVANT_CHARACTERS.to_string()
            }
            AnalysisResult::Success(counts) => counts
                .iter()
                .sorted_by_cached_key(|(letter, _)| {
                    (alphabetical_key(letter), letter.to_string())
                })
                .map(|(letter, count)| format!("Letter '{}' appears {} times", letter, count))
                .join("\n"),
        }
    }
}

/// Accented letters sort next to their base letter, `É` right after `E`.
fn alphabetical_key(letter: &str) -> String {
    letter
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

impl Display for AnalysisResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format())
    }
}

#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(setter(into))]
pub struct AnalysisRecord {
    pub text: String,
    pub kind: AnalysisKind,
    pub mode: AnalysisMode,
    pub result: AnalysisResult,
    #[builder(default = "Utc::now()")]
    pub timestamp: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn key(&self) -> AnalysisKey {
        AnalysisKey::new(&self.text, self.kind, self.mode)
    }

    pub fn matches(&self, key: &AnalysisKey) -> bool {
        self.text == key.text && self.kind == key.kind && self.mode == key.mode
    }

    pub fn is_success(&self) -> bool {
        !self.result.is_error()
    }
}

/// An analysis that has started but has no result yet. Completing it is the
/// only way to obtain the record that ends up in history.
#[derive(Debug, Clone)]
pub struct PendingAnalysis {
    key: AnalysisKey,
    started_at: DateTime<Utc>,
}

impl PendingAnalysis {
    pub fn start(key: AnalysisKey) -> Self {
        Self {
            key,
            started_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &AnalysisKey {
        &self.key
    }

    pub fn complete(self, result: AnalysisResult) -> AnalysisRecord {
        AnalysisRecord {
            text: self.key.text,
            kind: self.key.kind,
            mode: self.key.mode,
            result,
            timestamp: self.started_at,
        }
    }
}

use crate::shared::prelude::{AnalysisKind, CharacterCounts};

const VOWELS: &str = "aeiouAEIOU";

fn is_vowel(c: char) -> bool {
    VOWELS.contains(c)
}

/// A letter is anything with distinct lower and upper case forms. Digits,
/// punctuation and uncased scripts fall out.
fn is_letter(c: char) -> bool {
    !c.to_lowercase().eq(c.to_uppercase())
}

fn matches_kind(c: char, kind: AnalysisKind) -> bool {
    match kind {
        AnalysisKind::Vowels => is_vowel(c),
        AnalysisKind::Consonants => is_letter(c) && !is_vowel(c),
    }
}

/// Counts the vowels or consonants of `text`, keyed by the upper-cased
/// character.
pub fn count(text: &str, kind: AnalysisKind) -> CharacterCounts {
    let mut counts = CharacterCounts::new();
    for c in text.chars().filter(|c| matches_kind(*c, kind)) {
        *counts.entry(c.to_uppercase().collect()).or_insert(0) += 1;
    }
    counts
}

/// Upper-cases keys of counts produced elsewhere. Keys that collapse onto the
/// same upper-case form are summed.
pub fn normalize_keys(counts: CharacterCounts) -> CharacterCounts {
    let mut normalized = CharacterCounts::new();
    for (key, value) in counts.into_iter().filter(|(_, value)| *value > 0) {
        *normalized.entry(key.to_uppercase()).or_insert(0) += value;
    }
    normalized
}

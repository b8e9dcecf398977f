//! Language-aware text normalization.
//!
//! Produces the canonical form of question and query text used for
//! embedding, deduplication, cache fingerprints, and the lexical index.
//! Normalization is deterministic, total for valid UTF-8, and idempotent:
//! `normalize(normalize(x)) == normalize(x)`. The pre-normalization text is
//! always kept for display; the normalized form is derived, never stored as
//! the source of truth.
//!
//! Arabic: diacritics (tashkeel) and tatweel are stripped, alef variants
//! fold to bare alef, teh marbuta folds to heh, alef maqsura folds to yeh.
//! English: lowercased. Both languages: punctuation stripped, whitespace
//! collapsed, input NFC-normalized first.

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::models::Language;

/// Arabic combining marks stripped during normalization: fathatan through
/// sukun, plus the superscript alef.
const TASHKEEL: std::ops::RangeInclusive<char> = '\u{064B}'..='\u{0652}';
const SUPERSCRIPT_ALEF: char = '\u{0670}';
const TATWEEL: char = '\u{0640}';

/// Normalize `text` into its canonical matching form for `language`.
pub fn normalize(text: &str, language: Language) -> String {
    let nfc: String = text.nfc().collect();

    let mapped: String = match language {
        Language::Ar => nfc
            .chars()
            .filter(|c| !TASHKEEL.contains(c) && *c != SUPERSCRIPT_ALEF && *c != TATWEEL)
            .map(fold_arabic_letter)
            .map(keep_word_char)
            .collect(),
        Language::En => nfc
            .chars()
            .flat_map(|c| c.to_lowercase())
            .map(keep_word_char)
            .collect(),
    };

    collapse_whitespace(&mapped)
}

/// Fold Arabic letter variants to a single canonical form.
fn fold_arabic_letter(c: char) -> char {
    match c {
        // alef with hamza above/below, alef with madda
        '\u{0623}' | '\u{0625}' | '\u{0622}' => '\u{0627}',
        // teh marbuta -> heh
        '\u{0629}' => '\u{0647}',
        // alef maqsura -> yeh
        '\u{0649}' => '\u{064A}',
        _ => c,
    }
}

/// Replace punctuation and symbols with spaces; keep letters and digits.
fn keep_word_char(c: char) -> char {
    if c.is_alphanumeric() {
        c
    } else {
        ' '
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a normalized string into match tokens.
pub fn tokenize(normalized: &str) -> Vec<String> {
    normalized.split_whitespace().map(str::to_string).collect()
}

/// Detect whether text is Arabic or English by Arabic codepoint ratio.
///
/// Mirrors the ingestion pipeline's heuristic: more than 30% Arabic-block
/// characters among alphabetic characters means Arabic. Empty or
/// non-alphabetic input defaults to English.
pub fn detect_language(text: &str) -> Language {
    let mut arabic = 0usize;
    let mut alphabetic = 0usize;

    for c in text.chars() {
        if c.is_alphabetic() {
            alphabetic += 1;
            if ('\u{0600}'..='\u{06FF}').contains(&c) {
                arabic += 1;
            }
        }
    }

    if alphabetic == 0 {
        return Language::En;
    }

    if (arabic as f64) / (alphabetic as f64) > 0.3 {
        Language::Ar
    } else {
        Language::En
    }
}

/// Deterministic content hash of normalized question text, used for
/// deduplication and change detection.
pub fn content_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

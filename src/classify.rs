//! Keyword classification of news items.
//!
//! Three pure lookups over explicit tables:
//!
//! - [`competitor`]: which competitor an item is about
//! - [`tags`]: which categories it touches, in table order
//! - [`assess`]: impact score and [`Severity`] derived from the tags
//!
//! Keywords match whole words, case-insensitively, so `"said"` does not
//! count as a mention of AI.

use crate::models::Severity;
use once_cell::sync::Lazy;
use regex::Regex;

/// Competitor name used when no alias matches.
pub const UNKNOWN_COMPETITOR: &str = "Unknown";

/// `(alias, display name)`; the first alias found wins.
const COMPETITORS: &[(&str, &str)] = &[
    ("isnetworld", "ISNetworld"),
    ("avetta", "Avetta"),
    ("kpa", "KPA Flex"),
    ("vendorpm", "VendorPM"),
];

/// `(tag, keywords, weight in hundredths)`.
const TAGS: &[(&str, &[&str], u32)] = &[
    ("AI", &["ai", "genai", "llm", "assistant", "machine learning"], 20),
    ("Pricing", &["price", "prices", "pricing"], 30),
    ("E-bidding", &["bid", "bids", "bidding", "tender", "rfp"], 20),
    ("Acquisition", &["acquire", "acquires", "acquired", "acquisition", "merger"], 40),
    ("Funding", &["funding", "raises", "investment"], 20),
    ("Partnership", &["partner", "partners", "partnership"], 10),
    ("Product", &["launch", "launches", "launched", "release", "unveils"], 10),
];

/// Score of an item with no tags, in hundredths.
const BASE_SCORE: u32 = 50;
const CRITICAL_AT: u32 = 90;
const WATCH_AT: u32 = 70;

static COMPETITOR_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    COMPETITORS
        .iter()
        .map(|&(alias, name)| (word_pattern(&[alias]), name))
        .collect()
});

static TAG_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    TAGS.iter()
        .map(|&(tag, keywords, _)| (word_pattern(keywords), tag))
        .collect()
});

fn word_pattern(keywords: &[&str]) -> Regex {
    let alternation = keywords
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).unwrap()
}

/// Name the competitor an item is about.
pub fn competitor(text: &str) -> &'static str {
    COMPETITOR_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, name)| *name)
        .unwrap_or(UNKNOWN_COMPETITOR)
}

/// Category labels found in `text`, in table order and without duplicates.
pub fn tags(text: &str) -> Vec<&'static str> {
    TAG_PATTERNS
        .iter()
        .filter(|(re, _)| re.is_match(text))
        .map(|(_, tag)| *tag)
        .collect()
}

/// Derive `(severity, impact score)` from a tag list.
///
/// The score is `0.5` plus the weight of every known tag, capped at `1.0`.
/// Unknown tags weigh nothing.
pub fn assess<S: AsRef<str>>(tags: &[S]) -> (Severity, f64) {
    let bonus: u32 = tags
        .iter()
        .filter_map(|t| TAGS.iter().find(|(tag, _, _)| *tag == t.as_ref()))
        .map(|(_, _, weight)| *weight)
        .sum();
    let score = (BASE_SCORE + bonus).min(100);

    let severity = if score >= CRITICAL_AT {
        Severity::Critical
    } else if score >= WATCH_AT {
        Severity::Watch
    } else {
        Severity::Info
    };
    (severity, f64::from(score) / 100.0)
}

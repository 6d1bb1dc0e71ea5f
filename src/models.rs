//! Data models for observed competitor news items.
//!
//! This module defines the one persisted type, [`Record`], plus the
//! [`Severity`] levels derived from its tags and the [`Observation`] a
//! collector hands over to build a record.
//!
//! Field names are serialized in camelCase because the snapshot file is read
//! directly by a web front end.

use crate::classify;
use crate::utils::{canonical_url, clean_text, fingerprint, strip_html, truncate_chars};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of characters kept from an item's summary.
pub const SUMMARY_MAX_CHARS: usize = 400;

/// How urgently an item deserves attention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Watch,
    Critical,
}

/// One observed competitor-news item, as stored in the snapshot.
///
/// Records are built once via [`Record::observe`] and never mutated; the
/// snapshot store either admits them or drops them as duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Fingerprint of `(sourceUrl, title, date)`.
    pub id: String,
    /// Competitor the item is about, or `"Unknown"`.
    #[serde(default = "unknown_competitor")]
    pub competitor: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    /// Human-readable name of the configured source.
    #[serde(default)]
    pub source_name: String,
    /// Canonical URL of the item.
    pub source_url: String,
    /// Publication time, used as the sort key.
    #[serde(with = "iso_date")]
    pub date: DateTime<Utc>,
    /// Category labels in detection order.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, alias = "impact_score")]
    pub impact_score: f64,
    #[serde(default)]
    pub severity: Severity,
}

fn unknown_competitor() -> String {
    classify::UNKNOWN_COMPETITOR.to_string()
}

/// Raw fields a collector extracted for one item, before normalization.
#[derive(Debug, Clone)]
pub struct Observation<'a> {
    pub source_name: &'a str,
    pub url: &'a str,
    pub title: &'a str,
    /// Summary text; may still contain markup.
    pub summary: &'a str,
    pub date: DateTime<Utc>,
}

impl Record {
    /// Build a record from what a collector observed.
    ///
    /// Canonicalizes the URL, cleans the title, strips and truncates the
    /// summary, classifies the text and derives the fingerprint.
    pub fn observe(obs: Observation<'_>) -> Self {
        let source_url = canonical_url(obs.url);
        let title = clean_text(obs.title);
        let summary = truncate_chars(&strip_html(obs.summary), SUMMARY_MAX_CHARS);

        let haystack = format!("{title} {summary} {source_url}");
        let competitor = classify::competitor(&haystack).to_string();
        let tags: Vec<String> = classify::tags(&haystack)
            .into_iter()
            .map(str::to_string)
            .collect();
        let (severity, impact_score) = classify::assess(tags.as_slice());

        Self {
            id: fingerprint(&source_url, &title, &obs.date),
            competitor,
            title,
            summary,
            source_name: obs.source_name.to_string(),
            source_url,
            date: obs.date,
            tags,
            impact_score,
            severity,
        }
    }
}

/// Serde adapter writing dates as `2024-01-02T00:00:00+00:00` and reading any
/// RFC 3339 offset, normalized to UTC.
mod iso_date {
    use crate::utils::iso8601;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&iso8601(date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn observation(url: &str) -> Observation<'_> {
        Observation {
            source_name: "Business Wire",
            url,
            title: "  Avetta   announces AI pricing assistant ",
            summary: "<p>Avetta unveils a new <b>AI</b> assistant.</p>",
            date: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_observe_normalizes_and_classifies() {
        let record = Record::observe(observation("https://www.businesswire.com/news/home/1/?utm_source=x"));
        assert_eq!(record.source_url, "https://www.businesswire.com/news/home/1");
        assert_eq!(record.title, "Avetta announces AI pricing assistant");
        assert_eq!(record.summary, "Avetta unveils a new AI assistant.");
        assert_eq!(record.competitor, "Avetta");
        assert_eq!(record.tags, vec!["AI", "Pricing", "Product"]);
        assert_eq!(record.severity, Severity::Critical);
        assert_eq!(record.id.len(), crate::utils::FINGERPRINT_LEN);
    }

    #[test]
    fn test_observe_same_content_same_id() {
        let a = Record::observe(observation("https://a.com/x?ref=1"));
        let b = Record::observe(observation("http://a.com/x/"));
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_summary_is_truncated() {
        let long = "word ".repeat(200);
        let record = Record::observe(Observation {
            summary: &long,
            ..observation("https://a.com/x")
        });
        assert_eq!(record.summary.chars().count(), SUMMARY_MAX_CHARS);
    }

    #[test]
    fn test_record_json_field_names() {
        let record = Record::observe(observation("https://a.com/x"));
        let value = serde_json::to_value(&record).unwrap();
        let obj = value.as_object().unwrap();
        for key in [
            "id",
            "competitor",
            "title",
            "summary",
            "sourceName",
            "sourceUrl",
            "date",
            "tags",
            "impactScore",
            "severity",
        ] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert_eq!(obj["date"], "2024-01-02T00:00:00+00:00");
        assert_eq!(obj["severity"], "critical");
    }

    #[test]
    fn test_record_reads_legacy_fields() {
        let json = r#"{
            "id": "abc123",
            "title": "Old item",
            "sourceUrl": "https://a.com/old",
            "date": "2023-12-31T23:00:00.250000-01:00",
            "impact_score": 0.7,
            "severity": "watch"
        }"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.impact_score, 0.7);
        assert_eq!(record.severity, Severity::Watch);
        assert_eq!(record.competitor, "Unknown");
        assert!(record.tags.is_empty());
        assert_eq!(
            record.date,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::milliseconds(250)
        );
    }
}

//! Utility functions for URL canonicalization, fingerprinting, text cleanup,
//! timestamp parsing, and file system checks.
//!
//! Everything here is pure except [`ensure_writable_dir`]. The collectors and
//! the snapshot store share these helpers so that a URL or a date observed by
//! one source compares equal to the same URL or date observed by another.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};
use url::Url;

/// Number of hex characters kept from the SHA-256 digest of a record.
pub const FINGERPRINT_LEN: usize = 12;

static RELATIVE_AGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)\s+(second|sec|minute|min|hour|hr|day|week|month)s?\s+ago$").unwrap()
});

static URL_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(20\d{2})[/-](\d{1,2})[/-](\d{1,2})(?:[/-]|$)").unwrap());

/// Normalize a URL so that two links to the same content compare equal.
///
/// The scheme is forced to `https` for plain `http`, userinfo, default ports,
/// query string and fragment are dropped, and trailing slashes are trimmed
/// from the path. Input without a scheme is treated as `https`.
///
/// Canonicalization is idempotent: `canonical_url(&canonical_url(u)) == canonical_url(u)`.
///
/// # Arguments
///
/// * `raw` - A link as found in a feed, page or API response
///
/// # Returns
///
/// The canonical form, or an empty string for blank input. Input the `url`
/// crate cannot parse is returned with its query, fragment and trailing
/// slashes stripped by hand.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(canonical_url("HTTP://Example.com/a/?utm=1#top"), "https://example.com/a");
/// ```
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let candidate = if trimmed.contains("://") {
        Cow::Borrowed(trimmed)
    } else {
        Cow::Owned(format!("https://{trimmed}"))
    };

    if let Ok(url) = Url::parse(&candidate) {
        if let Some(host) = url.host_str() {
            let scheme = match url.scheme() {
                "http" => "https",
                other => other,
            };
            // 443 is only non-default before the http upgrade.
            let port = url
                .port()
                .filter(|&p| !(scheme == "https" && p == 443))
                .map(|p| format!(":{p}"))
                .unwrap_or_default();
            let path = url.path().trim_end_matches('/');
            return format!("{scheme}://{host}{port}{path}");
        }
    }

    // Unparseable: strip by hand, then retry once the noise is gone.
    let stripped = strip_url_suffixes(trimmed);
    if stripped != trimmed {
        canonical_url(stripped)
    } else {
        stripped.to_string()
    }
}

fn strip_url_suffixes(raw: &str) -> &str {
    let end = raw.find(['?', '#']).unwrap_or(raw.len());
    raw[..end].trim_end_matches('/')
}

/// Format a timestamp the way snapshots store it (`2024-01-02T00:00:00+00:00`).
pub fn iso8601(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

/// Derive the deterministic record id from its canonical URL, title and date.
///
/// Two observations with identical `(url, title, date)` always share an id.
pub fn fingerprint(canonical_url: &str, title: &str, date: &DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_url.as_bytes());
    hasher.update(b"|");
    hasher.update(title.as_bytes());
    hasher.update(b"|");
    hasher.update(iso8601(date).as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(FINGERPRINT_LEN);
    id
}

/// Collapse all runs of whitespace to single spaces and trim.
pub fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip markup from a feed description or snippet and clean the text.
///
/// Character references such as `&nbsp;` or `&#169;` are decoded, including
/// in text that carries no tags at all (CDATA descriptions keep them raw).
pub fn strip_html(html: &str) -> String {
    if !html.contains(['<', '&']) {
        return clean_text(html);
    }
    let fragment = Html::parse_fragment(html);
    let text = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    clean_text(&text)
}

/// Keep at most `max` characters (not bytes) of `s`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut to `max` characters with an ellipsis and a count of
/// the remaining bytes appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    let kept = truncate_chars(s, max);
    if kept.len() == s.len() {
        kept
    } else {
        format!("{}…(+{} bytes)", kept, s.len() - kept.len())
    }
}

/// Parse a publication timestamp in any of the shapes feeds and pages use.
///
/// Accepted forms, tried in order: RFC 3339, RFC 2822, ISO-like timestamps
/// with a `+0000` style offset, naive ISO timestamps (taken as UTC), bare
/// `YYYY-MM-DD` dates, `January 2, 2024` / `Jan 2, 2024`, and relative ages
/// such as `3 hours ago` or `yesterday`, which are resolved against `now`.
pub fn parse_timestamp(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%d %B %Y", "%d %b %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
        }
    }

    parse_relative(s, now)
}

fn parse_relative(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lower = s.to_ascii_lowercase();
    match lower.as_str() {
        "just now" | "now" => return Some(now),
        "yesterday" => return Some(now - Duration::days(1)),
        _ => {}
    }

    let caps = RELATIVE_AGE.captures(&lower)?;
    let n: i64 = caps[1].parse().ok()?;
    let age = match &caps[2] {
        "second" | "sec" => Duration::seconds(n),
        "minute" | "min" => Duration::minutes(n),
        "hour" | "hr" => Duration::hours(n),
        "day" => Duration::days(n),
        "week" => Duration::weeks(n),
        "month" => Duration::days(30 * n),
        _ => return None,
    };
    Some(now - age)
}

/// Extract a `/YYYY/MM/DD/` (or `YYYY-MM-DD`) date embedded in a URL path.
pub fn date_from_url(url: &str) -> Option<DateTime<Utc>> {
    let caps = URL_DATE.captures(url)?;
    let year = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let day = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(0, 0, 0)
        .map(|n| n.and_utc())
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if it doesn't exist, then writes and removes a
/// scratch file. Used before collecting so a bad output location fails fast
/// instead of after every source has been fetched.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let scratch_path = path.join("..__write_check__");
    match stdfs::File::create(&scratch_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&scratch_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

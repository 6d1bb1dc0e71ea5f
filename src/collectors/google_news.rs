//! Google News search collector.
//!
//! Google News exposes search results as an RSS 2.0 feed, so this is a thin
//! layer over [`super::rss`]: it builds the search URL and strips the
//! ` - Publisher` suffix Google appends to every title.

use super::Batch;
use super::rss::{entry_to_record, fetch_entries};
use crate::fetch::Fetch;
use chrono::{DateTime, Utc};
use tracing::instrument;

const SEARCH_URL: &str = "https://news.google.com/rss/search";

/// Build the Google News RSS search URL for `query` (US English edition).
pub fn search_url(query: &str) -> String {
    format!(
        "{SEARCH_URL}?q={}&hl=en-US&gl=US&ceid=US:en",
        urlencoding::encode(query)
    )
}

/// Remove a trailing `" - {publisher}"` from a headline.
fn strip_publisher<'a>(title: &'a str, publisher: Option<&str>) -> &'a str {
    publisher
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .and_then(|p| title.strip_suffix(p))
        .and_then(|rest| rest.trim_end().strip_suffix('-'))
        .map(str::trim_end)
        .filter(|rest| !rest.is_empty())
        .unwrap_or(title)
}

/// Collect Google News results for `query`.
#[instrument(level = "info", skip(fetch, observed_at))]
pub async fn collect<F: Fetch>(fetch: &F, name: &str, query: &str, observed_at: DateTime<Utc>) -> Batch {
    let url = search_url(query);
    match fetch_entries(fetch, &url).await {
        Ok(mut entries) => {
            for entry in &mut entries {
                entry.title = strip_publisher(&entry.title, entry.publisher.as_deref()).to_string();
            }
            entries
                .iter()
                .filter_map(|entry| entry_to_record(entry, name, observed_at))
                .map(Ok)
                .collect()
        }
        Err(e) => vec![Err(e)],
    }
}

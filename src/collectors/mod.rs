//! News collectors, one per kind of configured source.
//!
//! Every collector follows the same contract: it turns one
//! [`SourceConfig`] into a finite, ordered [`Batch`] of records. A batch may
//! end with a single `Err`; nothing follows it. Failures never cross the
//! boundary of their own batch, so a dead feed costs only its own items.
//!
//! # Supported Sources
//!
//! | Kind | Module | Method |
//! |------|--------|--------|
//! | `rss` | [`rss`] | RSS 2.0 / RSS 1.0 / Atom via quick-xml |
//! | `google_news` | [`google_news`] | Google News RSS search |
//! | `html` | [`listing`] | Listing page + article pages via scraper |
//! | `web_search` | [`web_search`] | Serper news API, needs an API key |

pub mod google_news;
pub mod listing;
pub mod rss;
pub mod web_search;

use crate::config::SourceConfig;
use crate::fetch::{Fetch, FetchError};
use crate::models::Record;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Ordered output of one collector run. At most one `Err`, always last.
pub type Batch = Vec<Result<Record, CollectError>>;

/// Reasons a collector stops early.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("malformed feed from {url}: {reason}")]
    Feed { url: String, reason: String },

    #[error("malformed search response: {0}")]
    SearchResponse(#[from] serde_json::Error),

    #[error("invalid CSS selector {selector:?}: {reason}")]
    Selector { selector: String, reason: String },

    #[error("invalid URL {url:?}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Run-wide inputs shared by every collector.
#[derive(Debug, Clone)]
pub struct Context<'a> {
    /// Key for the premium search API; the `web_search` collector is
    /// skipped without one.
    pub search_api_key: Option<&'a str>,
    /// Fallback publication time for items that carry no date.
    pub observed_at: DateTime<Utc>,
}

/// A [`Batch`] tagged with the source it came from.
#[derive(Debug)]
pub struct SourceBatch {
    pub source: String,
    pub items: Batch,
}

/// Run the collector matching `source`.
#[instrument(level = "info", skip_all, fields(source = source.name(), kind = source.kind()))]
pub async fn collect<F: Fetch>(source: &SourceConfig, fetch: &F, ctx: &Context<'_>) -> SourceBatch {
    let items = match source {
        SourceConfig::Rss { name, url } => rss::collect(fetch, name, url, ctx.observed_at).await,
        SourceConfig::GoogleNews { name, query } => {
            google_news::collect(fetch, name, query, ctx.observed_at).await
        }
        SourceConfig::Html {
            name,
            url,
            link_selector,
            max_articles,
        } => {
            listing::collect(
                fetch,
                name,
                url,
                link_selector.as_deref(),
                *max_articles,
                ctx.observed_at,
            )
            .await
        }
        SourceConfig::WebSearch {
            name,
            query,
            num_results,
        } => {
            web_search::collect(
                fetch,
                name,
                query,
                *num_results,
                ctx.search_api_key,
                ctx.observed_at,
            )
            .await
        }
    };

    let ok = items.iter().filter(|item| item.is_ok()).count();
    let failed = items.len() > ok;
    info!(records = ok, failed, "Collected source");

    SourceBatch {
        source: source.name().to_string(),
        items,
    }
}

/// Run every configured collector, one after another, in configuration order.
pub async fn collect_all<F: Fetch>(
    sources: &[SourceConfig],
    fetch: &F,
    ctx: &Context<'_>,
) -> Vec<SourceBatch> {
    stream::iter(sources)
        .then(|source| collect(source, fetch, ctx))
        .collect()
        .await
}

/// Flatten batches into candidate records.
///
/// Records are yielded in batch order. The first `Err` of a batch is logged
/// and ends that batch; records it already yielded are kept.
pub fn candidates(batches: impl IntoIterator<Item = SourceBatch>) -> impl Iterator<Item = Record> {
    batches.into_iter().flat_map(|SourceBatch { source, items }| {
        items.into_iter().map_while(move |item| match item {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(source = %source, error = %e, "Source failed; skipping the rest of its items");
                None
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::Canned;
    use crate::models::Observation;
    use chrono::TimeZone;

    fn record(url: &str) -> Record {
        Record::observe(Observation {
            source_name: "test",
            url,
            title: "Avetta news",
            summary: "",
            date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        })
    }

    fn failure() -> CollectError {
        CollectError::Feed {
            url: "https://x.test/feed".to_string(),
            reason: "truncated".to_string(),
        }
    }

    #[test]
    fn test_candidates_keep_records_before_an_error() {
        let batches = vec![
            SourceBatch {
                source: "a".to_string(),
                items: vec![
                    Ok(record("https://a.test/1")),
                    Ok(record("https://a.test/2")),
                    Err(failure()),
                ],
            },
            SourceBatch {
                source: "b".to_string(),
                items: vec![Err(failure())],
            },
            SourceBatch {
                source: "c".to_string(),
                items: vec![Ok(record("https://c.test/1"))],
            },
        ];

        let urls: Vec<String> = candidates(batches).map(|r| r.source_url).collect();
        assert_eq!(urls, vec!["https://a.test/1", "https://a.test/2", "https://c.test/1"]);
    }

    #[tokio::test]
    async fn test_collect_all_isolates_failing_sources() {
        let feed = r#"<?xml version="1.0"?>
            <rss version="2.0"><channel><title>t</title>
              <item><title>Avetta launches tool</title><link>https://ok.test/a</link></item>
            </channel></rss>"#;
        let fetch = Canned::new().route("https://ok.test/feed", feed);
        let sources = vec![
            SourceConfig::Rss {
                name: "Dead".to_string(),
                url: "https://dead.test/feed".to_string(),
            },
            SourceConfig::Rss {
                name: "Alive".to_string(),
                url: "https://ok.test/feed".to_string(),
            },
        ];
        let ctx = Context {
            search_api_key: None,
            observed_at: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        };

        let batches = collect_all(&sources, &fetch, &ctx).await;
        assert_eq!(batches.len(), 2);
        assert!(matches!(batches[0].items[..], [Err(CollectError::Fetch(_))]));

        let records: Vec<Record> = candidates(batches).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_name, "Alive");
        assert_eq!(records[0].date, ctx.observed_at);
    }
}

//! Premium web-search news collector (Serper).
//!
//! Active only when an API key is configured. Results carry dates either as
//! absolute strings or as relative ages (`"3 hours ago"`); both are resolved
//! against the time of the run.

use super::Batch;
use crate::fetch::{Fetch, FetchRequest};
use crate::models::{Observation, Record};
use crate::utils::{date_from_url, parse_timestamp, truncate_for_log};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};

const SERPER_NEWS_URL: &str = "https://google.serper.dev/news";

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    news: Vec<NewsHit>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NewsHit {
    title: String,
    link: String,
    snippet: String,
    date: Option<String>,
}

/// The search request for `query`, authenticated with `api_key`.
pub fn search_request(query: &str, num_results: usize, api_key: &str) -> FetchRequest {
    FetchRequest::post_json(SERPER_NEWS_URL, json!({ "q": query, "num": num_results }))
        .header("X-API-KEY", api_key)
}

/// Collect news search results for `query`; empty when `api_key` is `None`.
#[instrument(level = "info", skip(fetch, api_key, observed_at))]
pub async fn collect<F: Fetch>(
    fetch: &F,
    name: &str,
    query: &str,
    num_results: usize,
    api_key: Option<&str>,
    observed_at: DateTime<Utc>,
) -> Batch {
    let Some(api_key) = api_key else {
        info!("No search API key configured; skipping web search");
        return Batch::new();
    };

    let body = match fetch.fetch(&search_request(query, num_results, api_key)).await {
        Ok(body) => body,
        Err(e) => return vec![Err(e.into())],
    };
    let response: SearchResponse = match serde_json::from_str(&body) {
        Ok(response) => response,
        Err(e) => {
            debug!(body = %truncate_for_log(&body, 200), "Unexpected search response");
            return vec![Err(e.into())];
        }
    };

    info!(count = response.news.len(), "Search returned results");
    response
        .news
        .iter()
        .filter(|hit| !hit.title.trim().is_empty() && !hit.link.trim().is_empty())
        .map(|hit| {
            let date = hit
                .date
                .as_deref()
                .and_then(|raw| parse_timestamp(raw, observed_at))
                .or_else(|| date_from_url(&hit.link))
                .unwrap_or(observed_at);
            Ok(Record::observe(Observation {
                source_name: name,
                url: &hit.link,
                title: &hit.title,
                summary: &hit.snippet,
                date,
            }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::CollectError;
    use crate::fetch::Method;
    use crate::fetch::testing::Canned;
    use chrono::{Duration, TimeZone};

    fn observed_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    const RESPONSE: &str = r#"{
      "searchParameters": {"q": "Avetta", "type": "news"},
      "news": [
        {"title": "Avetta raises new funding", "link": "https://news.test/avetta-funding?src=serper",
         "snippet": "The supplier platform raises...", "date": "3 hours ago", "source": "News Test"},
        {"title": "KPA Flex pricing change", "link": "https://news.test/2024/05/30/kpa",
         "snippet": "", "date": "sometime"},
        {"title": "", "link": "https://news.test/empty"},
        {"title": "VendorPM partners with Acme", "link": "https://news.test/vendorpm",
         "date": "May 28, 2024"}
      ]
    }"#;

    #[tokio::test]
    async fn test_skipped_without_api_key() {
        let fetch = Canned::new();
        let batch = collect(&fetch, "Serper", "Avetta", 10, None, observed_at()).await;
        assert!(batch.is_empty());
        assert!(fetch.requests.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_collect_resolves_dates_and_sends_key() {
        let fetch = Canned::new().route(SERPER_NEWS_URL, RESPONSE);
        let batch = collect(&fetch, "Serper", "Avetta", 10, Some("k3y"), observed_at()).await;

        let records: Vec<Record> = batch.into_iter().map(Result::unwrap).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].date, observed_at() - Duration::hours(3));
        assert_eq!(records[0].source_url, "https://news.test/avetta-funding");
        assert_eq!(records[0].tags, vec!["Funding"]);
        assert_eq!(records[1].date, Utc.with_ymd_and_hms(2024, 5, 30, 0, 0, 0).unwrap());
        assert_eq!(records[2].date, Utc.with_ymd_and_hms(2024, 5, 28, 0, 0, 0).unwrap());
        assert_eq!(records[2].competitor, "VendorPM");

        let requests = fetch.requests.borrow();
        assert_eq!(requests[0].method, Method::Post);
        assert_eq!(requests[0].headers, vec![("X-API-KEY".to_string(), "k3y".to_string())]);
        assert_eq!(requests[0].json, Some(json!({ "q": "Avetta", "num": 10 })));
    }

    #[tokio::test]
    async fn test_malformed_response_is_an_error() {
        let fetch = Canned::new().route(SERPER_NEWS_URL, "<html>rate limited</html>");
        let batch = collect(&fetch, "Serper", "Avetta", 10, Some("k"), observed_at()).await;
        assert!(matches!(batch[..], [Err(CollectError::SearchResponse(_))]));
    }

    #[tokio::test]
    async fn test_http_error_is_an_error() {
        let fetch = Canned::new().missing_status(401);
        let batch = collect(&fetch, "Serper", "Avetta", 10, Some("bad"), observed_at()).await;
        assert!(matches!(batch[..], [Err(CollectError::Fetch(_))]));
    }
}

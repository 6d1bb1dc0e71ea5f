//! HTML listing-page collector.
//!
//! Follows a two-phase pattern:
//!
//! 1. **Indexing**: fetch a newsroom or press listing page and pick the links
//!    that look like articles on the same site
//! 2. **Fetching**: download each article page and sniff its title, summary
//!    and publication date from the markup
//!
//! # Date sniffing
//!
//! Pages advertise their publication date in many ways. The first one found
//! and parseable wins:
//!
//! 1. JSON-LD `datePublished`, searching `@graph` and arrays
//! 2. `article:published_time`, `datePublished`, `pubdate` or `date` meta tags
//! 3. the first `<time datetime>`
//! 4. a `/YYYY/MM/DD/` date in the URL
//! 5. the time of the run

use super::{Batch, CollectError};
use crate::fetch::{Fetch, FetchRequest};
use crate::models::{Observation, Record};
use crate::utils::{clean_text, date_from_url, parse_timestamp};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;

const DEFAULT_LINK_SELECTOR: &str = "a[href]";

/// Path segments that mark index, taxonomy or boilerplate pages.
const SKIP_SEGMENTS: &[&str] = &[
    "tag", "tags", "category", "categories", "author", "authors", "page", "feed", "rss", "search",
    "login", "signup", "contact", "privacy", "terms", "careers",
];

/// File extensions that are never articles.
const ASSET_EXTENSIONS: &[&str] = &[
    ".pdf", ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".zip", ".mp4", ".mp3", ".xml", ".css",
    ".js",
];

static OG_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"meta[property="og:title"]"#).unwrap());
static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static META_DESCRIPTION: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[name="description"]"#).unwrap());
static OG_DESCRIPTION: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:description"]"#).unwrap());
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").unwrap());
static JSON_LD: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());
static META_DATE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        r#"meta[property="article:published_time"], meta[name="article:published_time"],
           meta[itemprop="datePublished"], meta[name="datePublished"],
           meta[name="pubdate"], meta[name="date"]"#,
    )
    .unwrap()
});
static TIME: Lazy<Selector> = Lazy::new(|| Selector::parse("time[datetime]").unwrap());

/// What could be read from one article page.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticlePage {
    pub title: String,
    pub summary: String,
    pub date: DateTime<Utc>,
}

fn host_without_www(url: &Url) -> Option<&str> {
    url.host_str().map(|h| h.strip_prefix("www.").unwrap_or(h))
}

/// Whether `link`, found on the listing page `listing`, plausibly points at an article.
///
/// The link must stay on the listing's site, differ from the listing itself,
/// avoid taxonomy and boilerplate paths and assets, and either extend the
/// listing's path, carry a date, or end in a slug.
pub fn looks_like_article(link: &Url, listing: &Url) -> bool {
    if !matches!(link.scheme(), "http" | "https") {
        return false;
    }
    if host_without_www(link).is_none() || host_without_www(link) != host_without_www(listing) {
        return false;
    }

    let path = link.path().trim_end_matches('/');
    let listing_path = listing.path().trim_end_matches('/');
    if path.is_empty() || path == listing_path {
        return false;
    }

    let lower = path.to_ascii_lowercase();
    if ASSET_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return false;
    }
    let segments: Vec<&str> = lower.split('/').filter(|s| !s.is_empty()).collect();
    if segments.iter().any(|s| SKIP_SEGMENTS.contains(s)) {
        return false;
    }

    let extends_listing = !listing_path.is_empty() && path.starts_with(&format!("{listing_path}/"));
    let slug = segments.last().is_some_and(|s| s.contains('-'));
    extends_listing || slug || date_from_url(path).is_some()
}

/// Article links on a listing page, resolved, deduplicated in page order and capped.
pub fn article_links(html: &str, listing: &Url, selector: &Selector, max_articles: usize) -> Vec<Url> {
    let document = Html::parse_document(html);
    document
        .select(selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| listing.join(href.trim()).ok())
        .map(|mut url| {
            url.set_fragment(None);
            url
        })
        .filter(|url| looks_like_article(url, listing))
        .unique_by(|url| url.as_str().trim_end_matches('/').to_string())
        .take(max_articles)
        .collect()
}

fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .filter_map(|el| el.value().attr("content"))
        .map(clean_text)
        .find(|s| !s.is_empty())
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .map(|el: ElementRef<'_>| clean_text(&el.text().collect::<String>()))
        .find(|s| !s.is_empty())
}

/// Find a `datePublished` anywhere in a JSON-LD value.
fn json_ld_date(value: &Value) -> Option<&str> {
    match value {
        Value::Array(items) => items.iter().find_map(json_ld_date),
        Value::Object(obj) => obj
            .get("datePublished")
            .and_then(Value::as_str)
            .or_else(|| obj.get("@graph").and_then(json_ld_date)),
        _ => None,
    }
}

fn date_candidates(document: &Html) -> Vec<String> {
    let json_ld = document
        .select(&JSON_LD)
        .filter_map(|script| serde_json::from_str::<Value>(&script.text().collect::<String>()).ok())
        .filter_map(|value| json_ld_date(&value).map(str::to_string));
    let meta = document
        .select(&META_DATE)
        .filter_map(|el| el.value().attr("content").map(str::to_string));
    let time = document
        .select(&TIME)
        .filter_map(|el| el.value().attr("datetime").map(str::to_string));

    json_ld.chain(meta).chain(time).collect()
}

/// Extract title, summary and date from an article page.
///
/// Returns `None` when the page has no usable title.
pub fn parse_article(html: &str, url: &str, observed_at: DateTime<Utc>) -> Option<ArticlePage> {
    let document = Html::parse_document(html);

    let title = meta_content(&document, &OG_TITLE)
        .or_else(|| first_text(&document, &H1))
        .or_else(|| first_text(&document, &TITLE))?;
    let summary = meta_content(&document, &META_DESCRIPTION)
        .or_else(|| meta_content(&document, &OG_DESCRIPTION))
        .or_else(|| first_text(&document, &PARAGRAPH))
        .unwrap_or_default();
    let date = date_candidates(&document)
        .iter()
        .find_map(|raw| parse_timestamp(raw, observed_at))
        .or_else(|| date_from_url(url))
        .unwrap_or(observed_at);

    Some(ArticlePage { title, summary, date })
}

/// Collect up to `max_articles` articles linked from the listing page at `url`.
#[instrument(level = "info", skip(fetch, observed_at))]
pub async fn collect<F: Fetch>(
    fetch: &F,
    name: &str,
    url: &str,
    link_selector: Option<&str>,
    max_articles: usize,
    observed_at: DateTime<Utc>,
) -> Batch {
    let links = match index_articles(fetch, url, link_selector, max_articles).await {
        Ok(links) => links,
        Err(e) => return vec![Err(e)],
    };

    let mut batch = Batch::with_capacity(links.len());
    for link in links {
        let body = match fetch.fetch(&FetchRequest::get(link.as_str())).await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %link, error = %e, "Article fetch failed");
                batch.push(Err(e.into()));
                break;
            }
        };
        match parse_article(&body, link.as_str(), observed_at) {
            Some(page) => batch.push(Ok(Record::observe(Observation {
                source_name: name,
                url: link.as_str(),
                title: &page.title,
                summary: &page.summary,
                date: page.date,
            }))),
            None => debug!(url = %link, "Article page has no title"),
        }
    }
    batch
}

async fn index_articles<F: Fetch>(
    fetch: &F,
    url: &str,
    link_selector: Option<&str>,
    max_articles: usize,
) -> Result<Vec<Url>, CollectError> {
    let listing = Url::parse(url).map_err(|source| CollectError::Url {
        url: url.to_string(),
        source,
    })?;
    let css = link_selector.unwrap_or(DEFAULT_LINK_SELECTOR);
    let selector = Selector::parse(css).map_err(|e| CollectError::Selector {
        selector: css.to_string(),
        reason: e.to_string(),
    })?;

    let html = fetch.fetch(&FetchRequest::get(url)).await?;
    let links = article_links(&html, &listing, &selector, max_articles);
    info!(count = links.len(), source = url, "Indexed article URLs");
    debug!(urls = ?links.iter().map(Url::as_str).collect::<Vec<_>>(), "Article URLs");
    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::Canned;
    use chrono::TimeZone;

    fn observed_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    const LISTING: &str = r##"<html><body>
      <nav><a href="/">Home</a><a href="/newsroom">Newsroom</a><a href="/careers/open-roles">Jobs</a></nav>
      <a class="card" href="/newsroom/avetta-launches-ai-assistant">Launch</a>
      <a class="card" href="/newsroom/avetta-launches-ai-assistant/#top">Launch again</a>
      <a class="card" href="https://www.avetta.test/newsroom/pricing-update">Pricing</a>
      <a href="/newsroom/tag/product">Tag</a>
      <a href="/files/annual-report.pdf">Report</a>
      <a href="https://other.test/newsroom/story-one">Elsewhere</a>
      <a href="mailto:press@avetta.test">Mail</a>
      <a class="card" href="/newsroom/missing-story">Missing</a>
    </body></html>"##;

    #[test]
    fn test_looks_like_article() {
        let listing = url("https://www.avetta.test/newsroom");
        assert!(looks_like_article(&url("https://avetta.test/newsroom/item-1"), &listing));
        assert!(looks_like_article(&url("https://www.avetta.test/2024/05/06/story"), &listing));
        assert!(looks_like_article(&url("https://www.avetta.test/blog/new-release"), &listing));
        assert!(!looks_like_article(&url("https://www.avetta.test/newsroom/"), &listing));
        assert!(!looks_like_article(&url("https://www.avetta.test/about"), &listing));
        assert!(!looks_like_article(&url("https://www.avetta.test/author/jane-doe"), &listing));
        assert!(!looks_like_article(&url("https://www.avetta.test/newsroom/page/2"), &listing));
        assert!(!looks_like_article(&url("https://www.avetta.test/newsroom/logo.png"), &listing));
        assert!(!looks_like_article(&url("https://cdn.test/newsroom/some-story"), &listing));
    }

    #[test]
    fn test_article_links_dedup_and_cap() {
        let listing = url("https://www.avetta.test/newsroom");
        let selector = Selector::parse(DEFAULT_LINK_SELECTOR).unwrap();

        let links = article_links(LISTING, &listing, &selector, 10);
        let links: Vec<&str> = links.iter().map(Url::as_str).collect();
        assert_eq!(
            links,
            vec![
                "https://www.avetta.test/newsroom/avetta-launches-ai-assistant",
                "https://www.avetta.test/newsroom/pricing-update",
                "https://www.avetta.test/newsroom/missing-story",
            ]
        );

        assert_eq!(article_links(LISTING, &listing, &selector, 1).len(), 1);
    }

    #[test]
    fn test_parse_article_prefers_og_and_json_ld() {
        let html = r#"<html><head>
          <title>Site | Avetta</title>
          <meta property="og:title" content="Avetta launches AI assistant">
          <meta name="description" content="A new assistant for supplier onboarding.">
          <meta property="article:published_time" content="2024-01-09T00:00:00Z">
          <script type="application/ld+json">
            {"@context": "https://schema.org", "@graph": [
              {"@type": "WebPage"},
              {"@type": "NewsArticle", "datePublished": "2024-01-08T15:30:00+00:00"}
            ]}
          </script>
        </head><body><h1>Headline</h1><p>First paragraph.</p></body></html>"#;

        let page = parse_article(html, "https://avetta.test/newsroom/x", observed_at()).unwrap();
        assert_eq!(page.title, "Avetta launches AI assistant");
        assert_eq!(page.summary, "A new assistant for supplier onboarding.");
        assert_eq!(page.date, Utc.with_ymd_and_hms(2024, 1, 8, 15, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_article_fallback_chain() {
        let html = r#"<html><head><title>Only title</title></head>
          <body><h1>  KPA   update </h1><p></p><p>Body text.</p>
          <time datetime="2024-03-02">March 2</time></body></html>"#;
        let page = parse_article(html, "https://kpa.test/news/kpa-update", observed_at()).unwrap();
        assert_eq!(page.title, "KPA update");
        assert_eq!(page.summary, "Body text.");
        assert_eq!(page.date, Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());

        let bare = "<html><head><title>T</title></head><body></body></html>";
        let page = parse_article(bare, "https://kpa.test/2024/04/05/t", observed_at()).unwrap();
        assert_eq!(page.date, Utc.with_ymd_and_hms(2024, 4, 5, 0, 0, 0).unwrap());
        let page = parse_article(bare, "https://kpa.test/news/t", observed_at()).unwrap();
        assert_eq!(page.date, observed_at());

        assert!(parse_article("<html><body><p>x</p></body></html>", "https://kpa.test/a", observed_at()).is_none());
    }

    #[test]
    fn test_json_ld_date_in_arrays() {
        let value: Value = serde_json::from_str(
            r#"[{"@type": "Organization"}, {"@graph": [{"datePublished": "2024-02-02"}]}]"#,
        )
        .unwrap();
        assert_eq!(json_ld_date(&value), Some("2024-02-02"));
    }

    #[tokio::test]
    async fn test_collect_stops_at_failed_article() {
        let article = |title: &str| {
            format!(r#"<html><head><meta property="og:title" content="{title}"></head><body></body></html>"#)
        };
        let fetch = Canned::new()
            .route("https://www.avetta.test/newsroom", LISTING)
            .route(
                "https://www.avetta.test/newsroom/avetta-launches-ai-assistant",
                &article("Avetta launches AI assistant"),
            )
            .route(
                "https://www.avetta.test/newsroom/missing-story",
                &article("Never reached"),
            );

        let batch = collect(
            &fetch,
            "Avetta Newsroom",
            "https://www.avetta.test/newsroom",
            Some("a.card[href]"),
            10,
            observed_at(),
        )
        .await;

        assert_eq!(batch.len(), 2);
        let first = batch[0].as_ref().unwrap();
        assert_eq!(first.title, "Avetta launches AI assistant");
        assert_eq!(first.source_name, "Avetta Newsroom");
        assert!(matches!(batch[1], Err(CollectError::Fetch(_))));
        assert_eq!(fetch.requests.borrow().len(), 3);
    }

    #[tokio::test]
    async fn test_collect_rejects_bad_selector() {
        let fetch = Canned::new();
        let batch = collect(&fetch, "x", "https://a.test/news", Some("a[[["), 5, observed_at()).await;
        assert!(matches!(batch[..], [Err(CollectError::Selector { .. })]));
        assert!(fetch.requests.borrow().is_empty());
    }
}

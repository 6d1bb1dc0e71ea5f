//! RSS and Atom feed collector.
//!
//! Handles the three shapes news feeds come in:
//!
//! - RSS 2.0: `rss/channel/item`
//! - RSS 1.0 (RDF): `rdf:RDF/item`, items beside the channel
//! - Atom: `feed/entry`, links carried in `href` attributes
//!
//! Element names are matched without their namespace prefix, so `dc:date`
//! is read as `date`.

use super::{Batch, CollectError};
use crate::fetch::{Fetch, FetchRequest};
use crate::models::{Observation, Record};
use crate::utils::{date_from_url, parse_timestamp};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use regex::{Captures, Regex};
use serde::Deserialize;
use tracing::{debug, info, instrument};

static NAMED_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!\[CDATA\[.*?\]\]>|&([A-Za-z][A-Za-z0-9]*);").unwrap());

/// HTML entities feeds use although XML does not define them.
const HTML_ENTITIES: &[(&str, &str)] = &[
    ("nbsp", "&#160;"),
    ("ndash", "&#8211;"),
    ("mdash", "&#8212;"),
    ("lsquo", "&#8216;"),
    ("rsquo", "&#8217;"),
    ("ldquo", "&#8220;"),
    ("rdquo", "&#8221;"),
    ("hellip", "&#8230;"),
    ("copy", "&#169;"),
    ("reg", "&#174;"),
    ("trade", "&#8482;"),
];

/// One item of a parsed feed, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub summary: String,
    /// Raw publication date as written in the feed.
    pub published: Option<String>,
    /// Publisher named by an RSS `<source>` element.
    pub publisher: Option<String>,
}

/// Text content and the attributes we care about of any feed element.
#[derive(Debug, Default, Deserialize)]
struct Node {
    #[serde(rename = "$text", default)]
    text: Option<String>,
    #[serde(rename = "@href", default)]
    href: Option<String>,
    #[serde(rename = "@rel", default)]
    rel: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Document {
    #[serde(default)]
    channel: Vec<Channel>,
    #[serde(default)]
    item: Vec<Item>,
    #[serde(default)]
    entry: Vec<Item>,
}

#[derive(Debug, Default, Deserialize)]
struct Channel {
    #[serde(default)]
    item: Vec<Item>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Item {
    title: Vec<Node>,
    link: Vec<Node>,
    description: Vec<Node>,
    summary: Vec<Node>,
    #[serde(rename = "pubDate")]
    pub_date: Vec<Node>,
    published: Vec<Node>,
    updated: Vec<Node>,
    #[serde(alias = "dc:date")]
    date: Vec<Node>,
    source: Vec<Node>,
}

fn first_text(nodes: &[Node]) -> Option<String> {
    nodes
        .iter()
        .filter_map(|n| n.text.as_deref())
        .map(str::trim)
        .find(|t| !t.is_empty())
        .map(str::to_string)
}

/// RSS links are text; Atom links are `href` attributes, preferring `rel="alternate"`.
fn item_link(nodes: &[Node]) -> Option<String> {
    first_text(nodes).or_else(|| {
        nodes
            .iter()
            .filter(|n| matches!(n.rel.as_deref(), None | Some("alternate")))
            .filter_map(|n| n.href.as_deref())
            .map(str::trim)
            .find(|h| !h.is_empty())
            .map(str::to_string)
    })
}

impl From<Item> for FeedEntry {
    fn from(item: Item) -> Self {
        let summary = first_text(&item.description)
            .or_else(|| first_text(&item.summary))
            .unwrap_or_default();
        let published = [&item.pub_date, &item.published, &item.updated, &item.date]
            .into_iter()
            .find_map(|nodes| first_text(nodes));

        Self {
            title: first_text(&item.title).unwrap_or_default(),
            link: item_link(&item.link).unwrap_or_default(),
            summary,
            published,
            publisher: first_text(&item.source),
        }
    }
}

/// Replace HTML-only named entities with numeric references XML accepts.
///
/// The five XML entities are kept, known HTML ones are mapped, anything else
/// becomes a plain space. CDATA sections are copied through untouched since
/// XML never decodes references inside them.
pub fn scrub_entities(xml: &str) -> String {
    NAMED_ENTITY
        .replace_all(xml, |caps: &Captures<'_>| {
            let Some(name) = caps.get(1).map(|m| m.as_str()) else {
                return caps[0].to_string();
            };
            if matches!(name, "amp" | "lt" | "gt" | "quot" | "apos") {
                return caps[0].to_string();
            }
            HTML_ENTITIES
                .iter()
                .find(|(entity, _)| *entity == name)
                .map(|(_, numeric)| numeric.to_string())
                .unwrap_or_else(|| " ".to_string())
        })
        .into_owned()
}

/// Parse an RSS 2.0, RSS 1.0 or Atom document into entries, in feed order.
pub fn parse_feed(xml: &str, url: &str) -> Result<Vec<FeedEntry>, CollectError> {
    let malformed = |reason: String| CollectError::Feed {
        url: url.to_string(),
        reason,
    };

    if !(xml.contains("<rss") || xml.contains("<feed") || xml.contains("RDF")) {
        return Err(malformed("not an RSS or Atom document".to_string()));
    }

    let doc: Document = from_str(&scrub_entities(xml)).map_err(|e| malformed(e.to_string()))?;
    let entries = doc
        .channel
        .into_iter()
        .flat_map(|c| c.item)
        .chain(doc.item)
        .chain(doc.entry)
        .map(FeedEntry::from)
        .collect();
    Ok(entries)
}

/// Normalize a feed entry into a record; `None` without a title or a link.
///
/// The date falls back to one embedded in the link, then to `observed_at`.
pub fn entry_to_record(entry: &FeedEntry, source_name: &str, observed_at: DateTime<Utc>) -> Option<Record> {
    if entry.title.is_empty() || entry.link.is_empty() {
        debug!(title = %entry.title, link = %entry.link, "Skipping incomplete feed entry");
        return None;
    }

    let date = entry
        .published
        .as_deref()
        .and_then(|raw| parse_timestamp(raw, observed_at))
        .or_else(|| date_from_url(&entry.link))
        .unwrap_or(observed_at);

    Some(Record::observe(Observation {
        source_name,
        url: &entry.link,
        title: &entry.title,
        summary: &entry.summary,
        date,
    }))
}

/// Fetch and parse the feed at `url`.
pub async fn fetch_entries<F: Fetch>(fetch: &F, url: &str) -> Result<Vec<FeedEntry>, CollectError> {
    let body = fetch.fetch(&FetchRequest::get(url)).await?;
    let entries = parse_feed(&body, url)?;
    info!(count = entries.len(), source = url, "Parsed feed entries");
    Ok(entries)
}

/// Collect every complete entry of the feed at `url`.
#[instrument(level = "info", skip(fetch, observed_at))]
pub async fn collect<F: Fetch>(fetch: &F, name: &str, url: &str, observed_at: DateTime<Utc>) -> Batch {
    match fetch_entries(fetch, url).await {
        Ok(entries) => entries
            .iter()
            .filter_map(|entry| entry_to_record(entry, name, observed_at))
            .map(Ok)
            .collect(),
        Err(e) => vec![Err(e)],
    }
}

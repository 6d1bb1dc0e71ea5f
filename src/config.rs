//! Source configuration.
//!
//! The list of sources to collect from is read from a YAML file when one is
//! given on the command line, otherwise the built-in [`Config::default`] is
//! used.
//!
//! ```yaml
//! sources:
//!   - type: rss
//!     name: Business Wire
//!     url: https://feed.businesswire.com/rss/home/?rss=G1QFDERJXkJeEF9YXA==
//!   - type: google_news
//!     name: Google News (Avetta)
//!     query: Avetta
//!   - type: html
//!     name: Avetta Newsroom
//!     url: https://www.avetta.com/newsroom
//!     link_selector: "a.news-card[href]"
//!     max_articles: 8
//!   - type: web_search
//!     name: Serper News
//!     query: ISNetworld OR Avetta OR "KPA Flex" OR VendorPM
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, instrument};
use url::Url;

/// Default cap on article pages fetched from one HTML listing page.
pub const DEFAULT_MAX_ARTICLES: usize = 10;

/// Default number of results requested from the web-search API.
pub const DEFAULT_SEARCH_RESULTS: usize = 20;

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid source {name:?}: {reason}")]
    Invalid { name: String, reason: String },
}

/// One configured news source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum SourceConfig {
    /// An RSS 2.0, RSS 1.0 or Atom feed.
    Rss { name: String, url: String },

    /// A Google News RSS search.
    GoogleNews { name: String, query: String },

    /// An HTML listing page whose links lead to article pages.
    Html {
        name: String,
        url: String,
        /// CSS selector for article anchors; every `a[href]` when absent.
        #[serde(default)]
        link_selector: Option<String>,
        #[serde(default = "default_max_articles")]
        max_articles: usize,
    },

    /// A premium web-search news API; skipped when no API key is provided.
    WebSearch {
        name: String,
        query: String,
        #[serde(default = "default_search_results")]
        num_results: usize,
    },
}

fn default_max_articles() -> usize {
    DEFAULT_MAX_ARTICLES
}

fn default_search_results() -> usize {
    DEFAULT_SEARCH_RESULTS
}

impl SourceConfig {
    /// The configured display name.
    pub fn name(&self) -> &str {
        match self {
            SourceConfig::Rss { name, .. }
            | SourceConfig::GoogleNews { name, .. }
            | SourceConfig::Html { name, .. }
            | SourceConfig::WebSearch { name, .. } => name,
        }
    }

    /// Short label of the collector kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceConfig::Rss { .. } => "rss",
            SourceConfig::GoogleNews { .. } => "google_news",
            SourceConfig::Html { .. } => "html",
            SourceConfig::WebSearch { .. } => "web_search",
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            name: self.name().to_string(),
            reason,
        };

        if self.name().trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        match self {
            SourceConfig::Rss { url, .. } | SourceConfig::Html { url, .. } => {
                let parsed = Url::parse(url).map_err(|e| invalid(format!("url {url:?}: {e}")))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(invalid(format!("url {url:?} is not http(s)")));
                }
            }
            SourceConfig::GoogleNews { query, .. } | SourceConfig::WebSearch { query, .. } => {
                if query.trim().is_empty() {
                    return Err(invalid("query must not be empty".to_string()));
                }
            }
        }
        if let SourceConfig::Html { max_articles: 0, .. } = self {
            return Err(invalid("max_articles must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// The full set of sources for one run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub sources: Vec<SourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let google = |competitor: &str| SourceConfig::GoogleNews {
            name: format!("Google News ({competitor})"),
            query: format!("\"{competitor}\""),
        };

        Self {
            sources: vec![
                SourceConfig::Rss {
                    name: "Business Wire".to_string(),
                    url: "https://www.businesswire.com/portal/site/home/news/rss/".to_string(),
                },
                google("ISNetworld"),
                google("Avetta"),
                google("KPA Flex"),
                google("VendorPM"),
                SourceConfig::WebSearch {
                    name: "Serper News".to_string(),
                    query: "ISNetworld OR Avetta OR \"KPA Flex\" OR VendorPM".to_string(),
                    num_results: DEFAULT_SEARCH_RESULTS,
                },
            ],
        }
    }
}

impl Config {
    /// Parse and validate a YAML configuration document.
    pub fn from_yaml(yaml: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        for source in &config.sources {
            source.validate()?;
        }
        Ok(config)
    }

    /// Load the configuration at `path`, or the built-in defaults when `None`.
    #[instrument(level = "info")]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            let config = Config::default();
            info!(sources = config.sources.len(), "Using built-in source list");
            return Ok(config);
        };

        let yaml = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&yaml, path)?;
        info!(sources = config.sources.len(), "Loaded source configuration");
        Ok(config)
    }
}

//! Command-line interface definitions for rival_watch.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Every option is optional and can also be provided via an environment
//! variable, so a scheduled job can run the binary with no arguments.

use crate::store::DEFAULT_CAP;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for one collection run.
///
/// # Examples
///
/// ```sh
/// # Defaults: built-in sources, public/data/insights.json
/// rival_watch
///
/// # Custom sources and output, with the premium search collector enabled
/// rival_watch -c sources.yaml -o site/insights.json --search-api-key YOUR_KEY
///
/// # See what would be added without writing
/// rival_watch --dry-run
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path of the insights snapshot (JSON)
    #[arg(short, long, env = "INSIGHTS_PATH", default_value = "public/data/insights.json")]
    pub output: PathBuf,

    /// Optional path to a YAML source configuration
    #[arg(short, long, env = "RIVAL_WATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Maximum number of insights kept in the snapshot
    #[arg(long, env = "INSIGHTS_CAP", default_value_t = DEFAULT_CAP)]
    pub cap: usize,

    /// Serper API key; the web search collector is skipped without it
    #[arg(long, env = "SERPER_API_KEY", hide_env_values = true)]
    pub search_api_key: Option<String>,

    /// Collect and merge, but do not write the snapshot
    #[arg(long)]
    pub dry_run: bool,
}

use anyhow::{Error, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(version, about = "Search correlated calls across session indexes")]
pub struct Cli {
    #[clap(long, default_value = "callscope.toml")]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a search and print one correlated call per line
    Search {
        /// Window start, milliseconds since epoch
        #[clap(long)]
        created_at: i64,
        /// Window end, milliseconds since epoch
        #[clap(long)]
        terminated_at: i64,
        /// Free-text query, e.g. "sip.caller=alice rtp.mos<4"
        #[clap(long, default_value = "")]
        query: String,
    },
    /// Load JSONL documents into a collection
    Import {
        #[clap(long)]
        collection: String,
        file: String,
    },
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    Sqlite { root: String },
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Sqlite {
            root: "data".to_string(),
        }
    }
}

/// Correlation knobs. The aggregation timeout is the clock-skew budget for
/// grouping temporally adjacent legs; the termination timeout is the slack
/// applied when either leg is still in progress.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub use_x_correlation_header: bool,
    pub max_legs: usize,
    pub aggregation_timeout: i64,
    pub termination_timeout: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            use_x_correlation_header: true,
            max_legs: 10,
            aggregation_timeout: 60_000,
            termination_timeout: 10_000,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let config = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("{}: {}", e, path))?,
        )?;
        Ok(config)
    }
}

//! Command-line interface.
//!
//! Thin consumer of the library: parses arguments, loads configuration,
//! builds the search spec, and prints entries as plain text. Rendering
//! beyond that (color, templates) is out of scope here.

pub mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::{FuseError, Result};

/// Federated log search across Elasticsearch/OpenSearch, Splunk, CloudWatch
/// Insights, and remote files.
#[derive(Debug, Parser)]
#[command(name = "logfuse", version, about)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text.
    Text,
    /// Structured JSON lines.
    Json,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a search against one or more configured sources.
    Query(QueryArgs),
    /// Discover distinct values for the named fields.
    Fields(FieldsArgs),
}

/// Arguments for `logfuse query`.
#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Source context to query; repeat to federate across sources.
    #[arg(short = 'c', long = "context", required = true)]
    pub contexts: Vec<String>,

    /// Search template to start from.
    #[arg(short = 's', long = "search")]
    pub search: Option<String>,

    /// field=value filter; repeatable.
    #[arg(short = 'f', long = "field", value_name = "FIELD=VALUE")]
    pub fields: Vec<String>,

    /// field=operator override for a filter; repeatable.
    #[arg(long = "condition", value_name = "FIELD=OP")]
    pub conditions: Vec<String>,

    /// Relative time window, e.g. 30m or 1h.
    #[arg(long)]
    pub last: Option<String>,

    /// Absolute lower time bound.
    #[arg(long)]
    pub gte: Option<String>,

    /// Absolute upper time bound.
    #[arg(long)]
    pub lte: Option<String>,

    /// Maximum number of entries (global when federated).
    #[arg(short = 'n', long)]
    pub size: Option<i64>,

    /// Native backend query passed through verbatim.
    #[arg(long = "native")]
    pub native_query: Option<String>,

    /// Live-tail new entries until interrupted.
    #[arg(long)]
    pub follow: bool,

    /// Pagination token from a previous single-source query.
    #[arg(long)]
    pub page_token: Option<String>,

    /// KEY=VALUE runtime variable for ${VAR} substitution; repeatable.
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,
}

/// Arguments for `logfuse fields`.
#[derive(Debug, Args)]
pub struct FieldsArgs {
    /// Source context to inspect.
    #[arg(short = 'c', long = "context")]
    pub context: String,

    /// Field names to collect distinct values for.
    #[arg(required = true)]
    pub fields: Vec<String>,

    /// Search template to start from.
    #[arg(short = 's', long = "search")]
    pub search: Option<String>,

    /// Relative time window, e.g. 30m or 1h.
    #[arg(long)]
    pub last: Option<String>,

    /// Sample size for value discovery.
    #[arg(short = 'n', long)]
    pub size: Option<i64>,
}

/// Parse arguments and run the selected command.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| FuseError::io("Failed to build async runtime", e))?;

    runtime.block_on(async move {
        let config = match &cli.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };
        match cli.command {
            Command::Query(args) => commands::query::run(config, args).await,
            Command::Fields(args) => commands::fields::run(config, args).await,
        }
    })
}

fn init_logging(level: &str, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Split a repeatable `KEY=VALUE` argument.
pub(crate) fn split_pair<'a>(raw: &'a str, what: &'static str) -> Result<(&'a str, &'a str)> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| FuseError::config(format!("expected KEY=VALUE for {what}, got '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_a_federated_query() {
        let cli = Cli::try_parse_from([
            "logfuse", "query", "-c", "prod-es", "-c", "audit", "-f", "level=ERROR", "--last",
            "30m", "-n", "100", "--follow",
        ])
        .unwrap();

        match cli.command {
            Command::Query(args) => {
                assert_eq!(args.contexts, vec!["prod-es", "audit"]);
                assert_eq!(args.fields, vec!["level=ERROR"]);
                assert_eq!(args.last.as_deref(), Some("30m"));
                assert_eq!(args.size, Some(100));
                assert!(args.follow);
            }
            other => panic!("expected query, got {other:?}"),
        }
    }

    #[test]
    fn context_is_required() {
        assert!(Cli::try_parse_from(["logfuse", "query"]).is_err());
    }

    #[test]
    fn split_pair_rules() {
        assert_eq!(split_pair("a=b", "field").unwrap(), ("a", "b"));
        assert_eq!(split_pair("a=b=c", "field").unwrap(), ("a", "b=c"));
        assert!(split_pair("ab", "field").is_err());
        assert!(split_pair("=b", "field").is_err());
    }
}

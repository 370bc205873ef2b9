//! Subcommand implementations.

pub mod fields;
pub mod query;

use std::collections::HashMap;

use crate::cli::split_pair;
use crate::error::Result;
use crate::model::LogEntry;

/// Parse repeatable `--var KEY=VALUE` arguments.
pub(crate) fn parse_vars(raw: &[String]) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    for pair in raw {
        let (key, value) = split_pair(pair, "--var")?;
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

/// Render an entry as one plain-text line.
pub(crate) fn format_entry(entry: &LogEntry) -> String {
    let mut line = String::new();
    if let Some(ts) = entry.timestamp {
        line.push_str(&ts.to_rfc3339());
        line.push(' ');
    }
    if !entry.context_id.is_empty() {
        line.push('[');
        line.push_str(&entry.context_id);
        line.push_str("] ");
    }
    if !entry.level.is_empty() {
        line.push_str(&entry.level);
        line.push(' ');
    }
    line.push_str(&entry.message);
    for (key, value) in &entry.fields {
        line.push(' ');
        line.push_str(key);
        line.push('=');
        line.push_str(&crate::model::render_value(value));
    }
    line
}

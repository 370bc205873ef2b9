//! Search-spec to SPL translation.
//!
//! SPL is assembled from three parts: the base (a trimmed native query, or
//! `index=...` when one is configured), the inline predicate compiled from
//! the effective filter, and pipeline clauses. Regex conditions cannot sit
//! inside a boolean predicate, so they always emit as their own `| regex`
//! (or `| where NOT match(...)`) pipeline segments.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::filter::{Filter, FilterKind, FilterOp, Logic, FREE_TEXT_FIELD};
use crate::search::LogSearch;

/// Default real-time window lower bound.
const DEFAULT_RT_EARLIEST: &str = "-5m";

/// A dispatchable Splunk search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// The SPL query, without the leading `search ` command.
    pub query: String,
    /// `earliest_time` form parameter.
    pub earliest_time: Option<String>,
    /// `latest_time` form parameter.
    pub latest_time: Option<String>,
    /// Dispatch with `search_mode=realtime`.
    pub realtime: bool,
}

/// Build the search request for a spec.
pub fn build_search_request(search: &LogSearch) -> Result<SearchRequest> {
    let (mut earliest, mut latest) = if let Some(last) = search.range.last.as_deref() {
        (Some(format!("-{last}")), Some("now".to_string()))
    } else {
        (
            search.range.gte.to_value(),
            search.range.lte.to_value(),
        )
    };

    let realtime = search.follow;
    if realtime {
        let lower = earliest
            .filter(|bound| !bound.is_empty())
            .unwrap_or_else(|| DEFAULT_RT_EARLIEST.to_string());
        earliest = Some(format!("rt{lower}"));

        let upper = latest
            .filter(|bound| !bound.is_empty() && bound != "now")
            .unwrap_or_default();
        latest = Some(format!("rt{upper}"));
    }

    Ok(SearchRequest {
        query: build_query(search)?,
        earliest_time: earliest,
        latest_time: latest,
        realtime,
    })
}

/// Build the SPL query string.
pub fn build_query(search: &LogSearch) -> Result<String> {
    let mut query = String::new();
    let mut used_native = false;

    if let Some(native) = search.native_query.as_deref() {
        query = trim_trailing_pipes(native);
        used_native = true;
    } else if let Some(index) = search.option_str("index") {
        if !index.is_empty() {
            query = format!("index={index}");
        }
    }

    let compiled = match search.effective_filter()? {
        Some(filter) => translate_filter(&filter, true),
        None => SplFilter::default(),
    };

    if !compiled.predicate.is_empty() {
        if used_native {
            // The user's pipeline stays in control; filters append as one
            // search command.
            query = format!("{query} | search {}", compiled.predicate);
        } else if query.is_empty() {
            query = compiled.predicate;
        } else {
            query = format!("{query} {}", compiled.predicate);
        }
    }

    for clause in &compiled.pipes {
        if query.is_empty() {
            query = format!("| {clause}");
        } else {
            query = format!("{query} | {clause}");
        }
    }

    if let Some(fields) = search.option_str_list("fields") {
        if !fields.is_empty() {
            query = format!("{query} | fields + {}", fields.join(", "));
        }
    }

    Ok(query)
}

/// Strip trailing whitespace and `|` characters, repeatedly.
fn trim_trailing_pipes(native: &str) -> String {
    let mut query = native;
    loop {
        let trimmed = query.trim_end();
        match trimmed.strip_suffix('|') {
            Some(stripped) => query = stripped,
            None => return trimmed.to_string(),
        }
    }
}

/// Compiled filter: an inline predicate plus standalone pipeline clauses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplFilter {
    /// Boolean predicate for the base search command.
    pub predicate: String,
    /// Pipeline segments (`regex ...`, `where NOT match(...)`).
    pub pipes: Vec<String>,
}

/// Translate a validated filter tree.
///
/// `top_level` AND groups join bare (the implicit AND of a search command);
/// nested multi-element groups are parenthesized.
#[must_use]
pub fn translate_filter(filter: &Filter, top_level: bool) -> SplFilter {
    match filter.kind() {
        FilterKind::Empty => SplFilter::default(),
        FilterKind::Leaf {
            field,
            op,
            value,
            negate,
        } => translate_leaf(field, op, value, negate),
        FilterKind::Branch { logic, children } => {
            let mut pipes = Vec::new();
            let mut parts = Vec::new();
            for child in children {
                let compiled = translate_filter(child, false);
                if !compiled.predicate.is_empty() {
                    parts.push(compiled.predicate);
                }
                pipes.extend(compiled.pipes);
            }

            let predicate = match logic {
                Logic::And => group(parts, " ", top_level),
                Logic::Or => group(parts, " OR ", top_level),
                Logic::Not => {
                    if parts.is_empty() {
                        String::new()
                    } else {
                        format!("NOT ({})", parts.join(" "))
                    }
                }
            };
            SplFilter { predicate, pipes }
        }
    }
}

fn group(parts: Vec<String>, separator: &str, top_level: bool) -> String {
    match parts.len() {
        0 => String::new(),
        1 => parts.into_iter().next().unwrap_or_default(),
        _ => {
            let joined = parts.join(separator);
            if top_level && separator == " " {
                joined
            } else {
                format!("({joined})")
            }
        }
    }
}

fn translate_leaf(field: &str, op: FilterOp, value: &str, negate: bool) -> SplFilter {
    // Regex lacks inline boolean form; it becomes its own pipeline clause.
    if op == FilterOp::Regex {
        let target = if field == FREE_TEXT_FIELD { "_raw" } else { field };
        let clause = if negate {
            format!("where NOT match({target},\"{}\")", escape_value(value))
        } else {
            format!("regex {target}=\"{}\"", escape_value(value))
        };
        return SplFilter {
            predicate: String::new(),
            pipes: vec![clause],
        };
    }

    let predicate = if field == FREE_TEXT_FIELD {
        // Bare term against the raw event; phrases are quoted.
        if value.contains(' ') {
            format!("\"{}\"", escape_value(value))
        } else {
            value.to_string()
        }
    } else {
        match op {
            FilterOp::Wildcard => format!("{field}=\"{}*\"", escape_value(value)),
            FilterOp::Exists => format!("{field}=*"),
            FilterOp::Gt => format!("{field}>{value}"),
            FilterOp::Gte => format!("{field}>={value}"),
            FilterOp::Lt => format!("{field}<{value}"),
            FilterOp::Lte => format!("{field}<={value}"),
            _ => format!("{field}=\"{}\"", escape_value(value)),
        }
    };

    let predicate = if negate {
        format!("NOT ({predicate})")
    } else {
        predicate
    };

    SplFilter {
        predicate,
        pipes: Vec::new(),
    }
}

fn escape_value(value: &str) -> String {
    value.replace('"', "\\\"")
}

/// Transforming commands produce tabular output and must be fetched from the
/// job's `/results` endpoint instead of `/events`.
static TRANSFORMING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\|\s*(stats|chart|timechart|top|rare|transaction|cluster|kmeans|eventstats|streamstats|bucket|bin|predict|trendline|geostats|sichart|sitimechart|mstats|tstats|table)\b",
    )
    .expect("transforming pattern is valid")
});

/// `| fields ...` transforms only without the `+` form.
static FIELDS_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\|\s*fields\s+(\+\s*)?").expect("fields pattern is valid"));

/// Detect whether the query contains a transforming command.
#[must_use]
pub fn is_transforming(query: &str) -> bool {
    if TRANSFORMING.is_match(query) {
        return true;
    }
    if let Some(caps) = FIELDS_CLAUSE.captures(query) {
        return caps.get(1).is_none();
    }
    false
}

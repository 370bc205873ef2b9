//! Search-spec to OpenSearch/Elasticsearch bool-DSL translation.

use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::backend::follower::TIMESTAMP_FORMAT_OPTION;
use crate::backend::parse_offset_token;
use crate::error::Result;
use crate::filter::{Filter, FilterKind, FilterOp, Logic, FREE_TEXT_FIELD};
use crate::search::LogSearch;
use crate::timefmt;

/// Free-text searches target the legacy `_all` meta field.
const ALL_FIELD: &str = "_all";

/// Build the `_search` request body.
///
/// The query is a single `bool.must` list holding, in order: the native
/// `query_string` when present, the translated effective filter, and the
/// `@timestamp` range clause. Hits come back newest-first via the descending
/// sort; `from` is the decoded offset token.
pub fn build_request(search: &LogSearch) -> Result<Value> {
    let mut must: Vec<Value> = Vec::new();

    if let Some(query) = search.native_query.as_deref() {
        must.push(json!({"query_string": {"query": query}}));
    }
    if let Some(filter) = search.effective_filter()? {
        must.push(translate_filter(&filter));
    }
    if let Some(range) = time_range_clause(search) {
        must.push(range);
    }

    let from = parse_offset_token(&search.page_token)?;
    Ok(json!({
        "query": {"bool": {"must": must}},
        "sort": [{"@timestamp": {"order": "desc", "unmapped_type": "boolean"}}],
        "size": search.size_or_default(),
        "from": from,
    }))
}

/// The `@timestamp` range clause, `None` when the search has no window.
fn time_range_clause(search: &LogSearch) -> Option<Value> {
    let layout = search.option_str(TIMESTAMP_FORMAT_OPTION);
    let layout = layout.as_deref();

    let (gte, lte) = if let Some(last) = search.range.last.as_deref() {
        let duration = timefmt::parse_go_duration(last)?;
        let now = Utc::now();
        (Some(now - duration.abs()), Some(now))
    } else {
        let gte = search
            .range
            .gte
            .as_deref()
            .and_then(|s| timefmt::parse_with(s, layout));
        let lte = search
            .range
            .lte
            .as_deref()
            .and_then(|s| timefmt::parse_with(s, layout));
        (gte, lte)
    };

    if gte.is_none() && lte.is_none() {
        return None;
    }

    let mut bounds = Map::new();
    bounds.insert(
        "format".to_string(),
        Value::String("strict_date_optional_time".to_string()),
    );
    if let Some(gte) = gte {
        bounds.insert(
            "gte".to_string(),
            Value::String(timefmt::format_with(gte, layout)),
        );
    }
    if let Some(lte) = lte {
        bounds.insert(
            "lte".to_string(),
            Value::String(timefmt::format_with(lte, layout)),
        );
    }
    Some(json!({"range": {"@timestamp": bounds}}))
}

/// Translate a validated filter tree into a DSL clause.
#[must_use]
pub fn translate_filter(filter: &Filter) -> Value {
    match filter.kind() {
        FilterKind::Empty => json!({"match_all": {}}),
        FilterKind::Leaf {
            field,
            op,
            value,
            negate,
        } => {
            let field = if field == FREE_TEXT_FIELD {
                ALL_FIELD
            } else {
                field
            };
            let clause = match op {
                FilterOp::Equals => json!({"term": {field: value}}),
                FilterOp::Match => json!({"match": {field: value}}),
                FilterOp::Wildcard => json!({"wildcard": {field: value}}),
                FilterOp::Regex => json!({"regexp": {field: value}}),
                FilterOp::Exists => json!({"exists": {"field": field}}),
                FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                    json!({"range": {field: {op.as_str(): value}}})
                }
            };
            if negate {
                json!({"bool": {"must_not": [clause]}})
            } else {
                clause
            }
        }
        FilterKind::Branch { logic, children } => {
            let translated: Vec<Value> = children.iter().map(translate_filter).collect();
            match logic {
                Logic::And => {
                    if translated.len() == 1 {
                        translated.into_iter().next().unwrap_or_else(|| json!({}))
                    } else {
                        json!({"bool": {"must": translated}})
                    }
                }
                Logic::Or => {
                    json!({"bool": {"should": translated, "minimum_should_match": 1}})
                }
                Logic::Not => json!({"bool": {"must_not": translated}}),
            }
        }
    }
}

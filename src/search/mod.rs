//! The backend-agnostic search specification.
//!
//! A [`LogSearch`] describes what to fetch without saying how: each backend
//! translates it into its own native request. Searches support
//! config-inheritance through [`LogSearch::merge_into`], `${VAR}`
//! substitution through [`LogSearch::resolve_variables`], and compile their
//! legacy field filters plus the explicit AST into one effective root via
//! [`LogSearch::effective_filter`].

pub mod vars;

use std::collections::HashMap;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::filter::Filter;
use crate::model::render_value;
use crate::opt::Opt;

use vars::VarResolver;

/// Internal option stamped by the aggregator to identify which source
/// produced an entry.
pub const CONTEXT_ID_OPTION: &str = "__context_id__";

/// Cap applied to initial batches when the search does not set `size`.
pub const DEFAULT_SIZE: usize = 200;

/// Refresh interval applied in follow mode when `refresh.duration` is unset.
pub const DEFAULT_REFRESH: Duration = Duration::from_secs(10);

/// Time window for the search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRange {
    /// Absolute lower bound, in any accepted timestamp format.
    #[serde(skip_serializing_if = "Opt::is_unset")]
    pub gte: Opt<String>,

    /// Absolute upper bound, in any accepted timestamp format.
    #[serde(skip_serializing_if = "Opt::is_unset")]
    pub lte: Opt<String>,

    /// Relative window ("30m", "1h"); takes precedence per backend rules.
    #[serde(skip_serializing_if = "Opt::is_unset")]
    pub last: Opt<String>,
}

impl SearchRange {
    /// True when no bound is set at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gte.is_unset() && self.lte.is_unset() && self.last.is_unset()
    }
}

/// Polling configuration for follow mode on pull backends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshOptions {
    /// Poll interval ("10s", "1m").
    #[serde(skip_serializing_if = "Opt::is_unset")]
    pub duration: Opt<String>,
}

/// Field extraction configuration for line-based sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldExtraction {
    /// Parse a trailing JSON object out of each line.
    #[serde(skip_serializing_if = "Opt::is_unset")]
    pub json: Opt<bool>,

    /// JSON key holding the message; defaults to "message".
    #[serde(skip_serializing_if = "Opt::is_unset")]
    pub json_message_key: Opt<String>,

    /// JSON key holding the level; defaults to "level".
    #[serde(skip_serializing_if = "Opt::is_unset")]
    pub json_level_key: Opt<String>,

    /// JSON key holding the timestamp; defaults to "timestamp".
    #[serde(skip_serializing_if = "Opt::is_unset")]
    pub json_timestamp_key: Opt<String>,

    /// Regex with named capture groups extracted into fields.
    #[serde(skip_serializing_if = "Opt::is_unset")]
    pub group_regex: Opt<String>,

    /// Regex with two capture groups, applied repeatedly for key=value pairs.
    #[serde(skip_serializing_if = "Opt::is_unset")]
    pub kv_regex: Opt<String>,

    /// Regex whose first capture group is parsed as the timestamp.
    #[serde(skip_serializing_if = "Opt::is_unset")]
    pub timestamp_regex: Opt<String>,
}

impl FieldExtraction {
    /// True when no extraction is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.json.is_unset()
            && self.json_message_key.is_unset()
            && self.json_level_key.is_unset()
            && self.json_timestamp_key.is_unset()
            && self.group_regex.is_unset()
            && self.kv_regex.is_unset()
            && self.timestamp_regex.is_unset()
    }
}

/// Display hints carried through merges for the rendering layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterOptions {
    /// Output template name or inline template.
    #[serde(skip_serializing_if = "Opt::is_unset")]
    pub template: Opt<String>,

    /// Timestamp display format.
    #[serde(skip_serializing_if = "Opt::is_unset")]
    pub timestamp_format: Opt<String>,

    /// Extra fields to show alongside the message.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub show_fields: Vec<String>,
}

impl PrinterOptions {
    fn merge_into(&self, child: &Self) -> Self {
        Self {
            template: child.template.clone().or_inherit(self.template.clone()),
            timestamp_format: child
                .timestamp_format
                .clone()
                .or_inherit(self.timestamp_format.clone()),
            show_fields: if child.show_fields.is_empty() {
                self.show_fields.clone()
            } else {
                child.show_fields.clone()
            },
        }
    }
}

/// A declared `${VAR}` input for the search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableSpec {
    /// Human-readable description for prompting.
    #[serde(skip_serializing_if = "Opt::is_unset")]
    pub description: Opt<String>,

    /// Declared type hint ("string", "number").
    #[serde(rename = "type", skip_serializing_if = "Opt::is_unset")]
    pub var_type: Opt<String>,

    /// Default expression; may itself contain variables.
    #[serde(skip_serializing_if = "Opt::is_unset")]
    pub default: Opt<String>,

    /// Whether the variable must resolve.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
}

/// The backend-agnostic query specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSearch {
    /// Native query string passed verbatim to backends that support one.
    #[serde(skip_serializing_if = "Opt::is_unset")]
    pub native_query: Opt<String>,

    /// Compatibility form of simple field filters: field name to value.
    #[serde(rename = "fields", skip_serializing_if = "IndexMap::is_empty")]
    pub legacy_fields: IndexMap<String, String>,

    /// Operators for `legacy_fields` entries; missing keys mean `equals`.
    #[serde(rename = "conditions", skip_serializing_if = "IndexMap::is_empty")]
    pub legacy_conditions: IndexMap<String, String>,

    /// The recursive filter AST.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,

    /// Time window.
    #[serde(skip_serializing_if = "SearchRange::is_empty")]
    pub range: SearchRange,

    /// Cap on returned entries; global when federated.
    #[serde(skip_serializing_if = "Opt::is_unset")]
    pub size: Opt<i64>,

    /// Polling configuration for follow mode.
    #[serde(skip_serializing_if = "refresh_is_empty")]
    pub refresh: RefreshOptions,

    /// Backend-specific knobs, never interpreted by the core.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub options: IndexMap<String, Value>,

    /// Opaque pagination cursor; the backend defines the format.
    #[serde(skip_serializing_if = "Opt::is_unset")]
    pub page_token: Opt<String>,

    /// Field extraction configuration for line-based sources.
    #[serde(skip_serializing_if = "FieldExtraction::is_empty")]
    pub field_extraction: FieldExtraction,

    /// Display hints; out of core scope but merged for completeness.
    #[serde(skip_serializing_if = "printer_is_empty")]
    pub printer_options: PrinterOptions,

    /// Declared `${VAR}` inputs.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub variables: IndexMap<String, VariableSpec>,

    /// Request streaming updates after the initial batch.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub follow: bool,
}

fn refresh_is_empty(r: &RefreshOptions) -> bool {
    r.duration.is_unset()
}

fn printer_is_empty(p: &PrinterOptions) -> bool {
    p.template.is_unset() && p.timestamp_format.is_unset() && p.show_fields.is_empty()
}

impl LogSearch {
    /// Merge this search (the parent template) into `child`, returning the
    /// combined spec. Child values win wherever the child explicitly set
    /// them; maps are shallow-merged with the child winning on key conflicts;
    /// both filters present wrap as `AND(parent, child)`; `follow` is true
    /// when either side requests it. Never fails.
    #[must_use]
    pub fn merge_into(&self, child: &Self) -> Self {
        let filter = match (&self.filter, &child.filter) {
            (Some(parent), Some(child)) => {
                Some(Filter::and(vec![parent.clone(), child.clone()]))
            }
            (Some(parent), None) => Some(parent.clone()),
            (None, child) => child.clone(),
        };

        Self {
            native_query: child
                .native_query
                .clone()
                .or_inherit(self.native_query.clone()),
            legacy_fields: merge_maps(&self.legacy_fields, &child.legacy_fields),
            legacy_conditions: merge_maps(&self.legacy_conditions, &child.legacy_conditions),
            filter,
            range: SearchRange {
                gte: child.range.gte.clone().or_inherit(self.range.gte.clone()),
                lte: child.range.lte.clone().or_inherit(self.range.lte.clone()),
                last: child.range.last.clone().or_inherit(self.range.last.clone()),
            },
            size: child.size.clone().or_inherit(self.size.clone()),
            refresh: RefreshOptions {
                duration: child
                    .refresh
                    .duration
                    .clone()
                    .or_inherit(self.refresh.duration.clone()),
            },
            options: merge_maps(&self.options, &child.options),
            page_token: child.page_token.clone().or_inherit(self.page_token.clone()),
            field_extraction: FieldExtraction {
                json: child
                    .field_extraction
                    .json
                    .clone()
                    .or_inherit(self.field_extraction.json.clone()),
                json_message_key: child
                    .field_extraction
                    .json_message_key
                    .clone()
                    .or_inherit(self.field_extraction.json_message_key.clone()),
                json_level_key: child
                    .field_extraction
                    .json_level_key
                    .clone()
                    .or_inherit(self.field_extraction.json_level_key.clone()),
                json_timestamp_key: child
                    .field_extraction
                    .json_timestamp_key
                    .clone()
                    .or_inherit(self.field_extraction.json_timestamp_key.clone()),
                group_regex: child
                    .field_extraction
                    .group_regex
                    .clone()
                    .or_inherit(self.field_extraction.group_regex.clone()),
                kv_regex: child
                    .field_extraction
                    .kv_regex
                    .clone()
                    .or_inherit(self.field_extraction.kv_regex.clone()),
                timestamp_regex: child
                    .field_extraction
                    .timestamp_regex
                    .clone()
                    .or_inherit(self.field_extraction.timestamp_regex.clone()),
            },
            printer_options: self.printer_options.merge_into(&child.printer_options),
            variables: merge_maps(&self.variables, &child.variables),
            follow: self.follow || child.follow,
        }
    }

    /// Compile legacy fields plus the explicit filter into one effective
    /// root, then validate it.
    ///
    /// Zero parts yield `None` (match everything), a single part is returned
    /// directly, multiple parts wrap in AND.
    pub fn effective_filter(&self) -> Result<Option<Filter>> {
        let mut parts: Vec<Filter> = Vec::with_capacity(self.legacy_fields.len() + 1);
        for (field, value) in &self.legacy_fields {
            parts.push(Filter {
                field: field.clone(),
                op: self
                    .legacy_conditions
                    .get(field)
                    .cloned()
                    .unwrap_or_default(),
                value: value.clone(),
                ..Filter::default()
            });
        }
        if let Some(filter) = &self.filter {
            parts.push(filter.clone());
        }

        let combined = match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Filter::and(parts)),
        };
        if let Some(filter) = &combined {
            filter.validate()?;
        }
        Ok(combined)
    }

    /// Substitute `${VAR}` tokens throughout the spec.
    ///
    /// Runs after [`merge_into`](Self::merge_into) and before a backend
    /// inspects the search. Lookup order: `runtime` map, process environment,
    /// the variable's declared default (recursively resolved). Unresolved
    /// tokens remain literal; this never fails.
    pub fn resolve_variables(&mut self, runtime: &HashMap<String, String>) {
        let defaults: IndexMap<String, String> = self
            .variables
            .iter()
            .filter_map(|(name, spec)| {
                spec.default
                    .as_value()
                    .map(|d| (name.clone(), d.clone()))
            })
            .collect();
        let resolver = VarResolver::new(runtime, defaults);

        if let Opt::Value(query) = &mut self.native_query {
            *query = resolver.substitute(query);
        }
        for value in self.legacy_fields.values_mut() {
            *value = resolver.substitute(value);
        }
        for value in self.options.values_mut() {
            substitute_value(value, &resolver);
        }
    }

    /// The entry cap for initial batches.
    #[must_use]
    pub fn size_or_default(&self) -> usize {
        match self.size.as_value() {
            Some(&n) if n > 0 => n as usize,
            _ => DEFAULT_SIZE,
        }
    }

    /// Context id stamped by the aggregator, or "unknown".
    #[must_use]
    pub fn context_id(&self) -> String {
        self.option_str(CONTEXT_ID_OPTION)
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Read a string-valued option. Non-string scalars are rendered through
    /// their JSON form; null and missing return `None`.
    #[must_use]
    pub fn option_str(&self, key: &str) -> Option<String> {
        match self.options.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => Some(render_value(value)),
        }
    }

    /// Read a string-list option; accepts a JSON array of strings or a
    /// comma-separated string.
    #[must_use]
    pub fn option_str_list(&self, key: &str) -> Option<Vec<String>> {
        match self.options.get(key)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .map(render_value)
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            Value::String(s) => Some(
                s.split(',')
                    .map(|part| part.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Read a bool-valued option, accepting "true"/"false" strings.
    #[must_use]
    pub fn option_bool(&self, key: &str) -> Option<bool> {
        match self.options.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Read a float-valued option, accepting numeric strings.
    #[must_use]
    pub fn option_f64(&self, key: &str) -> Option<f64> {
        match self.options.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Read a duration-valued option ("10s", "1m").
    #[must_use]
    pub fn option_duration(&self, key: &str) -> Option<Duration> {
        self.option_str(key)
            .and_then(|s| humantime::parse_duration(&s).ok())
    }

    /// The poll interval for follow mode.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        self.refresh
            .duration
            .as_deref()
            .and_then(|s| humantime::parse_duration(s).ok())
            .unwrap_or(DEFAULT_REFRESH)
    }
}

fn merge_maps<V: Clone>(parent: &IndexMap<String, V>, child: &IndexMap<String, V>) -> IndexMap<String, V> {
    let mut merged = parent.clone();
    for (key, value) in child {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

fn substitute_value(value: &mut Value, resolver: &VarResolver<'_>) {
    match value {
        Value::String(s) => *s = resolver.substitute(s),
        Value::Array(items) => {
            for item in items {
                substitute_value(item, resolver);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                substitute_value(item, resolver);
            }
        }
        _ => {}
    }
}

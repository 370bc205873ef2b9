//! Normalized data model for federated log results.
//!
//! Every backend parses its native wire format into [`LogEntry`], the one
//! record shape consumers render. Normalization migrates the reserved keys
//! `message`, `timestamp` and `level` out of the field map and into the
//! corresponding top-level attributes.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field map preserving the order fields arrived in from the backend.
pub type Fields = IndexMap<String, Value>;

/// Reserved field keys that migrate to top-level attributes.
pub const RESERVED_KEYS: [&str; 3] = ["message", "timestamp", "level"];

/// A normalized log record.
///
/// `timestamp` is `None` for rows without an instant (aggregated Splunk
/// results, for example); such entries sort before any timestamped entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Instant the entry was produced, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Raw message text.
    #[serde(default)]
    pub message: String,

    /// Severity string; empty when the source carries none.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub level: String,

    /// Remaining structured fields, in source order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub fields: Fields,

    /// Identifies which backend/context produced this entry in a federated
    /// query. Empty until the aggregator stamps it.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context_id: String,
}

impl LogEntry {
    /// Create an entry with just a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Case-insensitive field access.
    ///
    /// Looks up `key` exactly, then case-insensitively, then falls through to
    /// a capitalized variant of the requested key. Returns the empty string
    /// for missing keys. Non-string values are rendered through their JSON
    /// form without surrounding quotes.
    #[must_use]
    pub fn field(&self, key: &str) -> String {
        if let Some(v) = self.fields.get(key) {
            return render_value(v);
        }
        if let Some((_, v)) = self
            .fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            return render_value(v);
        }
        let capitalized = capitalize(key);
        match self.fields.get(capitalized.as_str()) {
            Some(v) => render_value(v),
            None => String::new(),
        }
    }

    /// True when the named field is present and non-empty.
    #[must_use]
    pub fn has_field(&self, key: &str) -> bool {
        !self.field(key).is_empty()
    }

    /// Move any reserved keys out of `fields` into the top-level attributes.
    ///
    /// Existing top-level attributes are never overwritten by field values;
    /// the reserved keys are simply dropped from the map in that case.
    /// Idempotent.
    pub fn normalize(&mut self) {
        if let Some(v) = self.fields.shift_remove("message") {
            if self.message.is_empty() {
                self.message = render_value(&v);
            }
        }
        if let Some(v) = self.fields.shift_remove("level") {
            if self.level.is_empty() {
                self.level = render_value(&v);
            }
        }
        if let Some(v) = self.fields.shift_remove("timestamp") {
            if self.timestamp.is_none() {
                self.timestamp = crate::timefmt::parse_value(&v);
            }
        }
    }
}

/// Render a JSON value the way a log consumer expects: strings unquoted,
/// everything else in compact JSON form.
#[must_use]
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn capitalize(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

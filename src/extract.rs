//! Field extraction for line-based log sources.
//!
//! Lines arriving from remote commands (and entries passing through the
//! aggregator) are optionally JSON-decoded or regex-matched to populate the
//! structured attributes of a [`LogEntry`]. Extraction is idempotent: an
//! entry whose message no longer carries an embedded object or matching
//! groups comes out unchanged.

use serde_json::Value;
use tracing::debug;

use crate::model::LogEntry;
use crate::search::FieldExtraction;
use crate::timefmt;

/// Apply the configured extraction to a single entry, in place.
pub fn apply(entry: &mut LogEntry, cfg: &FieldExtraction) {
    if cfg.json.to_value() == Some(true) {
        extract_json(entry, cfg);
    } else {
        extract_regex(entry, cfg);
    }
}

/// Apply the configured extraction to every entry of a batch.
pub fn apply_to_batch(entries: &mut [LogEntry], cfg: &FieldExtraction) {
    if cfg.is_empty() {
        return;
    }
    for entry in entries {
        apply(entry, cfg);
    }
}

/// Parse the substring starting at the last `{` of the message as a JSON
/// object and migrate its keys into the entry.
fn extract_json(entry: &mut LogEntry, cfg: &FieldExtraction) {
    let Some(start) = entry.message.rfind('{') else {
        return;
    };
    let candidate = &entry.message[start..];
    let parsed: Value = match serde_json::from_str(candidate) {
        Ok(value) => value,
        Err(err) => {
            debug!(error = %err, "line is not trailing JSON, leaving as message");
            return;
        }
    };
    let Value::Object(object) = parsed else {
        return;
    };

    let message_key = cfg.json_message_key.as_deref().unwrap_or("message");
    let level_key = cfg.json_level_key.as_deref().unwrap_or("level");
    let timestamp_key = cfg.json_timestamp_key.as_deref().unwrap_or("timestamp");

    let mut message = None;
    for (key, value) in object {
        if key == message_key {
            message = Some(crate::model::render_value(&value));
        } else if key == level_key {
            entry.level = crate::model::render_value(&value);
        } else if key == timestamp_key {
            if let Some(ts) = timefmt::parse_value(&value) {
                entry.timestamp = Some(ts);
            }
        } else {
            entry.fields.insert(key, value);
        }
    }

    // The decoded message replaces the raw line; without one, keep whatever
    // preceded the object.
    match message {
        Some(message) => entry.message = message,
        None => entry.message = entry.message[..start].trim().to_string(),
    }
}

/// Regex-based extraction via `group_regex`, `kv_regex` and
/// `timestamp_regex`.
fn extract_regex(entry: &mut LogEntry, cfg: &FieldExtraction) {
    if let Some(pattern) = cfg.group_regex.as_deref() {
        match regex::Regex::new(pattern) {
            Ok(re) => {
                let line = entry.message.clone();
                if let Some(caps) = re.captures(&line) {
                    for name in re.capture_names().flatten() {
                        let Some(m) = caps.name(name) else { continue };
                        let value = m.as_str().to_string();
                        match name {
                            "message" => entry.message = value,
                            "level" => entry.level = value,
                            "timestamp" => {
                                if let Some(ts) = timefmt::parse_strict(&value)
                                    .or_else(|| timefmt::parse_timestamp(&value))
                                {
                                    entry.timestamp = Some(ts);
                                }
                            }
                            _ => {
                                entry.fields.insert(name.to_string(), Value::String(value));
                            }
                        }
                    }
                }
            }
            Err(err) => debug!(error = %err, "invalid group_regex, skipping extraction"),
        }
    }

    if let Some(pattern) = cfg.kv_regex.as_deref() {
        match regex::Regex::new(pattern) {
            Ok(re) => {
                let line = entry.message.clone();
                for caps in re.captures_iter(&line) {
                    let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
                        continue;
                    };
                    entry.fields.insert(
                        key.as_str().to_string(),
                        Value::String(value.as_str().to_string()),
                    );
                }
            }
            Err(err) => debug!(error = %err, "invalid kv_regex, skipping extraction"),
        }
    }

    if let Some(pattern) = cfg.timestamp_regex.as_deref() {
        match regex::Regex::new(pattern) {
            Ok(re) => {
                if let Some(caps) = re.captures(&entry.message) {
                    if let Some(m) = caps.get(1).or_else(|| caps.get(0)) {
                        if let Some(ts) = timefmt::parse_strict(m.as_str())
                            .or_else(|| timefmt::parse_timestamp(m.as_str()))
                        {
                            entry.timestamp = Some(ts);
                        }
                    }
                }
            }
            Err(err) => debug!(error = %err, "invalid timestamp_regex, skipping extraction"),
        }
    }
}

//! Timestamp and duration parsing for search time windows.
//!
//! Accepted inputs, tried in order: RFC3339 (with or without fractional
//! seconds), `"2006-01-02 15:04:05"` and `"2006-01-02T15:04:05"` (local time
//! when the zone is missing), bare `"HH:MM:SS"` / `"HH:MM"` clock times
//! (today's date, local time), and signed Go-style durations (`1h`, `30m`,
//! `1h30m`, `-15m`) taken relative to now. [`normalize`] converts any
//! accepted input to RFC3339.

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde_json::Value;

/// Datetime layouts accepted without an explicit zone, interpreted as local.
const NAIVE_LAYOUTS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
];

/// Clock-only layouts, applied to today's date in local time.
const CLOCK_LAYOUTS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

/// Parse an accepted timestamp or duration input into a UTC instant.
///
/// Durations are resolved against `now`; `"-30m"` and `"30m"` both mean
/// thirty minutes ago (a bare duration names a point in the past).
#[must_use]
pub fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Some(ts.with_timezone(&Utc));
    }

    for layout in NAIVE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, layout) {
            return local_to_utc(naive);
        }
    }

    for layout in CLOCK_LAYOUTS {
        if let Ok(clock) = NaiveTime::parse_from_str(input, layout) {
            let today = Local::now().date_naive();
            return local_to_utc(today.and_time(clock));
        }
    }

    parse_go_duration(input).map(|d| Utc::now() - d.abs())
}

/// Normalize any accepted input to an RFC3339 string.
#[must_use]
pub fn normalize(input: &str) -> Option<String> {
    parse_timestamp(input).map(|ts| ts.to_rfc3339())
}

/// Parse a signed Go-style duration (`1h`, `30m`, `1h30m`, `-15m`).
#[must_use]
pub fn parse_go_duration(input: &str) -> Option<Duration> {
    let (negative, body) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input),
    };
    let std = humantime::parse_duration(body).ok()?;
    let duration = Duration::from_std(std).ok()?;
    Some(if negative { -duration } else { duration })
}

/// Parse a timestamp out of an arbitrary JSON value.
///
/// Strings go through the layout cascade; numbers are epoch seconds, with
/// 13-digit-or-wider integers read as epoch milliseconds.
#[must_use]
pub fn parse_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_strict(s).or_else(|| parse_timestamp(s)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return parse_epoch(i);
            }
            let secs = n.as_f64()?;
            let millis = (secs * 1000.0) as i64;
            Utc.timestamp_millis_opt(millis).single()
        }
        _ => None,
    }
}

/// Parse epoch seconds, or epoch milliseconds for 13+ digit magnitudes.
#[must_use]
pub fn parse_epoch(raw: i64) -> Option<DateTime<Utc>> {
    if raw.abs() >= 1_000_000_000_000 {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}

/// Strict datetime parse (no clock-only or duration fallbacks), for values
/// arriving inside log records rather than search specs.
#[must_use]
pub fn parse_strict(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Some(ts.with_timezone(&Utc));
    }
    for layout in NAIVE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, layout) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    // 13+ digit epoch milliseconds arriving as text.
    if input.len() >= 13 {
        if let Ok(millis) = input.parse::<i64>() {
            return Utc.timestamp_millis_opt(millis).single();
        }
    }
    None
}

/// Format an instant with an override layout, defaulting to RFC3339.
///
/// `layout` is a chrono strftime string, typically from the search's
/// `timestampFormat` option.
#[must_use]
pub fn format_with(ts: DateTime<Utc>, layout: Option<&str>) -> String {
    match layout {
        Some(layout) => ts.format(layout).to_string(),
        None => ts.to_rfc3339(),
    }
}

/// Parse with an override layout, falling back to the standard cascade.
#[must_use]
pub fn parse_with(input: &str, layout: Option<&str>) -> Option<DateTime<Utc>> {
    if let Some(layout) = layout {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, layout) {
            return Some(Utc.from_utc_datetime(&naive));
        }
        if let Ok(ts) = DateTime::parse_from_str(input, layout) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    parse_timestamp(input)
}

fn local_to_utc(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(&naive)
        .single()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Today's date in local time. Exposed for tests that pin clock-only inputs.
#[must_use]
pub fn today_local() -> NaiveDate {
    Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parses_rfc3339_variants() {
        let plain = parse_timestamp("2024-05-01T10:00:00Z").unwrap();
        let nano = parse_timestamp("2024-05-01T10:00:00.123456789Z").unwrap();
        assert_eq!(plain.timestamp(), nano.timestamp());
        assert_eq!(nano.timestamp_subsec_nanos(), 123_456_789);
    }

    #[test]
    fn parses_naive_layouts() {
        assert!(parse_timestamp("2024-05-01 10:00:00").is_some());
        assert!(parse_timestamp("2024-05-01T10:00:00").is_some());
    }

    #[test]
    fn parses_clock_only_as_today() {
        let ts = parse_timestamp("10:30").unwrap();
        let local = ts.with_timezone(&Local);
        assert_eq!(local.date_naive(), today_local());
    }

    #[test]
    fn parses_durations_as_past_instants() {
        let now = Utc::now();
        let back = parse_timestamp("30m").unwrap();
        let also_back = parse_timestamp("-30m").unwrap();
        assert!(back < now);
        assert!((back - also_back).num_seconds().abs() <= 1);

        let compound = parse_go_duration("1h30m").unwrap();
        assert_eq!(compound.num_minutes(), 90);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp("not a time").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn normalize_round_trips_every_accepted_format() {
        for input in [
            "2024-05-01T10:00:00Z",
            "2024-05-01T10:00:00.5Z",
            "2024-05-01 10:00:00",
            "2024-05-01T10:00:00",
            "10:30:00",
            "10:30",
            "1h",
            "-45m",
        ] {
            let normalized = normalize(input).unwrap_or_else(|| panic!("normalize({input})"));
            let reparsed = DateTime::parse_from_rfc3339(&normalized);
            assert!(reparsed.is_ok(), "{input} -> {normalized}");
        }
    }

    #[test]
    fn parse_value_handles_numbers() {
        let from_secs = parse_value(&json!(1714557600)).unwrap();
        let from_millis = parse_value(&json!(1714557600123_i64)).unwrap();
        assert_eq!(from_secs.timestamp(), from_millis.timestamp());

        let from_float = parse_value(&json!(1714557600.5)).unwrap();
        assert_eq!(from_float.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn format_with_honors_override() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(
            format_with(ts, Some("%Y-%m-%d %H:%M:%S")),
            "2024-05-01 10:00:00"
        );
        let back = parse_with("2024-05-01 10:00:00", Some("%Y-%m-%d %H:%M:%S")).unwrap();
        assert_eq!(back, ts);
    }
}

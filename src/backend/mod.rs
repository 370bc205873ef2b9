//! The contract every log backend implements.
//!
//! A [`Backend`] dispatches a [`LogSearch`] and returns a [`SearchResult`]:
//! a bounded initial batch, an optional channel of follow-mode update
//! batches, an optional channel of asynchronous errors, and pagination where
//! the backend supports it. Closing a channel is the end-of-stream signal;
//! consumers either drain or cancel.

pub mod adapter;
pub mod aggregator;
pub mod cloudwatch;
pub mod follower;
pub mod lines;
pub mod opensearch;
pub mod splunk;

use std::collections::BTreeSet;
use std::future::Future;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{FuseError, Result};
use crate::model::LogEntry;
use crate::opt::Opt;
use crate::search::LogSearch;

/// A batch of entries delivered on an update channel.
pub type EntryBatch = Vec<LogEntry>;

/// Distinct values per field name.
pub type FieldValues = IndexMap<String, BTreeSet<String>>;

/// Capacity of entry-batch and error channels.
pub const CHANNEL_CAPACITY: usize = 16;

/// Offset-based pagination state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    /// More entries are available.
    pub has_more: bool,
    /// Opaque token to resume from; pass back only to the backend that
    /// issued it.
    pub next_page_token: String,
}

/// The result of a dispatched search.
///
/// `entries`, `fields` and `errors` hand over channels on first call; a
/// second call returns whatever initial data is cached but no channel.
#[async_trait]
pub trait SearchResult: Send + std::fmt::Debug {
    /// The exact search that produced this result, including the synthesized
    /// `__context_id__` option.
    fn search(&self) -> &LogSearch;

    /// The bounded initial batch, plus an update channel when the search is
    /// in follow mode.
    async fn entries(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<(EntryBatch, Option<mpsc::Receiver<EntryBatch>>)>;

    /// Distinct field values seen in the initial batch, plus an update
    /// channel when the backend streams them.
    async fn fields(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<(FieldValues, Option<mpsc::Receiver<FieldValues>>)>;

    /// Pagination state; `None` when not applicable.
    fn pagination(&self) -> Option<Pagination>;

    /// Asynchronous errors produced by follow loops. `None` when the result
    /// has no background work, or once the channel was already taken.
    fn errors(&mut self) -> Option<mpsc::Receiver<FuseError>>;
}

/// A log store adapter.
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Short backend name for logs and errors.
    fn name(&self) -> &'static str;

    /// Dispatch the search; may block for the initial batch.
    async fn query(
        &self,
        cancel: CancellationToken,
        search: LogSearch,
    ) -> Result<Box<dyn SearchResult>>;

    /// Distinct-values discovery for the named fields.
    ///
    /// The default implementation emulates it by running the query and
    /// scanning the initial entries; backends with native aggregations
    /// override it.
    async fn field_values(
        &self,
        cancel: CancellationToken,
        search: LogSearch,
        fields: &[String],
    ) -> Result<IndexMap<String, Vec<String>>> {
        let mut result = self.query(cancel.clone(), search).await?;
        let (initial, _updates) = result.entries(cancel).await?;
        Ok(scan_field_values(&initial, fields))
    }
}

/// Race a future against cancellation.
pub async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>> + Send,
) -> Result<T> {
    tokio::select! {
        () = cancel.cancelled() => Err(FuseError::Cancelled),
        res = fut => res,
    }
}

/// Cancellable sleep; returns false when cancelled.
pub async fn sleep_or_cancel(cancel: &CancellationToken, duration: std::time::Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

/// Parse an offset page token; unset tokens mean offset zero.
pub fn parse_offset_token(token: &Opt<String>) -> Result<usize> {
    match token.as_deref() {
        None | Some("") => Ok(0),
        Some(raw) => raw.parse::<usize>().map_err(|_| FuseError::InvalidPageToken {
            token: raw.to_string(),
            reason: "expected a non-negative integer offset".to_string(),
        }),
    }
}

/// Offset pagination: a full page means more may follow, a short page is the
/// last one.
#[must_use]
pub fn offset_pagination(offset: usize, returned: usize, size: usize) -> Option<Pagination> {
    if size > 0 && returned >= size {
        Some(Pagination {
            has_more: true,
            next_page_token: (offset + returned).to_string(),
        })
    } else {
        None
    }
}

/// Collect distinct values for every field present in the entries.
#[must_use]
pub fn collect_fields(entries: &[LogEntry]) -> FieldValues {
    let mut values = FieldValues::new();
    for entry in entries {
        for (key, value) in &entry.fields {
            values
                .entry(key.clone())
                .or_default()
                .insert(crate::model::render_value(value));
        }
        if !entry.level.is_empty() {
            values
                .entry("level".to_string())
                .or_default()
                .insert(entry.level.clone());
        }
    }
    values
}

/// Scan entries for distinct values of the named fields.
#[must_use]
pub fn scan_field_values(
    entries: &[LogEntry],
    fields: &[String],
) -> IndexMap<String, Vec<String>> {
    let mut result = IndexMap::new();
    for field in fields {
        let mut seen = BTreeSet::new();
        for entry in entries {
            let value = entry.field(field);
            if !value.is_empty() {
                seen.insert(value);
            }
        }
        result.insert(field.clone(), seen.into_iter().collect());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn offset_token_parsing() {
        assert_eq!(parse_offset_token(&Opt::Unset).unwrap(), 0);
        assert_eq!(parse_offset_token(&Opt::from("25")).unwrap(), 25);
        assert!(parse_offset_token(&Opt::from("ten")).is_err());
        assert!(parse_offset_token(&Opt::from("-1")).is_err());
    }

    #[test]
    fn offset_pagination_rules() {
        let page = offset_pagination(10, 50, 50).unwrap();
        assert!(page.has_more);
        assert_eq!(page.next_page_token, "60");

        assert_eq!(offset_pagination(10, 20, 50), None);
        assert_eq!(offset_pagination(0, 0, 0), None);
    }

    #[test]
    fn scan_collects_distinct_values() {
        let entries = vec![
            LogEntry {
                fields: [("host".to_string(), json!("a"))].into_iter().collect(),
                ..LogEntry::default()
            },
            LogEntry {
                fields: [("host".to_string(), json!("b"))].into_iter().collect(),
                ..LogEntry::default()
            },
            LogEntry {
                fields: [("host".to_string(), json!("a"))].into_iter().collect(),
                ..LogEntry::default()
            },
        ];
        let values = scan_field_values(&entries, &["host".to_string()]);
        assert_eq!(values["host"], vec!["a", "b"]);
    }
}

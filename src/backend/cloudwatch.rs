//! CloudWatch Logs Insights backend.
//!
//! The AWS SDK stays outside the core: the backend is written against the
//! small [`InsightsApi`] trait carrying only the request/response shapes it
//! needs. Query construction, the exponential-backoff result poll, and row
//! parsing live here; a real SDK client (or a test double) plugs in from
//! outside.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{FuseError, Result};
use crate::model::LogEntry;
use crate::search::LogSearch;
use crate::timefmt;

use super::follower::{self, Backoff};
use super::{
    collect_fields, sleep_or_cancel, Backend, EntryBatch, FieldValues, Pagination, SearchResult,
    CHANNEL_CAPACITY,
};

/// Safe Insights field names; anything else is skipped to prevent query
/// injection through `legacy_fields`.
static SAFE_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_@.]+$").expect("safe-field pattern is valid"));

/// `StartQuery` request shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartQueryRequest {
    /// Log group to query.
    pub log_group_name: String,
    /// The Insights query string.
    pub query_string: String,
    /// Window start, epoch milliseconds.
    pub start_time_millis: i64,
    /// Window end, epoch milliseconds.
    pub end_time_millis: i64,
}

/// One field of a result row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultField {
    /// Field name (`@timestamp`, `@message`, extracted fields).
    pub field: String,
    /// Field value, always textual in Insights results.
    pub value: String,
}

/// Poll status of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Not started yet.
    Scheduled,
    /// Still producing results.
    Running,
    /// Finished; rows are final.
    Complete,
    /// Terminal failure states.
    Failed,
    /// Cancelled upstream.
    Cancelled,
    /// Timed out upstream.
    Timeout,
}

/// `GetQueryResults` response shape.
#[derive(Debug, Clone)]
pub struct QueryResults {
    /// Current status.
    pub status: QueryStatus,
    /// Result rows; each row is a list of field/value pairs.
    pub rows: Vec<Vec<ResultField>>,
}

/// The slice of the CloudWatch Logs API this backend consumes.
#[async_trait]
pub trait InsightsApi: Send + Sync + std::fmt::Debug {
    /// Start an Insights query, returning its id.
    async fn start_query(&self, request: StartQueryRequest) -> Result<String>;

    /// Fetch current results for a query.
    async fn get_query_results(&self, query_id: &str) -> Result<QueryResults>;

    /// Stop a running query.
    async fn stop_query(&self, query_id: &str) -> Result<()>;
}

/// Build the Insights query string as pipe segments.
///
/// Legacy fields with unsafe names are skipped (logged, not fatal) so a
/// hostile field name can never reach the query language.
#[must_use]
pub fn build_query_string(search: &LogSearch) -> String {
    let mut segments = vec!["fields @timestamp, @message".to_string()];

    for (field, value) in &search.legacy_fields {
        if !SAFE_FIELD.is_match(field) {
            warn!(field = field.as_str(), "skipping unsafe field name in query construction");
            continue;
        }
        segments.push(format!("filter {field} = '{}'", escape_value(value)));
    }

    segments.push("sort @timestamp desc".to_string());
    if let Some(&size) = search.size.as_value() {
        if size > 0 {
            segments.push(format!("limit {size}"));
        }
    }

    segments.join(" | ")
}

fn escape_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Resolve the query window to epoch-millisecond bounds.
///
/// `range.last` establishes the window; parseable `gte`/`lte` override its
/// edges. A window whose start passed its end falls back to the trailing
/// hour.
#[must_use]
pub fn resolve_window(search: &LogSearch, now: DateTime<Utc>) -> (i64, i64) {
    let mut end = now;
    let mut start = search
        .range
        .last
        .as_deref()
        .and_then(timefmt::parse_go_duration)
        .map(|d| now - d.abs())
        .unwrap_or_else(|| now - ChronoDuration::hours(1));

    if let Some(gte) = search.range.gte.as_deref().and_then(parse_bound) {
        start = gte;
    }
    if let Some(lte) = search.range.lte.as_deref().and_then(parse_bound) {
        end = lte;
    }

    if start > end {
        start = end - ChronoDuration::hours(1);
    }
    (start.timestamp_millis(), end.timestamp_millis())
}

fn parse_bound(input: &str) -> Option<DateTime<Utc>> {
    timefmt::parse_strict(input)
}

/// Parse result rows into entries, oldest-first.
#[must_use]
pub fn parse_result_rows(rows: &[Vec<ResultField>]) -> EntryBatch {
    let mut entries: EntryBatch = rows
        .iter()
        .map(|row| {
            let mut entry = LogEntry::default();
            for field in row {
                match field.field.as_str() {
                    "@timestamp" => {
                        entry.timestamp = timefmt::parse_strict(&field.value);
                    }
                    "@message" => entry.message = field.value.clone(),
                    "@ptr" => {}
                    name => {
                        entry
                            .fields
                            .insert(name.to_string(), field.value.clone().into());
                    }
                }
            }
            entry
        })
        .collect();
    // The query sorts newest-first; consumers read oldest-first.
    entries.reverse();
    entries
}

/// The CloudWatch Insights backend.
#[derive(Debug)]
pub struct CloudWatchBackend {
    api: Arc<dyn InsightsApi>,
}

impl CloudWatchBackend {
    /// Option naming the log group; required.
    pub const LOG_GROUP_OPTION: &'static str = "logGroupName";
    /// Option overriding the backoff base interval.
    pub const POLL_INTERVAL_OPTION: &'static str = "cloudwatchPollInterval";
    /// Option overriding the backoff cap.
    pub const MAX_POLL_INTERVAL_OPTION: &'static str = "cloudwatchMaxPollInterval";
    /// Option overriding the backoff factor.
    pub const BACKOFF_FACTOR_OPTION: &'static str = "cloudwatchBackoffFactor";

    /// Create the backend over an API implementation.
    #[must_use]
    pub fn new(api: Arc<dyn InsightsApi>) -> Self {
        Self { api }
    }

    fn backoff_for(search: &LogSearch) -> Backoff {
        let base = search
            .option_duration(Self::POLL_INTERVAL_OPTION)
            .unwrap_or(Backoff::DEFAULT_BASE);
        let cap = search
            .option_duration(Self::MAX_POLL_INTERVAL_OPTION)
            .unwrap_or(Backoff::DEFAULT_CAP);
        let factor = search
            .option_f64(Self::BACKOFF_FACTOR_OPTION)
            .unwrap_or(Backoff::DEFAULT_FACTOR);
        Backoff::new(base, cap, factor)
    }

    /// Run one query: start, poll with backoff until complete, parse.
    async fn run_once(&self, cancel: &CancellationToken, search: &LogSearch) -> Result<EntryBatch> {
        let log_group = search
            .option_str(Self::LOG_GROUP_OPTION)
            .ok_or_else(|| FuseError::missing_option(Self::LOG_GROUP_OPTION, "cloudwatch"))?;

        let query_string = build_query_string(search);
        let (start_millis, end_millis) = resolve_window(search, Utc::now());
        debug!(
            log_group = log_group.as_str(),
            query = query_string.as_str(),
            "starting insights query"
        );

        let query_id = self
            .api
            .start_query(StartQueryRequest {
                log_group_name: log_group,
                query_string,
                start_time_millis: start_millis,
                end_time_millis: end_millis,
            })
            .await?;

        let mut backoff = Self::backoff_for(search);
        loop {
            let results = match self.api.get_query_results(&query_id).await {
                Ok(results) => results,
                Err(err) => {
                    let _ = self.api.stop_query(&query_id).await;
                    return Err(err);
                }
            };
            match results.status {
                QueryStatus::Complete => {
                    backoff.reset();
                    return Ok(parse_result_rows(&results.rows));
                }
                QueryStatus::Scheduled | QueryStatus::Running => {
                    if !sleep_or_cancel(cancel, backoff.next_interval()).await {
                        let _ = self.api.stop_query(&query_id).await;
                        return Err(FuseError::Cancelled);
                    }
                }
                status => {
                    return Err(FuseError::translation(format!(
                        "insights query {query_id} ended in state {status:?}"
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl Backend for CloudWatchBackend {
    fn name(&self) -> &'static str {
        "cloudwatch"
    }

    async fn query(
        &self,
        cancel: CancellationToken,
        search: LogSearch,
    ) -> Result<Box<dyn SearchResult>> {
        let initial = self.run_once(&cancel, &search).await?;

        let (updates, errors) = if search.follow {
            let (err_tx, err_rx) = mpsc::channel(CHANNEL_CAPACITY);
            let api = self.api.clone();
            let poll_cancel = cancel.clone();
            let rx = follower::spawn(search.clone(), cancel, err_tx, move |window| {
                let backend = CloudWatchBackend::new(api.clone());
                let cancel = poll_cancel.clone();
                async move { backend.run_once(&cancel, &window).await }
            });
            (Some(rx), Some(err_rx))
        } else {
            (None, None)
        };

        Ok(Box::new(CloudWatchResult {
            search,
            initial,
            updates,
            errors,
        }))
    }

    async fn field_values(
        &self,
        cancel: CancellationToken,
        search: LogSearch,
        fields: &[String],
    ) -> Result<IndexMap<String, Vec<String>>> {
        let entries = self.run_once(&cancel, &search).await?;
        if !fields.is_empty() {
            return Ok(super::scan_field_values(&entries, fields));
        }

        // Discovery mode: every extracted field, minus the @-internal ones.
        let mut discovered: Vec<String> = Vec::new();
        for entry in &entries {
            for key in entry.fields.keys() {
                if !key.starts_with('@') && !discovered.iter().any(|k| k == key) {
                    discovered.push(key.clone());
                }
            }
        }
        Ok(super::scan_field_values(&entries, &discovered))
    }
}

/// Result of one Insights query.
#[derive(Debug)]
struct CloudWatchResult {
    search: LogSearch,
    initial: EntryBatch,
    updates: Option<mpsc::Receiver<EntryBatch>>,
    errors: Option<mpsc::Receiver<FuseError>>,
}

#[async_trait]
impl SearchResult for CloudWatchResult {
    fn search(&self) -> &LogSearch {
        &self.search
    }

    async fn entries(
        &mut self,
        _cancel: CancellationToken,
    ) -> Result<(EntryBatch, Option<mpsc::Receiver<EntryBatch>>)> {
        Ok((self.initial.clone(), self.updates.take()))
    }

    async fn fields(
        &mut self,
        _cancel: CancellationToken,
    ) -> Result<(FieldValues, Option<mpsc::Receiver<FieldValues>>)> {
        Ok((collect_fields(&self.initial), None))
    }

    fn pagination(&self) -> Option<Pagination> {
        None
    }

    fn errors(&mut self) -> Option<mpsc::Receiver<FuseError>> {
        self.errors.take()
    }
}

//! Splunk backend: SPL translation, search-job lifecycle, result parsing,
//! and both follow strategies (real-time jobs and sliding-window polling).

pub mod spl;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{FuseError, Result};
use crate::model::LogEntry;
use crate::search::LogSearch;
use crate::timefmt;

use self::spl::SearchRequest;

use super::{
    collect_fields, follower, offset_pagination, parse_offset_token, sleep_or_cancel, with_cancel,
    Backend, EntryBatch, FieldValues, Pagination, SearchResult, CHANNEL_CAPACITY,
};

/// Default status-poll interval.
const DEFAULT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

/// Default status-poll retry budget.
const DEFAULT_MAX_RETRIES: u32 = 30;

/// Rows fetched per real-time poll cycle.
const RT_FETCH_COUNT: usize = 500;

#[derive(Debug, Deserialize)]
struct CreateJobResponse {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    #[serde(default)]
    entry: Vec<JobStatusEntry>,
}

#[derive(Debug, Deserialize)]
struct JobStatusEntry {
    content: JobContent,
}

#[derive(Debug, Default, Deserialize)]
struct JobContent {
    #[serde(rename = "isDone", default)]
    is_done: bool,
    #[serde(rename = "dispatchState", default)]
    dispatch_state: String,
}

#[derive(Debug, Deserialize)]
struct ResultsResponse {
    #[serde(default)]
    results: Vec<Map<String, Value>>,
}

/// Thin HTTP client for the Splunk search REST API.
#[derive(Debug, Clone)]
pub struct SplunkClient {
    http: reqwest::Client,
    base_url: String,
    auth: Option<(String, String)>,
}

impl SplunkClient {
    /// Create a client against `base_url` (e.g. `https://splunk:8089`).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth: None,
        }
    }

    /// Attach basic-auth credentials to every request.
    #[must_use]
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some((username.into(), password.into()));
        self
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        }
    }

    /// POST `/services/search/jobs`, returning the search id.
    pub async fn create_job(
        &self,
        cancel: &CancellationToken,
        request: &SearchRequest,
    ) -> Result<String> {
        let url = format!("{}/services/search/jobs", self.base_url);
        let mut form: Vec<(&str, String)> = vec![
            ("search", format!("search {}", request.query)),
            ("output_mode", "json".to_string()),
        ];
        if let Some(earliest) = &request.earliest_time {
            form.push(("earliest_time", earliest.clone()));
        }
        if let Some(latest) = &request.latest_time {
            form.push(("latest_time", latest.clone()));
        }
        if request.realtime {
            form.push(("search_mode", "realtime".to_string()));
        }
        debug!(
            url = url.as_str(),
            query = request.query.as_str(),
            realtime = request.realtime,
            "dispatching search job"
        );

        let response: CreateJobResponse = self
            .send_json(cancel, self.authorized(self.http.post(&url)).form(&form), &url)
            .await?;
        Ok(response.sid)
    }

    /// GET `/services/search/jobs/{sid}` status content.
    async fn job_status(&self, cancel: &CancellationToken, sid: &str) -> Result<JobContent> {
        let url = format!("{}/services/search/jobs/{sid}", self.base_url);
        let response: JobStatusResponse = self
            .send_json(
                cancel,
                self.authorized(self.http.get(&url)).query(&[("output_mode", "json")]),
                &url,
            )
            .await?;
        Ok(response
            .entry
            .into_iter()
            .next()
            .map(|entry| entry.content)
            .unwrap_or_default())
    }

    /// GET `/services/search/jobs/{sid}/{events|results}` rows.
    pub async fn fetch_rows(
        &self,
        cancel: &CancellationToken,
        sid: &str,
        endpoint: &str,
        offset: usize,
        count: usize,
    ) -> Result<Vec<Map<String, Value>>> {
        let url = format!("{}/services/search/jobs/{sid}/{endpoint}", self.base_url);
        let response: ResultsResponse = self
            .send_json(
                cancel,
                self.authorized(self.http.get(&url)).query(&[
                    ("output_mode", "json".to_string()),
                    ("offset", offset.to_string()),
                    ("count", count.to_string()),
                ]),
                &url,
            )
            .await?;
        Ok(response.results)
    }

    /// DELETE `/services/search/jobs/{sid}`; used to tear down real-time
    /// jobs on cancellation.
    pub async fn delete_job(&self, cancel: &CancellationToken, sid: &str) -> Result<()> {
        let url = format!("{}/services/search/jobs/{sid}", self.base_url);
        with_cancel(cancel, async {
            let response = self
                .authorized(self.http.delete(&url))
                .send()
                .await
                .map_err(|e| FuseError::http(format!("DELETE {url}"), e))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(FuseError::UpstreamStatus {
                    status: status.as_u16(),
                    body,
                });
            }
            Ok(())
        })
        .await
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        builder: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<T> {
        with_cancel(cancel, async {
            let response = builder
                .send()
                .await
                .map_err(|e| FuseError::http(url.to_string(), e))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(FuseError::UpstreamStatus {
                    status: status.as_u16(),
                    body,
                });
            }
            response
                .json::<T>()
                .await
                .map_err(|e| FuseError::http(format!("decode response from {url}"), e))
        })
        .await
    }
}

/// Parse result rows in arrival order.
///
/// `_raw` becomes the message, `_time` the timestamp; remaining
/// non-underscore keys are copied to fields.
#[must_use]
pub fn parse_rows(rows: &[Map<String, Value>]) -> EntryBatch {
    rows.iter()
        .map(|row| {
            let mut entry = LogEntry::default();
            for (key, value) in row {
                match key.as_str() {
                    "_raw" => entry.message = crate::model::render_value(value),
                    "_time" => entry.timestamp = timefmt::parse_value(value),
                    _ if key.starts_with('_') => {}
                    _ => {
                        entry.fields.insert(key.clone(), value.clone());
                    }
                }
            }
            entry
        })
        .collect()
}

/// The Splunk backend.
#[derive(Debug)]
pub struct SplunkBackend {
    client: SplunkClient,
}

impl SplunkBackend {
    /// Option disabling real-time follow in favor of sliding-window polling.
    pub const REALTIME_OPTION: &'static str = "realtime";
    /// Option overriding the status-poll interval.
    pub const POLL_INTERVAL_OPTION: &'static str = "pollInterval";
    /// Option overriding the status-poll retry budget.
    pub const MAX_RETRIES_OPTION: &'static str = "maxRetries";

    /// Create the backend from a client.
    #[must_use]
    pub fn new(client: SplunkClient) -> Self {
        Self { client }
    }

    /// Dispatch a non-realtime job, wait for completion, and fetch one page.
    async fn run_once(
        &self,
        cancel: &CancellationToken,
        search: &LogSearch,
        offset: usize,
        count: usize,
    ) -> Result<EntryBatch> {
        let request = spl::build_search_request(search)?;
        let sid = self.client.create_job(cancel, &request).await?;
        self.wait_for_completion(cancel, search, &sid).await?;

        let endpoint = results_endpoint(&request.query);
        let rows = self
            .client
            .fetch_rows(cancel, &sid, endpoint, offset, count)
            .await?;
        let mut entries = parse_rows(&rows);
        // Results come newest-first; consumers read oldest-first.
        entries.reverse();
        Ok(entries)
    }

    async fn wait_for_completion(
        &self,
        cancel: &CancellationToken,
        search: &LogSearch,
        sid: &str,
    ) -> Result<()> {
        let interval = search
            .option_duration(Self::POLL_INTERVAL_OPTION)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let max_retries = search
            .option_f64(Self::MAX_RETRIES_OPTION)
            .map(|n| n as u32)
            .unwrap_or(DEFAULT_MAX_RETRIES);

        for _ in 0..max_retries {
            let status = self.client.job_status(cancel, sid).await?;
            if status.is_done {
                return Ok(());
            }
            if status.dispatch_state.eq_ignore_ascii_case("failed") {
                return Err(FuseError::JobFailed {
                    sid: sid.to_string(),
                    state: status.dispatch_state,
                });
            }
            if !sleep_or_cancel(cancel, interval).await {
                return Err(FuseError::Cancelled);
            }
        }
        Err(FuseError::JobTimeout {
            sid: sid.to_string(),
            retries: max_retries,
        })
    }

    /// Real-time follow: poll the running job's results from an advancing
    /// offset; delete the job once cancelled.
    fn spawn_realtime(
        &self,
        cancel: CancellationToken,
        search: &LogSearch,
        sid: String,
        endpoint: &'static str,
    ) -> (mpsc::Receiver<EntryBatch>, mpsc::Receiver<FuseError>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let client = self.client.clone();
        let interval = search.refresh_interval();

        tokio::spawn(async move {
            let mut offset = 0usize;
            loop {
                if !sleep_or_cancel(&cancel, interval).await {
                    break;
                }
                match client
                    .fetch_rows(&cancel, &sid, endpoint, offset, RT_FETCH_COUNT)
                    .await
                {
                    Ok(rows) => {
                        if rows.is_empty() {
                            continue;
                        }
                        offset += rows.len();
                        let batch = parse_rows(&rows);
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            sent = tx.send(batch) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Err(FuseError::Cancelled) => break,
                    Err(err) => {
                        warn!("real-time poll of job {sid} failed, continuing: {err}");
                        if err_tx.send(err).await.is_err() {
                            break;
                        }
                    }
                }
            }

            // Tear the real-time job down; it would otherwise run forever.
            let teardown = CancellationToken::new();
            if let Err(err) = client.delete_job(&teardown, &sid).await {
                warn!("failed to delete real-time job {sid}: {err}");
            }
        });

        (rx, err_rx)
    }
}

/// Pick the fetch endpoint for a query.
fn results_endpoint(query: &str) -> &'static str {
    if spl::is_transforming(query) {
        "results"
    } else {
        "events"
    }
}

#[async_trait]
impl Backend for SplunkBackend {
    fn name(&self) -> &'static str {
        "splunk"
    }

    async fn query(
        &self,
        cancel: CancellationToken,
        search: LogSearch,
    ) -> Result<Box<dyn SearchResult>> {
        let offset = parse_offset_token(&search.page_token)?;
        let size = search.size_or_default();

        if search.follow && search.option_bool(Self::REALTIME_OPTION).unwrap_or(true) {
            let request = spl::build_search_request(&search)?;
            let sid = self.client.create_job(&cancel, &request).await?;
            let endpoint = results_endpoint(&request.query);
            let (updates, errors) = self.spawn_realtime(cancel, &search, sid, endpoint);
            return Ok(Box::new(SplunkResult {
                search,
                initial: Vec::new(),
                updates: Some(updates),
                errors: Some(errors),
                pagination: None,
            }));
        }

        // Polling follow reissues plain jobs over a sliding window; the
        // initial batch comes from a non-realtime query either way.
        let mut initial_search = search.clone();
        initial_search.follow = false;
        let initial = self
            .run_once(&cancel, &initial_search, offset, size)
            .await?;
        let pagination = offset_pagination(offset, initial.len(), size);

        let (updates, errors) = if search.follow {
            let (err_tx, err_rx) = mpsc::channel(CHANNEL_CAPACITY);
            let backend = Self::new(self.client.clone());
            let poll_cancel = cancel.clone();
            let rx = follower::spawn(search.clone(), cancel, err_tx, move |window| {
                let backend = Self::new(backend.client.clone());
                let cancel = poll_cancel.clone();
                async move {
                    let size = window.size_or_default();
                    backend.run_once(&cancel, &window, 0, size).await
                }
            });
            (Some(rx), Some(err_rx))
        } else {
            (None, None)
        };

        Ok(Box::new(SplunkResult {
            search,
            initial,
            updates,
            errors,
            pagination,
        }))
    }
}

/// Result of one Splunk query.
#[derive(Debug)]
struct SplunkResult {
    search: LogSearch,
    initial: EntryBatch,
    updates: Option<mpsc::Receiver<EntryBatch>>,
    errors: Option<mpsc::Receiver<FuseError>>,
    pagination: Option<Pagination>,
}

#[async_trait]
impl SearchResult for SplunkResult {
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
        self.pagination.clone()
    }

    fn errors(&mut self) -> Option<mpsc::Receiver<FuseError>> {
        self.errors.take()
    }
}

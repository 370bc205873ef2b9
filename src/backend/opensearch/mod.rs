//! OpenSearch/Elasticsearch backend: bool-DSL translation, hit parsing,
//! offset pagination, native `terms` aggregations for field discovery, and
//! polling-based follow mode.

pub mod translate;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{FuseError, Result};
use crate::model::LogEntry;
use crate::search::LogSearch;
use crate::timefmt;

use super::{
    collect_fields, follower, offset_pagination, parse_offset_token, with_cancel, Backend,
    EntryBatch, FieldValues, Pagination, SearchResult, CHANNEL_CAPACITY,
};

/// Search hits envelope.
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    hits: Hits,
    #[serde(default)]
    aggregations: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Hits {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source", default)]
    source: Map<String, Value>,
}

/// Thin HTTP client for the `_search` API.
#[derive(Debug, Clone)]
pub struct OpenSearchClient {
    http: reqwest::Client,
    base_url: String,
}

impl OpenSearchClient {
    /// Create a client against `base_url` (e.g. `http://localhost:9200`).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// POST a search body to `{index}/_search`.
    pub async fn search(
        &self,
        cancel: &CancellationToken,
        index: &str,
        body: &Value,
    ) -> Result<SearchResponse> {
        let url = format!("{}/{index}/_search", self.base_url);
        debug!(url = url.as_str(), body = %body, "opensearch request");

        with_cancel(cancel, async {
            let response = self
                .http
                .post(&url)
                .json(body)
                .send()
                .await
                .map_err(|e| FuseError::http(format!("POST {url}"), e))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(FuseError::UpstreamStatus {
                    status: status.as_u16(),
                    body,
                });
            }
            response
                .json::<SearchResponse>()
                .await
                .map_err(|e| FuseError::http(format!("decode response from {url}"), e))
        })
        .await
    }
}

/// Parse hits into entries, oldest-first.
///
/// The source returns newest-first (descending sort); entries are placed in
/// reverse order of hits so consumers always read oldest-first.
#[must_use]
pub fn parse_entries(response: &SearchResponse) -> EntryBatch {
    let mut entries: EntryBatch = response
        .hits
        .hits
        .iter()
        .map(|hit| parse_hit(&hit.source))
        .collect();
    entries.reverse();
    entries
}

fn parse_hit(source: &Map<String, Value>) -> LogEntry {
    let mut entry = LogEntry::default();
    for (key, value) in source {
        match key.as_str() {
            "message" => entry.message = crate::model::render_value(value),
            "@timestamp" => entry.timestamp = timefmt::parse_value(value),
            "level" => {
                if let Value::String(level) = value {
                    entry.level = level.clone();
                }
            }
            _ => {
                entry.fields.insert(key.clone(), value.clone());
            }
        }
    }
    entry
}

/// The OpenSearch backend.
#[derive(Debug)]
pub struct OpenSearchBackend {
    client: OpenSearchClient,
}

impl OpenSearchBackend {
    /// Option key naming the index to search.
    pub const INDEX_OPTION: &'static str = "index";

    /// Create the backend from a client.
    #[must_use]
    pub fn new(client: OpenSearchClient) -> Self {
        Self { client }
    }

    fn index_for(search: &LogSearch) -> Result<String> {
        search
            .option_str(Self::INDEX_OPTION)
            .ok_or_else(|| FuseError::missing_option(Self::INDEX_OPTION, "opensearch"))
    }
}

#[async_trait]
impl Backend for OpenSearchBackend {
    fn name(&self) -> &'static str {
        "opensearch"
    }

    async fn query(
        &self,
        cancel: CancellationToken,
        search: LogSearch,
    ) -> Result<Box<dyn SearchResult>> {
        let index = Self::index_for(&search)?;
        let body = translate::build_request(&search)?;
        let response = self.client.search(&cancel, &index, &body).await?;
        let initial = parse_entries(&response);

        let offset = parse_offset_token(&search.page_token)?;
        let pagination = offset_pagination(offset, initial.len(), search.size_or_default());

        let (updates, errors) = if search.follow {
            let (err_tx, err_rx) = mpsc::channel(CHANNEL_CAPACITY);
            let client = self.client.clone();
            let poll_index = index.clone();
            let poll_cancel = cancel.clone();
            let rx = follower::spawn(search.clone(), cancel, err_tx, move |window| {
                let client = client.clone();
                let index = poll_index.clone();
                let cancel = poll_cancel.clone();
                async move {
                    let body = translate::build_request(&window)?;
                    let response = client.search(&cancel, &index, &body).await?;
                    Ok(parse_entries(&response))
                }
            });
            (Some(rx), Some(err_rx))
        } else {
            (None, None)
        };

        Ok(Box::new(OpenSearchResult {
            search,
            initial,
            updates,
            errors,
            pagination,
        }))
    }

    async fn field_values(
        &self,
        cancel: CancellationToken,
        search: LogSearch,
        fields: &[String],
    ) -> Result<IndexMap<String, Vec<String>>> {
        let index = Self::index_for(&search)?;
        let limit = search
            .size
            .to_value()
            .filter(|&n| n > 0)
            .unwrap_or(100);

        let mut body = translate::build_request(&search)?;
        let mut aggs = Map::new();
        for field in fields {
            // Terms aggregations need the keyword sub-field unless the
            // caller already suffixed it.
            let agg_field = if field.ends_with(".keyword") {
                field.clone()
            } else {
                format!("{field}.keyword")
            };
            aggs.insert(
                field.clone(),
                json!({"terms": {"field": agg_field, "size": limit}}),
            );
        }
        body["aggs"] = Value::Object(aggs);
        body["size"] = json!(0);

        let response = self.client.search(&cancel, &index, &body).await?;

        let mut values = IndexMap::new();
        for field in fields {
            let buckets = response
                .aggregations
                .get(field)
                .and_then(|agg| agg.get("buckets"))
                .and_then(Value::as_array);
            let distinct = buckets
                .map(|buckets| {
                    buckets
                        .iter()
                        .filter_map(|bucket| bucket.get("key"))
                        .map(crate::model::render_value)
                        .collect()
                })
                .unwrap_or_default();
            values.insert(field.clone(), distinct);
        }
        Ok(values)
    }
}

/// Result of one OpenSearch query.
#[derive(Debug)]
struct OpenSearchResult {
    search: LogSearch,
    initial: EntryBatch,
    updates: Option<mpsc::Receiver<EntryBatch>>,
    errors: Option<mpsc::Receiver<FuseError>>,
    pagination: Option<Pagination>,
}

#[async_trait]
impl SearchResult for OpenSearchResult {
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

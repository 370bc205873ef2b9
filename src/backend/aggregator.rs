//! Multi-source aggregation: N results presented as one.
//!
//! The aggregator dispatches `entries` on every child concurrently, stamps
//! each entry with the child's context id, applies the child's JSON
//! extraction, and returns one globally time-sorted initial slice. Follow
//! updates and asynchronous errors are fanned in: the merged channel closes
//! exactly when every child channel has closed. Update batches are stamped
//! but not re-sorted across sources; live streams cannot be globally ordered
//! without unbounded buffering.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{FuseError, Result};
use crate::extract;
use crate::search::{FieldExtraction, LogSearch};

use super::{EntryBatch, FieldValues, Pagination, SearchResult, CHANNEL_CAPACITY};

/// N child results wrapped as a single [`SearchResult`].
#[derive(Debug)]
pub struct MultiSearchResult {
    search: LogSearch,
    children: Mutex<Vec<Box<dyn SearchResult>>>,
    err_tx: Option<mpsc::Sender<FuseError>>,
    err_rx: Option<mpsc::Receiver<FuseError>>,
}

impl MultiSearchResult {
    /// Create an empty aggregator for the parent search.
    ///
    /// Pagination is undefined across heterogeneous backends with
    /// independent cursors, so a search carrying a `page_token` is rejected.
    pub fn new(search: LogSearch) -> Result<Self> {
        if search.page_token.is_set() {
            return Err(FuseError::unsupported(
                "pagination across multiple sources; issue the page token to its own backend",
            ));
        }
        let (err_tx, err_rx) = mpsc::channel(CHANNEL_CAPACITY);
        Ok(Self {
            search,
            children: Mutex::new(Vec::new()),
            err_tx: Some(err_tx),
            err_rx: Some(err_rx),
        })
    }

    /// Add a child result. Appends are serialized by an internal mutex.
    pub fn add(&self, child: Box<dyn SearchResult>) {
        self.lock_children().push(child);
    }

    /// Number of child results currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_children().len()
    }

    /// True when no child has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_children().is_empty()
    }

    fn lock_children(&self) -> MutexGuard<'_, Vec<Box<dyn SearchResult>>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Stamp a batch with its source context and run the source's JSON
/// extraction. Extraction is idempotent, so entries that arrived already
/// extracted pass through unchanged.
fn adopt_batch(batch: &mut EntryBatch, context_id: &str, extraction: &FieldExtraction) {
    for entry in batch.iter_mut() {
        entry.context_id = context_id.to_string();
    }
    extract::apply_to_batch(batch, extraction);
}

#[async_trait]
impl SearchResult for MultiSearchResult {
    fn search(&self) -> &LogSearch {
        &self.search
    }

    async fn entries(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<(EntryBatch, Option<mpsc::Receiver<EntryBatch>>)> {
        let mut children = std::mem::take(&mut *self.lock_children());

        // The first child's size is the authoritative global cap.
        let cap = children
            .first()
            .and_then(|child| child.search().size.to_value())
            .filter(|&n| n > 0)
            .map(|n| n as usize);

        let outcomes = join_all(children.iter_mut().map(|child| {
            let cancel = cancel.clone();
            async move {
                let context_id = child.search().context_id();
                let extraction = child.search().field_extraction.clone();
                let outcome = child.entries(cancel).await;
                let errors = child.errors();
                (context_id, extraction, outcome, errors)
            }
        }))
        .await;

        let err_tx = self.err_tx.take();
        let mut merged: EntryBatch = Vec::new();
        let mut pumps: Vec<(String, FieldExtraction, mpsc::Receiver<EntryBatch>)> = Vec::new();
        let mut initial_errors: Vec<FuseError> = Vec::new();
        let mut error_receivers: Vec<mpsc::Receiver<FuseError>> = Vec::new();

        for (context_id, extraction, outcome, errors) in outcomes {
            if let Some(rx) = errors {
                error_receivers.push(rx);
            }
            match outcome {
                Ok((mut initial, updates)) => {
                    adopt_batch(&mut initial, &context_id, &extraction);
                    merged.extend(initial);
                    if let Some(rx) = updates {
                        pumps.push((context_id, extraction, rx));
                    }
                }
                // One failing child does not sink the federated query; the
                // error surfaces asynchronously and the rest proceed.
                Err(err) => {
                    debug!("child query for context '{context_id}' failed: {err}");
                    initial_errors.push(err);
                }
            }
        }

        merged.sort_by_key(|entry| entry.timestamp);
        if let Some(cap) = cap {
            merged.truncate(cap);
        }

        if let Some(err_tx) = err_tx {
            if !initial_errors.is_empty() {
                let tx = err_tx.clone();
                tokio::spawn(async move {
                    for err in initial_errors {
                        if tx.send(err).await.is_err() {
                            break;
                        }
                    }
                });
            }
            for mut rx in error_receivers {
                let tx = err_tx.clone();
                tokio::spawn(async move {
                    while let Some(err) = rx.recv().await {
                        if tx.send(err).await.is_err() {
                            break;
                        }
                    }
                });
            }
            // Drop the original sender: the merged error channel now closes
            // once every pump (and the initial-error task) has finished.
        }

        let updates = if pumps.is_empty() {
            None
        } else {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            for (context_id, extraction, mut child_rx) in pumps {
                let tx = tx.clone();
                tokio::spawn(async move {
                    while let Some(mut batch) = child_rx.recv().await {
                        adopt_batch(&mut batch, &context_id, &extraction);
                        if tx.send(batch).await.is_err() {
                            break;
                        }
                    }
                });
            }
            Some(rx)
        };

        *self.lock_children() = children;
        Ok((merged, updates))
    }

    async fn fields(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<(FieldValues, Option<mpsc::Receiver<FieldValues>>)> {
        let mut children = std::mem::take(&mut *self.lock_children());

        let outcomes = join_all(children.iter_mut().map(|child| {
            let cancel = cancel.clone();
            async move { child.fields(cancel).await }
        }))
        .await;

        let mut merged = FieldValues::new();
        let mut receivers = Vec::new();
        for outcome in outcomes {
            let (initial, updates) = outcome?;
            for (field, values) in initial {
                merged.entry(field).or_default().extend(values);
            }
            if let Some(rx) = updates {
                receivers.push(rx);
            }
        }

        let updates = if receivers.is_empty() {
            None
        } else {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            for mut child_rx in receivers {
                let tx = tx.clone();
                tokio::spawn(async move {
                    while let Some(values) = child_rx.recv().await {
                        if tx.send(values).await.is_err() {
                            break;
                        }
                    }
                });
            }
            Some(rx)
        };

        *self.lock_children() = children;
        Ok((merged, updates))
    }

    fn pagination(&self) -> Option<Pagination> {
        None
    }

    fn errors(&mut self) -> Option<mpsc::Receiver<FuseError>> {
        self.err_rx.take()
    }
}

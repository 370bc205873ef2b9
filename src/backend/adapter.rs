//! Synchronous façade over a streaming result.
//!
//! Simple consumers (one-shot CLI invocations, tests) want a single slice of
//! entries rather than a channel to babysit. [`collect`] drains the initial
//! batch plus any update stream until the stream closes or the caller's
//! token cancels.

use tokio_util::sync::CancellationToken;

use crate::error::Result;

use super::{EntryBatch, SearchResult};

/// Drain a result into one entry slice.
///
/// Returns once the update channel closes or `cancel` fires; for non-follow
/// searches this is just the initial batch.
pub async fn collect(
    result: &mut dyn SearchResult,
    cancel: CancellationToken,
) -> Result<EntryBatch> {
    let (mut entries, updates) = result.entries(cancel.clone()).await?;
    let Some(mut rx) = updates else {
        return Ok(entries);
    };

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            batch = rx.recv() => match batch {
                Some(batch) => entries.extend(batch),
                None => break,
            },
        }
    }
    Ok(entries)
}

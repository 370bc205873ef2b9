//! Sliding-window polling shared by pull-style backends.
//!
//! In follow mode a pull backend has no live stream to subscribe to; it
//! re-issues its query over an advancing time window instead. Each cycle
//! moves the window to `[previous upper bound + 1s, now]`, clears
//! `range.last` so the relative window cannot conflict, and runs the
//! backend's poll function. Parsed batches go out on the returned channel;
//! poll errors go to the error channel and the loop keeps going.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{FuseError, Result};
use crate::model::LogEntry;
use crate::search::LogSearch;
use crate::timefmt;

use super::{sleep_or_cancel, EntryBatch, CHANNEL_CAPACITY};

/// Option key overriding the timestamp layout used for window bounds.
pub const TIMESTAMP_FORMAT_OPTION: &str = "timestampFormat";

/// Advance the search's window for the next poll cycle.
///
/// Returns the new upper bound so the caller can feed it back in as
/// `previous_lte` on the following cycle.
pub fn advance_window(
    search: &mut LogSearch,
    previous_lte: DateTime<Utc>,
    layout: Option<&str>,
) -> DateTime<Utc> {
    let gte = previous_lte + chrono::Duration::seconds(1);
    let lte = Utc::now();
    search.range.gte = timefmt::format_with(gte, layout).into();
    search.range.lte = timefmt::format_with(lte, layout).into();
    search.range.last = crate::opt::Opt::Unset;
    lte
}

/// Spawn the refresh loop, returning the updates channel.
///
/// `poll` receives a mutated copy of the search (advanced window, `follow`
/// unset to stop recursion) and returns the freshly parsed entries. The
/// channel closes when `cancel` fires; a cycle in flight finishes first, so
/// closure happens within one poll interval.
pub fn spawn<F, Fut>(
    search: LogSearch,
    cancel: CancellationToken,
    errors: mpsc::Sender<FuseError>,
    mut poll: F,
) -> mpsc::Receiver<EntryBatch>
where
    F: FnMut(LogSearch) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<LogEntry>>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let interval = search.refresh_interval();
    let layout = search.option_str(TIMESTAMP_FORMAT_OPTION);

    tokio::spawn(async move {
        let mut previous_lte = Utc::now();
        loop {
            if !sleep_or_cancel(&cancel, interval).await {
                break;
            }

            let mut window = search.clone();
            window.follow = false;
            previous_lte = advance_window(&mut window, previous_lte, layout.as_deref());
            debug!(
                gte = window.range.gte.as_deref().unwrap_or_default(),
                lte = window.range.lte.as_deref().unwrap_or_default(),
                "follow poll"
            );

            match poll(window).await {
                Ok(batch) => {
                    if batch.is_empty() {
                        continue;
                    }
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        sent = tx.send(batch) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!("follow poll failed, continuing: {err}");
                    if errors.send(err).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    rx
}

/// Exponential backoff for job-status polling.
///
/// Yields `base`, then multiplies by `factor` up to `cap`. The factor is
/// clamped to `[1.0, 5.0]`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    factor: f64,
    current: Duration,
}

impl Backoff {
    /// Default base interval.
    pub const DEFAULT_BASE: Duration = Duration::from_secs(1);
    /// Default interval cap.
    pub const DEFAULT_CAP: Duration = Duration::from_secs(10);
    /// Default growth factor.
    pub const DEFAULT_FACTOR: f64 = 1.5;

    /// Create a backoff schedule.
    #[must_use]
    pub fn new(base: Duration, cap: Duration, factor: f64) -> Self {
        let factor = factor.clamp(1.0, 5.0);
        Self {
            base,
            cap,
            factor,
            current: base,
        }
    }

    /// The next wait interval, advancing the schedule.
    pub fn next_interval(&mut self) -> Duration {
        let interval = self.current;
        let advanced = self.current.as_secs_f64() * self.factor;
        self.current = Duration::from_secs_f64(advanced).min(self.cap);
        interval
    }

    /// Reset to the base interval, e.g. once a job completes.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE, Self::DEFAULT_CAP, Self::DEFAULT_FACTOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::Opt;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn advance_window_slides_and_clears_last() {
        let mut search = LogSearch::default();
        search.range.last = Opt::from("30m");
        let previous = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        let new_lte = advance_window(&mut search, previous, None);

        let gte = search.range.gte.as_deref().unwrap();
        assert_eq!(
            timefmt::parse_timestamp(gte).unwrap(),
            previous + chrono::Duration::seconds(1)
        );
        assert!(search.range.last.is_unset());
        assert!(new_lte >= previous);
    }

    #[test]
    fn advance_window_honors_layout_override() {
        let mut search = LogSearch::default();
        let previous = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        advance_window(&mut search, previous, Some("%Y-%m-%d %H:%M:%S"));
        assert_eq!(search.range.gte.as_deref().unwrap(), "2024-05-01 10:00:01");
    }

    #[tokio::test]
    async fn poll_batches_flow_and_cancellation_closes() {
        let mut search = LogSearch::default();
        search.refresh.duration = Opt::from("10ms");

        let cancel = CancellationToken::new();
        let (err_tx, _err_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut updates = spawn(search, cancel.clone(), err_tx, |window| async move {
            assert!(!window.follow);
            assert!(window.range.last.is_unset());
            Ok(vec![LogEntry::message("tick")])
        });

        let batch = updates.recv().await.expect("first batch");
        assert_eq!(batch[0].message, "tick");

        cancel.cancel();
        // Channel must close within roughly one poll interval.
        let closed = tokio::time::timeout(Duration::from_millis(200), async {
            while updates.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "updates channel did not close");
    }

    #[tokio::test]
    async fn poll_errors_are_forwarded_and_loop_continues() {
        let mut search = LogSearch::default();
        search.refresh.duration = Opt::from("10ms");

        let cancel = CancellationToken::new();
        let (err_tx, mut err_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = calls.clone();

        let mut updates = spawn(search, cancel.clone(), err_tx, move |_window| {
            let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(FuseError::UpstreamStatus {
                        status: 502,
                        body: "bad gateway".to_string(),
                    })
                } else {
                    Ok(vec![LogEntry::message("recovered")])
                }
            }
        });

        let err = err_rx.recv().await.expect("error forwarded");
        assert!(matches!(err, FuseError::UpstreamStatus { status: 502, .. }));

        let batch = updates.recv().await.expect("loop continued after error");
        assert_eq!(batch[0].message, "recovered");
        cancel.cancel();
    }

    #[test]
    fn backoff_grows_to_cap_and_resets() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 2.0);
        assert_eq!(backoff.next_interval(), Duration::from_secs(1));
        assert_eq!(backoff.next_interval(), Duration::from_secs(2));
        assert_eq!(backoff.next_interval(), Duration::from_secs(4));
        assert_eq!(backoff.next_interval(), Duration::from_secs(8));
        assert_eq!(backoff.next_interval(), Duration::from_secs(10));
        assert_eq!(backoff.next_interval(), Duration::from_secs(10));

        backoff.reset();
        assert_eq!(backoff.next_interval(), Duration::from_secs(1));
    }

    #[test]
    fn backoff_factor_is_clamped() {
        let mut wild = Backoff::new(Duration::from_secs(1), Duration::from_secs(100), 50.0);
        wild.next_interval();
        assert_eq!(wild.next_interval(), Duration::from_secs(5));
    }
}

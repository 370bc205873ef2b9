//! Line-reader backend: stream a command's stdout and extract fields.
//!
//! The transport (SSH, local shell) hides behind [`CommandRunner`]; the
//! backend composes the command from search options, scans its output line
//! by line, applies the configured field extraction, and always filters
//! client-side. Even when a richer filter engine runs remotely, its presence
//! is only known after the command completes, so local filtering is what
//! guarantees correctness.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{FuseError, Result};
use crate::extract;
use crate::filter::{self, Filter};
use crate::model::LogEntry;
use crate::search::{FieldExtraction, LogSearch};

use super::{
    collect_fields, Backend, EntryBatch, FieldValues, Pagination, SearchResult, CHANNEL_CAPACITY,
};

/// Capacity of the raw line channel between runner and backend.
const LINE_CHANNEL_CAPACITY: usize = 256;

/// Runs a command and streams its stdout lines.
///
/// The runner owns the process: it closes the channel at EOF and tears the
/// process down when the token cancels.
#[async_trait]
pub trait CommandRunner: Send + Sync + std::fmt::Debug {
    /// Start `command`, returning a channel of output lines.
    async fn run(
        &self,
        cancel: CancellationToken,
        command: &str,
    ) -> Result<mpsc::Receiver<String>>;
}

/// Runs commands through the local shell.
#[derive(Debug)]
pub struct LocalCommandRunner;

#[async_trait]
impl CommandRunner for LocalCommandRunner {
    async fn run(
        &self,
        cancel: CancellationToken,
        command: &str,
    ) -> Result<mpsc::Receiver<String>> {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| FuseError::io(format!("spawn '{command}'"), e))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FuseError::config("child process has no stdout pipe"))?;

        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        let _ = child.kill().await;
                        break;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if tx.send(line).await.is_err() {
                                let _ = child.kill().await;
                                break;
                            }
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
            }
            let _ = child.wait().await;
        });
        Ok(rx)
    }
}

/// The line-reader backend.
#[derive(Debug)]
pub struct LineReaderBackend {
    runner: Arc<dyn CommandRunner>,
}

impl LineReaderBackend {
    /// Option carrying the command to run; required.
    pub const CMD_OPTION: &'static str = "cmd";
    /// Option listing file paths appended to the command.
    pub const PATHS_OPTION: &'static str = "paths";

    /// Create the backend over a runner.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// A backend running commands through the local shell.
    #[must_use]
    pub fn local() -> Self {
        Self::new(Arc::new(LocalCommandRunner))
    }

    fn compose_command(search: &LogSearch) -> Result<String> {
        let cmd = search
            .option_str(Self::CMD_OPTION)
            .ok_or_else(|| FuseError::missing_option(Self::CMD_OPTION, "line-reader"))?;
        match search.option_str_list(Self::PATHS_OPTION) {
            Some(paths) if !paths.is_empty() => Ok(format!("{cmd} {}", paths.join(" "))),
            _ => Ok(cmd),
        }
    }
}

/// Turn a raw line into a filtered, extracted entry.
fn line_to_entry(
    line: String,
    extraction: &FieldExtraction,
    filter: Option<&Filter>,
) -> Option<LogEntry> {
    let mut entry = LogEntry::message(line);
    extract::apply(&mut entry, extraction);
    entry.normalize();
    filter::matches_opt(filter, &entry).then_some(entry)
}

#[async_trait]
impl Backend for LineReaderBackend {
    fn name(&self) -> &'static str {
        "line-reader"
    }

    async fn query(
        &self,
        cancel: CancellationToken,
        search: LogSearch,
    ) -> Result<Box<dyn SearchResult>> {
        let command = Self::compose_command(&search)?;
        let filter = search.effective_filter()?;
        debug!(command = command.as_str(), follow = search.follow, "running line source");

        let mut lines = self.runner.run(cancel.clone(), &command).await?;

        if search.follow {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            let extraction = search.field_extraction.clone();
            let stream_filter = filter.clone();
            let stream_cancel = cancel.clone();
            tokio::spawn(async move {
                while let Some(line) = lines.recv().await {
                    let Some(entry) = line_to_entry(line, &extraction, stream_filter.as_ref())
                    else {
                        continue;
                    };
                    tokio::select! {
                        () = stream_cancel.cancelled() => break,
                        sent = tx.send(vec![entry]) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
            return Ok(Box::new(LineReaderResult {
                search,
                initial: Vec::new(),
                updates: Some(rx),
            }));
        }

        let size = search.size_or_default();
        let mut initial: EntryBatch = Vec::new();
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Err(FuseError::Cancelled),
                line = lines.recv() => match line {
                    Some(line) => {
                        if let Some(entry) =
                            line_to_entry(line, &search.field_extraction, filter.as_ref())
                        {
                            initial.push(entry);
                        }
                    }
                    None => break,
                },
            }
        }
        // The bounded batch keeps the newest entries, tail-style.
        if initial.len() > size {
            initial.drain(..initial.len() - size);
        }

        Ok(Box::new(LineReaderResult {
            search,
            initial,
            updates: None,
        }))
    }
}

/// Result of one line-reader run.
#[derive(Debug)]
struct LineReaderResult {
    search: LogSearch,
    initial: EntryBatch,
    updates: Option<mpsc::Receiver<EntryBatch>>,
}

#[async_trait]
impl SearchResult for LineReaderResult {
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
        None
    }
}

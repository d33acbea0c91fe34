//! Newline-delimited JSON audit file with a fire-and-forget writer.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use pingora_core::server::ShutdownWatch;
use pingora_core::services::background::BackgroundService;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

use super::{AuditEntry, AuditError};

/// The persisted audit file.
///
/// Appends add one JSON line each. Reads parse the whole file again on
/// every call and skip lines that are not valid entries, so a torn
/// trailing line from a concurrent append never hides earlier records.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry, creating the file if needed.
    pub async fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let line = entry.to_line()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(AuditError::Write)?;
        file.write_all(line.as_bytes())
            .await
            .map_err(AuditError::Write)?;
        file.flush().await.map_err(AuditError::Write)
    }

    /// Reads every well-formed entry in file order.
    ///
    /// A missing file reads as an empty log.
    pub async fn read_all(&self) -> Result<Vec<AuditEntry>, AuditError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AuditError::Read(e)),
        };
        Ok(parse_entries(&content))
    }
}

/// Parses newline-delimited entries, skipping blank and malformed lines.
pub fn parse_entries(content: &str) -> Vec<AuditEntry> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| match serde_json::from_str::<AuditEntry>(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(line = idx + 1, error = %e, "skipping malformed audit line");
                None
            }
        })
        .collect()
}

/// Handle used on the request path to record entries.
///
/// Recording never waits for the file write.
#[derive(Debug, Clone)]
pub struct AuditSink {
    tx: UnboundedSender<AuditEntry>,
}

impl AuditSink {
    /// Queues an entry for the writer.
    ///
    /// If the writer is gone the entry is dropped and reported on the console.
    pub fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.tx.send(entry) {
            tracing::error!(url = %e.0.url, "audit writer stopped; entry dropped");
        }
    }
}

/// Background task that drains queued entries into the audit file.
///
/// A single writer keeps entries in the order they were recorded.
pub struct AuditWriter {
    log: Arc<AuditLog>,
    rx: Mutex<Option<UnboundedReceiver<AuditEntry>>>,
}

/// Creates a connected sink and writer for `log`.
pub fn audit_channel(log: Arc<AuditLog>) -> (AuditSink, AuditWriter) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        AuditSink { tx },
        AuditWriter {
            log,
            rx: Mutex::new(Some(rx)),
        },
    )
}

impl AuditWriter {
    /// Writes one entry; failures are logged and swallowed.
    async fn write(&self, entry: &AuditEntry) {
        if let Err(e) = self.log.append(entry).await {
            tracing::error!(
                path = %self.log.path().display(),
                url = %entry.url,
                error = %e,
                "error logging request"
            );
        }
    }

    /// Drains entries until every sink is dropped or `shutdown` fires.
    ///
    /// On shutdown, entries already queued are still written.
    pub async fn run(&self, mut shutdown: ShutdownWatch) {
        let Some(mut rx) = self.rx.lock().await.take() else {
            tracing::warn!("audit writer already started");
            return;
        };

        loop {
            tokio::select! {
                entry = rx.recv() => match entry {
                    Some(entry) => self.write(&entry).await,
                    None => break,
                },
                _ = shutdown.changed() => {
                    rx.close();
                    while let Some(entry) = rx.recv().await {
                        self.write(&entry).await;
                    }
                    break;
                }
            }
        }

        tracing::debug!("audit writer stopped");
    }
}

#[async_trait]
impl BackgroundService for AuditWriter {
    async fn start(&self, shutdown: ShutdownWatch) {
        self.run(shutdown).await;
    }
}

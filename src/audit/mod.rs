//! Append-only audit log of routing outcomes.
//!
//! Request handlers record entries through an [`AuditSink`]; an
//! audit writer background service appends them to the log file.
//! The audit endpoint reads the file back with [`AuditLog::read_all`].

mod entry;
mod file;

pub use entry::AuditEntry;
pub use file::{audit_channel, AuditLog, AuditSink};

/// Errors raised while persisting or reading audit entries.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("audit read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("audit encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

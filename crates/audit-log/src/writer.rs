use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::entry::AuditRecord;

/// Prefix of every line written by [`DryRunWriter`].
pub const DRY_RUN_PREFIX: &str = "[DRY-RUN AUDIT]";

/// Errors that can occur while delivering audit records.
#[derive(Debug, thiserror::Error)]
pub enum AuditWriteError {
    #[error("failed to serialize audit record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write audit record: {0}")]
    Write(std::io::Error),

    #[error("failed to flush audit output: {0}")]
    Flush(std::io::Error),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("failed to obtain access token: {0}")]
    Token(String),

    #[error("failed to send log entries: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Cloud Logging rejected entries with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Destination for audit records.
///
/// [`write`](Self::write) queues a record; [`flush`](Self::flush) delivers
/// everything queued so far. The sink calls both for every record.
#[async_trait]
pub trait AuditWriter: Send {
    async fn write(&mut self, record: &AuditRecord) -> Result<(), AuditWriteError>;

    async fn flush(&mut self) -> Result<(), AuditWriteError>;
}

/// Writes `[DRY-RUN AUDIT] <record JSON>` lines instead of calling the
/// remote API.
pub struct DryRunWriter<W = tokio::io::Stdout> {
    out: W,
}

impl DryRunWriter<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> DryRunWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait]
impl<W> AuditWriter for DryRunWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, record: &AuditRecord) -> Result<(), AuditWriteError> {
        let line = format!("{DRY_RUN_PREFIX} {}\n", serde_json::to_string(record)?);
        self.out
            .write_all(line.as_bytes())
            .await
            .map_err(AuditWriteError::Write)
    }

    async fn flush(&mut self) -> Result<(), AuditWriteError> {
        self.out.flush().await.map_err(AuditWriteError::Flush)
    }
}

use line_classifier::AuditEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default capacity of each dispatch queue.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Producer half of the two dispatch queues, cloned into every tailer.
///
/// Sends wait for capacity; a slow sink throttles the tailers feeding it
/// instead of dropping data.
#[derive(Debug, Clone)]
pub struct Dispatch {
    audit: mpsc::Sender<AuditEvent>,
    lines: mpsc::Sender<String>,
}

/// Consumer halves of the dispatch queues, one per sink.
#[derive(Debug)]
pub struct DispatchReceivers {
    pub audit: mpsc::Receiver<AuditEvent>,
    pub lines: mpsc::Receiver<String>,
}

/// Why a record could not be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("cancelled while waiting for queue capacity")]
    Cancelled,
    #[error("{0} queue closed")]
    Closed(&'static str),
}

/// Create the audit and passthrough queues.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn channels(capacity: usize) -> (Dispatch, DispatchReceivers) {
    let (audit_tx, audit_rx) = mpsc::channel(capacity);
    let (lines_tx, lines_rx) = mpsc::channel(capacity);
    (
        Dispatch {
            audit: audit_tx,
            lines: lines_tx,
        },
        DispatchReceivers {
            audit: audit_rx,
            lines: lines_rx,
        },
    )
}

impl Dispatch {
    /// Enqueue an audit event, waiting for capacity or cancellation.
    pub async fn send_audit(
        &self,
        event: AuditEvent,
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        send_or_cancel(&self.audit, event, cancel, "audit").await
    }

    /// Enqueue a passthrough line, waiting for capacity or cancellation.
    pub async fn send_line(
        &self,
        line: String,
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        send_or_cancel(&self.lines, line, cancel, "passthrough").await
    }
}

async fn send_or_cancel<T>(
    tx: &mpsc::Sender<T>,
    item: T,
    cancel: &CancellationToken,
    queue: &'static str,
) -> Result<(), DispatchError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DispatchError::Cancelled),
        sent = tx.send(item) => sent.map_err(|_| DispatchError::Closed(queue)),
    }
}

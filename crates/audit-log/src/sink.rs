use line_classifier::AuditEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::entry::{AuditRecord, AuditTarget};
use crate::writer::AuditWriter;

/// Serial consumer of the audit queue.
///
/// Each event is turned into an [`AuditRecord`], written, and flushed before
/// the next one is taken, trading throughput for the smallest possible loss
/// window on a crash. Failures are logged and the loop moves on.
pub struct AuditSink<W> {
    writer: W,
    target: AuditTarget,
    delivered: u64,
    failed: u64,
}

impl<W: AuditWriter> AuditSink<W> {
    pub fn new(writer: W, target: AuditTarget) -> Self {
        Self {
            writer,
            target,
            delivered: 0,
            failed: 0,
        }
    }

    /// Drain `rx` until cancellation or until every producer is gone, then
    /// hand the writer back.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<AuditEvent>,
        cancel: CancellationToken,
    ) -> W {
        tracing::info!(database_id = %self.target.database_id(), "starting audit sink");

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let discarded = discard_queued(&mut rx);
                    if discarded > 0 {
                        tracing::warn!(discarded, "dropping queued audit events on shutdown");
                    }
                    tracing::info!("context cancelled, stopping audit sink");
                    break;
                }
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => {
                        tracing::debug!("audit queue closed, stopping audit sink");
                        break;
                    }
                },
            };

            if self.deliver(&event).await {
                self.delivered += 1;
            } else {
                self.failed += 1;
            }
        }

        tracing::info!(
            delivered = self.delivered,
            failed = self.failed,
            "audit sink stopped"
        );
        self.writer
    }

    async fn deliver(&mut self, event: &AuditEvent) -> bool {
        let record = match AuditRecord::new(event, &self.target) {
            Ok(record) => record,
            Err(err) => {
                tracing::error!(%err, "failed to build audit record");
                return false;
            }
        };

        if let Err(err) = self.writer.write(&record).await {
            tracing::error!(%err, insert_id = %record.insert_id, "error sending audit log");
            return false;
        }
        if let Err(err) = self.writer.flush().await {
            tracing::error!(%err, insert_id = %record.insert_id, "error flushing audit log");
            return false;
        }
        true
    }
}

/// Close `rx` and throw away whatever is still queued. Returns the count.
pub fn discard_queued<T>(rx: &mut mpsc::Receiver<T>) -> usize {
    rx.close();
    let mut discarded = 0;
    while rx.try_recv().is_ok() {
        discarded += 1;
    }
    discarded
}

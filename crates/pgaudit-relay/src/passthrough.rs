use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use audit_log::sink::discard_queued;

pub const DRY_RUN_PREFIX: &str = "[DRY-RUN STDOUT] ";

/// Prints non-audit lines, one per line, in the order they arrive.
pub struct PassthroughSink<W = tokio::io::Stdout> {
    out: W,
    prefix: &'static str,
}

impl PassthroughSink<tokio::io::Stdout> {
    pub fn stdout(dry_run: bool) -> Self {
        Self::new(tokio::io::stdout(), dry_run)
    }
}

impl<W: AsyncWrite + Unpin + Send> PassthroughSink<W> {
    pub fn new(out: W, dry_run: bool) -> Self {
        Self {
            out,
            prefix: if dry_run { DRY_RUN_PREFIX } else { "" },
        }
    }

    /// Consume lines until cancellation or until every producer is gone.
    /// Write failures are logged and the line is dropped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<String>, cancel: CancellationToken) -> W {
        tracing::info!(dry_run = !self.prefix.is_empty(), "starting passthrough sink");
        let mut written: u64 = 0;

        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let discarded = discard_queued(&mut rx);
                    if discarded > 0 {
                        tracing::warn!(discarded, "dropping queued log lines on shutdown");
                    }
                    break;
                }
                line = rx.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
            };

            match self.write_line(&line).await {
                Ok(()) => written += 1,
                Err(err) => tracing::error!(%err, "failed to write passthrough line"),
            }
        }

        tracing::info!(written, "passthrough sink stopped");
        self.out
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let mut buf = String::with_capacity(self.prefix.len() + line.len() + 1);
        buf.push_str(self.prefix);
        buf.push_str(line);
        buf.push('\n');
        self.out.write_all(buf.as_bytes()).await?;
        self.out.flush().await
    }
}

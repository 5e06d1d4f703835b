use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use audit_log::{AuditSink, AuditWriter};
use log_tailer::{channels, GlobWatcher, WatcherConfig};

use crate::passthrough::PassthroughSink;

/// Upper bound on how long workers get to wind down after cancellation.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the tailing pipeline.
pub struct SupervisorConfig {
    pub watcher: WatcherConfig,
    pub channel_capacity: usize,
    pub shutdown_timeout: Duration,
}

/// Owns the watcher and both sinks for the lifetime of the process.
///
/// The pipeline runs until the cancellation token fires or the watcher hits
/// a fatal error. In both cases the token is cancelled and every worker gets
/// [`SupervisorConfig::shutdown_timeout`] to return.
pub struct Supervisor {
    config: SupervisorConfig,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    pub async fn run<W, P>(
        self,
        audit: AuditSink<W>,
        passthrough: PassthroughSink<P>,
    ) -> Result<()>
    where
        W: AuditWriter + 'static,
        P: AsyncWrite + Unpin + Send + 'static,
    {
        let Self { config, cancel } = self;
        let (dispatch, receivers) = channels(config.channel_capacity);

        let audit_task = tokio::spawn(audit.run(receivers.audit, cancel.clone()));
        let passthrough_task = tokio::spawn(passthrough.run(receivers.lines, cancel.clone()));

        info!(
            pattern = %config.watcher.pattern,
            capacity = config.channel_capacity,
            "starting log watcher"
        );
        let mut watcher_task =
            tokio::spawn(GlobWatcher::new(config.watcher, dispatch, cancel.clone()).run());

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                info!("shutdown requested");
                None
            }
            joined = &mut watcher_task => Some(joined),
        };

        cancel.cancel();

        let watcher_result = match outcome {
            Some(joined) => Some(joined.context("watcher task panicked")?),
            None => None,
        };

        let drained = tokio::time::timeout(config.shutdown_timeout, async {
            let watcher = match watcher_result {
                Some(result) => result,
                None => join("watcher", watcher_task).await.unwrap_or(Ok(())),
            };
            join("audit sink", audit_task).await;
            join("passthrough sink", passthrough_task).await;
            watcher
        })
        .await;

        match drained {
            Ok(Ok(())) => {
                info!("all workers stopped");
                Ok(())
            }
            Ok(Err(err)) => Err(err).context("log watcher failed"),
            Err(_) => {
                warn!(
                    timeout_secs = config.shutdown_timeout.as_secs(),
                    "workers did not stop in time, abandoning them"
                );
                Ok(())
            }
        }
    }
}

async fn join<T>(name: &'static str, handle: JoinHandle<T>) -> Option<T> {
    match handle.await {
        Ok(value) => Some(value),
        Err(err) => {
            error!(task = name, %err, "worker task failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_log::{AuditTarget, DryRunWriter};
    use log_tailer::{StartPosition, TailOptions};
    use std::io::Write;

    fn config(pattern: String) -> SupervisorConfig {
        SupervisorConfig {
            watcher: WatcherConfig {
                pattern,
                tail: TailOptions {
                    start: StartPosition::Beginning,
                    retry_interval: Duration::from_millis(50),
                    read_interval: Duration::from_millis(10),
                    rotation_check_interval: Duration::from_millis(50),
                    max_line_bytes: 4096,
                },
                rescan_interval: Duration::from_millis(100),
            },
            channel_capacity: 8,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }

    fn target() -> AuditTarget {
        AuditTarget::new("p", "c", "europe-north1")
    }

    #[tokio::test]
    async fn cancellation_stops_the_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postgresql.json");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, r#"{{"message":"AUDIT: SESSION,1,1,READ,SELECT,,,SELECT 1"}}"#).unwrap();
        writeln!(file, r#"{{"message":"connection received"}}"#).unwrap();

        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(
            config(format!("{}/*.json", dir.path().display())),
            cancel.clone(),
        );
        let handle = tokio::spawn(supervisor.run(
            AuditSink::new(DryRunWriter::new(Vec::new()), target()),
            PassthroughSink::new(Vec::new(), true),
        ));

        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(6), handle)
            .await
            .expect("supervisor did not stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn invalid_pattern_is_fatal() {
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(config("/tmp/[".to_string()), cancel.clone());
        let result = supervisor
            .run(
                AuditSink::new(DryRunWriter::new(Vec::new()), target()),
                PassthroughSink::new(Vec::new(), false),
            )
            .await;

        assert!(result.is_err());
        assert!(cancel.is_cancelled());
    }
}

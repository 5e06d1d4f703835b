//! Delivery of pgaudit records to Google Cloud Logging.
//!
//! Audit events produced by the tailers arrive on a bounded queue and are
//! consumed by a single [`AuditSink`].  For every event the sink builds an
//! [`AuditRecord`] (the original line as text payload, the extracted labels,
//! a `databaseId` label and a `generic_node` resource descriptor) and hands
//! it to an [`AuditWriter`]:
//!
//! * [`CloudLoggingWriter`] posts records to the `entries:write` API,
//!   authenticating with a token from the metadata server.
//! * [`DryRunWriter`] prints `[DRY-RUN AUDIT] <record JSON>` lines instead.
//!
//! The writer is chosen once, at construction, and the sink is generic over
//! it.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use audit_log::{AuditSink, AuditTarget, DryRunWriter};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(rx: tokio::sync::mpsc::Receiver<line_classifier::AuditEvent>) {
//! let target = AuditTarget::new("my-project", "my-cluster", "europe-north1");
//! let sink = AuditSink::new(DryRunWriter::stdout(), target);
//! sink.run(rx, CancellationToken::new()).await;
//! # }
//! ```

pub mod auth;
pub mod cloud;
pub mod entry;
pub mod sink;
pub mod writer;

// Re-export primary public types at the crate root for convenience.
pub use cloud::{CloudLoggingConfig, CloudLoggingWriter, DEFAULT_LOG_ID};
pub use entry::{AuditRecord, AuditTarget, MonitoredResource, DEFAULT_LOCATION};
pub use sink::AuditSink;
pub use writer::{AuditWriteError, AuditWriter, DryRunWriter};

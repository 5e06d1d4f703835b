//! # line-classifier
//!
//! Pure classification of PostgreSQL JSON log lines.  Every line written by
//! the database's `jsonlog` destination is parsed into a [`LogEntry`] and
//! sorted into one of three buckets:
//!
//! * **Audit**: the `message` field starts with the pgaudit marker
//!   `AUDIT:`.  Labels are extracted from the statement fields and from a
//!   few sibling keys.
//! * **Passthrough**: any other valid JSON object; the raw line is kept so it
//!   can be forwarded byte-for-byte.
//! * **Invalid**: the line is not a JSON object.  A short excerpt is kept for
//!   the warning the caller emits.
//!
//! Nothing in this crate performs I/O or holds state.
//!
//! ## Quick start
//!
//! ```rust
//! use line_classifier::{classify, Classification};
//!
//! let line = r#"{"message":"AUDIT: SESSION,1,1,READ,SELECT,,,SELECT 1","user":"app"}"#;
//! match classify(line) {
//!     Classification::Audit(event) => {
//!         assert_eq!(event.labels.command.as_deref(), Some("SELECT"));
//!     }
//!     other => panic!("unexpected classification: {other:?}"),
//! }
//! ```

mod classify;
mod extract;

pub use classify::{classify, excerpt, is_audit, parse_entry, Classification, InvalidLine};
pub use extract::{extract_labels, AuditEvent, AuditLabels};

/// A single parsed log line: JSON object keys mapped to arbitrary values.
pub type LogEntry = serde_json::Map<String, serde_json::Value>;

/// Marker that identifies a pgaudit message.
pub const AUDIT_MARKER: &str = "AUDIT:";

/// Prefix stripped before the comma-separated statement fields are split.
pub const AUDIT_PREFIX: &str = "AUDIT: ";

/// Maximum number of characters of a rejected line kept for diagnostics.
pub const EXCERPT_CHARS: usize = 200;

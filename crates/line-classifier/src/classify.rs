use crate::extract::{extract_labels, AuditEvent};
use crate::{LogEntry, AUDIT_MARKER, EXCERPT_CHARS};

/// The outcome of classifying one raw log line.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// A pgaudit entry, destined for the remote audit sink.
    Audit(AuditEvent),
    /// A regular log line, carried verbatim to the passthrough sink.
    Passthrough(String),
    /// The line could not be parsed as a JSON object.
    Invalid(InvalidLine),
}

/// A line rejected by the parser.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to parse JSON log line: {reason}")]
pub struct InvalidLine {
    /// Parser error message.
    pub reason: String,
    /// At most [`EXCERPT_CHARS`] characters of the offending line.
    pub excerpt: String,
}

/// Classify a single line (without its line terminator).
pub fn classify(line: &str) -> Classification {
    let entry = match parse_entry(line) {
        Ok(entry) => entry,
        Err(invalid) => return Classification::Invalid(invalid),
    };

    if is_audit(&entry) {
        let labels = extract_labels(&entry);
        Classification::Audit(AuditEvent { entry, labels })
    } else {
        Classification::Passthrough(line.to_string())
    }
}

/// Parse a line as exactly one JSON object.
pub fn parse_entry(line: &str) -> Result<LogEntry, InvalidLine> {
    serde_json::from_str::<LogEntry>(line).map_err(|err| InvalidLine {
        reason: err.to_string(),
        excerpt: excerpt(line),
    })
}

/// Whether the entry's `message` is a string starting with [`AUDIT_MARKER`].
pub fn is_audit(entry: &LogEntry) -> bool {
    entry
        .get("message")
        .and_then(|v| v.as_str())
        .is_some_and(|m| m.starts_with(AUDIT_MARKER))
}

/// Truncate `line` to [`EXCERPT_CHARS`] characters, never splitting a UTF-8
/// sequence.
pub fn excerpt(line: &str) -> String {
    match line.char_indices().nth(EXCERPT_CHARS) {
        Some((idx, _)) => line[..idx].to_string(),
        None => line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_message_is_classified_as_audit() {
        let line = r#"{"message":"AUDIT: SESSION,15,1,READ,SELECT,,,SELECT 1","user":"alice"}"#;
        match classify(line) {
            Classification::Audit(event) => {
                assert_eq!(event.labels.audit_type.as_deref(), Some("SESSION"));
                assert_eq!(event.labels.user.as_deref(), Some("alice"));
                assert_eq!(event.entry.get("user").unwrap(), "alice");
            }
            other => panic!("expected audit, got {other:?}"),
        }
    }

    #[test]
    fn marker_without_space_is_still_audit() {
        let line = r#"{"message":"AUDIT:SESSION,1"}"#;
        match classify(line) {
            Classification::Audit(event) => {
                // The statement fields are only split after "AUDIT: ".
                assert!(event.labels.audit_type.is_none());
            }
            other => panic!("expected audit, got {other:?}"),
        }
    }

    #[test]
    fn regular_message_passes_through_verbatim() {
        let line = r#"{"message":"connection received",  "pid": 42}"#;
        assert_eq!(
            classify(line),
            Classification::Passthrough(line.to_string())
        );
    }

    #[test]
    fn non_string_message_is_passthrough() {
        let line = r#"{"message":["AUDIT: SESSION"]}"#;
        assert!(matches!(classify(line), Classification::Passthrough(_)));
    }

    #[test]
    fn missing_message_is_passthrough() {
        let line = r#"{"error_severity":"LOG"}"#;
        assert!(matches!(classify(line), Classification::Passthrough(_)));
    }

    #[test]
    fn audit_marker_must_be_a_prefix() {
        let line = r#"{"message":"statement: AUDIT: SESSION"}"#;
        assert!(matches!(classify(line), Classification::Passthrough(_)));
    }

    #[test]
    fn malformed_json_is_invalid() {
        match classify(r#"{"message":"AUDIT: SESSION"#) {
            Classification::Invalid(invalid) => {
                assert!(!invalid.reason.is_empty());
                assert_eq!(invalid.excerpt, r#"{"message":"AUDIT: SESSION"#);
            }
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[test]
    fn json_array_is_invalid() {
        assert!(matches!(classify("[1,2,3]"), Classification::Invalid(_)));
    }

    #[test]
    fn excerpt_is_truncated_to_limit() {
        let line = "x".repeat(500);
        assert_eq!(excerpt(&line).chars().count(), EXCERPT_CHARS);

        let short = "short line";
        assert_eq!(excerpt(short), short);
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        let line = "é".repeat(300);
        let cut = excerpt(&line);
        assert_eq!(cut.chars().count(), EXCERPT_CHARS);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[test]
    fn invalid_excerpt_is_bounded() {
        let line = format!("{{\"message\": \"{}", "a".repeat(1000));
        match classify(&line) {
            Classification::Invalid(invalid) => {
                assert_eq!(invalid.excerpt.chars().count(), EXCERPT_CHARS)
            }
            other => panic!("expected invalid, got {other:?}"),
        }
    }
}

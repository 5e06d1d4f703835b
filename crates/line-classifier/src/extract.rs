use std::collections::BTreeMap;

use crate::{LogEntry, AUDIT_PREFIX};

// pgaudit statement field positions:
// AUDIT_TYPE,STATEMENT_ID,SUBSTATEMENT_ID,CLASS,COMMAND,OBJECT_TYPE,OBJECT_NAME,STATEMENT,PARAMETER
const AUDIT_TYPE_FIELD: usize = 0;
const CLASS_FIELD: usize = 3;
const COMMAND_FIELD: usize = 4;

/// An audit line together with the labels extracted from its content.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    /// The parsed line, forwarded unchanged as the record payload.
    pub entry: LogEntry,
    /// Labels derived from the entry.
    pub labels: AuditLabels,
}

/// Labels derived from the content of a single audit entry.
///
/// Every field is optional: absent or empty source values are omitted rather
/// than reported as errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditLabels {
    pub audit_type: Option<String>,
    pub audit_class: Option<String>,
    pub command: Option<String>,
    pub user: Option<String>,
    pub database_name: Option<String>,
    pub backend_type: Option<String>,
}

impl AuditLabels {
    /// Render the label set as sent to the remote sink.  `database_id` is the
    /// `<project>:<cluster>` identifier and is always present.
    pub fn to_map(&self, database_id: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("databaseId".to_string(), database_id.to_string());

        let optional = [
            ("auditType", &self.audit_type),
            ("auditClass", &self.audit_class),
            ("command", &self.command),
            ("user", &self.user),
            ("databaseName", &self.database_name),
            ("backendType", &self.backend_type),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                labels.insert(key.to_string(), value.clone());
            }
        }

        labels
    }
}

/// Extract labels from an audit entry.
///
/// The `message` is expected to look like
/// `AUDIT: SESSION,15,1,READ,SELECT,,,SELECT 1`.  Short field lists and empty
/// fields are tolerated.
pub fn extract_labels(entry: &LogEntry) -> AuditLabels {
    let mut labels = AuditLabels {
        user: non_empty_str(entry, "user"),
        database_name: non_empty_str(entry, "dbname"),
        backend_type: non_empty_str(entry, "backend_type"),
        ..AuditLabels::default()
    };

    let statement = entry
        .get("message")
        .and_then(|v| v.as_str())
        .and_then(|m| m.strip_prefix(AUDIT_PREFIX));

    if let Some(statement) = statement {
        let fields: Vec<&str> = statement.split(',').collect();
        labels.audit_type = field(&fields, AUDIT_TYPE_FIELD);
        labels.audit_class = field(&fields, CLASS_FIELD);
        labels.command = field(&fields, COMMAND_FIELD);
    }

    labels
}

fn field(fields: &[&str], index: usize) -> Option<String> {
    fields
        .get(index)
        .filter(|f| !f.is_empty())
        .map(|f| f.to_string())
}

fn non_empty_str(entry: &LogEntry, key: &str) -> Option<String> {
    entry
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

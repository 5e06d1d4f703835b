use std::collections::BTreeMap;

use line_classifier::AuditEvent;
use serde::{Deserialize, Serialize};

/// Monitored resource type every record is attributed to.
pub const RESOURCE_TYPE: &str = "generic_node";

/// Namespace label of the monitored resource.
pub const RESOURCE_NAMESPACE: &str = "postgres-audit";

/// Location label used when none is configured.
pub const DEFAULT_LOCATION: &str = "europe-north1";

/// Severity attached to every audit record.
pub const SEVERITY: &str = "INFO";

/// The database cluster audit records are attributed to. Resolved once at
/// startup and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditTarget {
    pub project_id: String,
    pub cluster_name: String,
    pub location: String,
}

impl AuditTarget {
    pub fn new(
        project_id: impl Into<String>,
        cluster_name: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            cluster_name: cluster_name.into(),
            location: location.into(),
        }
    }

    /// `<project>:<cluster>`, used both as the `databaseId` label and as the
    /// resource's `node_id`.
    pub fn database_id(&self) -> String {
        format!("{}:{}", self.project_id, self.cluster_name)
    }

    /// The `generic_node` resource descriptor for this cluster.
    pub fn resource(&self) -> MonitoredResource {
        let labels = BTreeMap::from([
            ("location".to_string(), self.location.clone()),
            ("namespace".to_string(), RESOURCE_NAMESPACE.to_string()),
            ("node_id".to_string(), self.database_id()),
            ("project_id".to_string(), self.project_id.clone()),
        ]);
        MonitoredResource {
            kind: RESOURCE_TYPE.to_string(),
            labels,
        }
    }
}

/// A Cloud Logging monitored resource descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredResource {
    #[serde(rename = "type")]
    pub kind: String,
    pub labels: BTreeMap<String, String>,
}

/// A single audit record in the shape of a Cloud Logging `LogEntry`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub insert_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub severity: String,
    /// The original log line, re-serialised from the parsed entry.
    pub text_payload: String,
    pub labels: BTreeMap<String, String>,
    pub resource: MonitoredResource,
}

impl AuditRecord {
    /// Build the record for `event`, attaching the extracted labels, the
    /// synthetic `databaseId` label and the resource descriptor.
    pub fn new(event: &AuditEvent, target: &AuditTarget) -> Result<Self, serde_json::Error> {
        let text_payload = serde_json::to_string(&event.entry)?;

        Ok(Self {
            insert_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            severity: SEVERITY.to_string(),
            text_payload,
            labels: event.labels.to_map(&target.database_id()),
            resource: target.resource(),
        })
    }
}

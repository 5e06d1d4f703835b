//! Live delivery through the Cloud Logging `entries:write` REST API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::auth::TokenSource;
use crate::entry::{AuditRecord, AuditTarget, MonitoredResource};
use crate::writer::{AuditWriteError, AuditWriter};

/// Log id used when none is configured.
pub const DEFAULT_LOG_ID: &str = "postgres-audit-log";

/// Public Cloud Logging API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://logging.googleapis.com";

/// Settings for [`CloudLoggingWriter`].
#[derive(Debug, Clone)]
pub struct CloudLoggingConfig {
    /// API base URL, without the `/v2/entries:write` path.
    pub endpoint: String,
    pub log_id: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for CloudLoggingConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            log_id: DEFAULT_LOG_ID.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Body of an `entries:write` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteEntriesRequest<'a> {
    log_name: &'a str,
    resource: &'a MonitoredResource,
    entries: &'a [AuditRecord],
}

/// Sends audit records to Cloud Logging.
///
/// Records are queued by [`write`](AuditWriter::write) and sent in a single
/// request by [`flush`](AuditWriter::flush). Delivery is best-effort: a
/// failed request is reported and its records are not retried.
pub struct CloudLoggingWriter {
    client: reqwest::Client,
    url: String,
    log_name: String,
    resource: MonitoredResource,
    tokens: TokenSource,
    pending: Vec<AuditRecord>,
}

impl CloudLoggingWriter {
    /// Build the HTTP client and fetch a first access token so credential
    /// problems surface at startup.
    pub async fn connect(
        config: &CloudLoggingConfig,
        target: &AuditTarget,
    ) -> Result<Self, AuditWriteError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(AuditWriteError::Client)?;
        let mut tokens = TokenSource::from_env(client.clone());
        tokens.token().await?;

        tracing::info!(
            project_id = %target.project_id,
            log_id = %config.log_id,
            "Cloud Logging client ready"
        );
        Ok(Self::with_token_source(client, config, target, tokens))
    }

    pub fn with_token_source(
        client: reqwest::Client,
        config: &CloudLoggingConfig,
        target: &AuditTarget,
        tokens: TokenSource,
    ) -> Self {
        Self {
            client,
            url: format!("{}/v2/entries:write", config.endpoint.trim_end_matches('/')),
            log_name: format!("projects/{}/logs/{}", target.project_id, config.log_id),
            resource: target.resource(),
            tokens,
            pending: Vec::new(),
        }
    }

    /// Number of records queued but not yet flushed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn request_body<'a>(&'a self, entries: &'a [AuditRecord]) -> WriteEntriesRequest<'a> {
        WriteEntriesRequest {
            log_name: &self.log_name,
            resource: &self.resource,
            entries,
        }
    }
}

#[async_trait]
impl AuditWriter for CloudLoggingWriter {
    async fn write(&mut self, record: &AuditRecord) -> Result<(), AuditWriteError> {
        self.pending.push(record.clone());
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), AuditWriteError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let entries = std::mem::take(&mut self.pending);
        let token = self.tokens.token().await?;

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(token)
            .json(&self.request_body(&entries))
            .send()
            .await
            .map_err(AuditWriteError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuditWriteError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::trace!(entries = entries.len(), "audit entries delivered");
        Ok(())
    }
}

//! OAuth2 access tokens for the Cloud Logging API.

use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::writer::AuditWriteError;

/// Metadata server endpoint handing out tokens for the node's (or the
/// workload identity's) default service account.
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Environment variable holding a pre-issued token, for running outside GCP.
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Supplies bearer tokens, caching metadata-server tokens until shortly
/// before they expire.
#[derive(Debug)]
pub struct TokenSource {
    kind: SourceKind,
}

#[derive(Debug)]
enum SourceKind {
    Static(String),
    Metadata {
        client: reqwest::Client,
        url: String,
        cached: Option<CachedToken>,
    },
}

impl TokenSource {
    /// Use [`ACCESS_TOKEN_ENV`] when set, the metadata server otherwise.
    pub fn from_env(client: reqwest::Client) -> Self {
        match std::env::var(ACCESS_TOKEN_ENV) {
            Ok(token) if !token.is_empty() => {
                tracing::info!(env = ACCESS_TOKEN_ENV, "using access token from environment");
                TokenSource::fixed(token)
            }
            _ => TokenSource::metadata(client, METADATA_TOKEN_URL),
        }
    }

    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Static(token.into()),
        }
    }

    pub fn metadata(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Metadata {
                client,
                url: url.into(),
                cached: None,
            },
        }
    }

    /// Return a valid token, fetching a new one if needed.
    pub async fn token(&mut self) -> Result<String, AuditWriteError> {
        match &mut self.kind {
            SourceKind::Static(token) => Ok(token.clone()),
            SourceKind::Metadata {
                client,
                url,
                cached,
            } => {
                if let Some(token) = cached.as_ref().filter(|t| Instant::now() < t.refresh_at) {
                    return Ok(token.value.clone());
                }

                let fresh = fetch(&*client, url.as_str()).await?;
                let value = fresh.value.clone();
                *cached = Some(fresh);
                Ok(value)
            }
        }
    }
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<CachedToken, AuditWriteError> {
    let response = client
        .get(url)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|e| AuditWriteError::Token(format!("metadata server unreachable: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AuditWriteError::Token(format!(
            "metadata server returned status {status}"
        )));
    }

    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| AuditWriteError::Token(format!("malformed token response: {e}")))?;

    let lifetime = Duration::from_secs(body.expires_in).saturating_sub(REFRESH_MARGIN);
    tracing::debug!(expires_in = body.expires_in, "fetched access token");

    Ok(CachedToken {
        value: body.access_token,
        refresh_at: Instant::now() + lifetime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_is_returned_as_is() {
        let mut source = TokenSource::fixed("abc");
        assert_eq!(source.token().await.unwrap(), "abc");
        assert_eq!(source.token().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn unreachable_metadata_server_is_a_token_error() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let mut source = TokenSource::metadata(client, "http://127.0.0.1:1/token");
        let err = source.token().await.unwrap_err();
        assert!(matches!(err, AuditWriteError::Token(_)), "unexpected error: {err}");
    }

    #[test]
    fn token_response_parses() {
        let body: TokenResponse =
            serde_json::from_str(r#"{"access_token":"ya29.x","expires_in":3599,"token_type":"Bearer"}"#)
                .unwrap();
        assert_eq!(body.access_token, "ya29.x");
        assert_eq!(body.expires_in, 3599);
    }
}

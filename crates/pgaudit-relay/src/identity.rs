//! Who the audit records belong to: project, namespace and cluster.
//!
//! In local mode the project is taken from the command line. Inside
//! Kubernetes the pod's own metadata is read through the in-cluster API: the
//! `cluster-name` label of the pod and the `google-cloud-project` label of
//! its namespace.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

pub const LOCAL_NAMESPACE: &str = "local";
pub const LOCAL_CLUSTER: &str = "local-cluster";

pub const CLUSTER_NAME_LABEL: &str = "cluster-name";
pub const PROJECT_LABEL: &str = "google-cloud-project";

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Per-request timeout for Kubernetes API calls.
const API_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub project_id: String,
    pub namespace: String,
    pub cluster_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("{0} environment variable is not set")]
    MissingEnv(&'static str),

    #[error("failed to read service account file {path}: {source}")]
    ServiceAccount {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cluster CA certificate: {0}")]
    Certificate(#[source] reqwest::Error),

    #[error("failed to build Kubernetes client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("failed to get {what}: {source}")]
    Request {
        what: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to get {what}: status {status}")]
    Status { what: String, status: u16 },

    #[error("{label} label not found in {what} metadata")]
    MissingLabel { label: &'static str, what: String },
}

impl Identity {
    /// Local mode: no cluster lookups at all.
    pub fn local(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            namespace: LOCAL_NAMESPACE.to_string(),
            cluster_name: LOCAL_CLUSTER.to_string(),
        }
    }

    /// Resolve the identity, using local mode when `project_id` is given.
    pub async fn resolve(project_id: Option<&str>) -> Result<Self, IdentityError> {
        if let Some(project_id) = project_id.filter(|p| !p.is_empty()) {
            info!(project_id, "running in local mode");
            return Ok(Self::local(project_id));
        }

        let lookup = |name: &str| std::env::var(name).ok();
        let pod = PodRef::from_env(lookup)?;
        let client = KubeClient::in_cluster(lookup, Path::new(SERVICE_ACCOUNT_DIR)).await?;
        let identity = client.identity(&pod).await?;

        info!(
            project_id = %identity.project_id,
            namespace = %identity.namespace,
            cluster = %identity.cluster_name,
            "resolved identity from cluster metadata"
        );
        Ok(identity)
    }
}

/// The pod this process runs in, as exposed through the downward API.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PodRef {
    name: String,
    namespace: String,
}

impl PodRef {
    fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, IdentityError> {
        Ok(Self {
            name: required(&lookup, "POD_NAME")?,
            namespace: required(&lookup, "POD_NAMESPACE")?,
        })
    }
}

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, IdentityError> {
    lookup(name)
        .filter(|v| !v.is_empty())
        .ok_or(IdentityError::MissingEnv(name))
}

#[derive(Debug, Default, Deserialize)]
struct ObjectMeta {
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Object {
    #[serde(default)]
    metadata: ObjectMeta,
}

impl Object {
    fn label(&self, label: &'static str, what: &str) -> Result<String, IdentityError> {
        self.metadata
            .labels
            .get(label)
            .cloned()
            .ok_or_else(|| IdentityError::MissingLabel {
                label,
                what: what.to_string(),
            })
    }
}

/// Minimal read-only client for the in-cluster Kubernetes API.
struct KubeClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl KubeClient {
    async fn in_cluster(
        lookup: impl Fn(&str) -> Option<String>,
        service_account: &Path,
    ) -> Result<Self, IdentityError> {
        let host = required(&lookup, "KUBERNETES_SERVICE_HOST")?;
        let port = required(&lookup, "KUBERNETES_SERVICE_PORT")?;

        let token = read_service_account(service_account, "token").await?;
        let ca = read_service_account(service_account, "ca.crt").await?;
        let ca = reqwest::Certificate::from_pem(ca.as_bytes()).map_err(IdentityError::Certificate)?;

        let client = http_client(Some(ca), API_TIMEOUT)?;

        Ok(Self::new(client, api_base_url(&host, &port), token.trim()))
    }

    fn new(client: reqwest::Client, base_url: String, token: &str) -> Self {
        Self {
            client,
            base_url,
            token: token.to_string(),
        }
    }

    async fn identity(&self, pod: &PodRef) -> Result<Identity, IdentityError> {
        let pod_what = format!("pod {}/{}", pod.namespace, pod.name);
        let cluster_name = self
            .get(
                &format!("/api/v1/namespaces/{}/pods/{}", pod.namespace, pod.name),
                &pod_what,
            )
            .await?
            .label(CLUSTER_NAME_LABEL, &pod_what)?;

        let ns_what = format!("namespace {}", pod.namespace);
        let project_id = self
            .get(&format!("/api/v1/namespaces/{}", pod.namespace), &ns_what)
            .await?
            .label(PROJECT_LABEL, &ns_what)?;

        Ok(Identity {
            project_id,
            namespace: pod.namespace.clone(),
            cluster_name,
        })
    }

    async fn get(&self, path: &str, what: &str) -> Result<Object, IdentityError> {
        let request_error = |source| IdentityError::Request {
            what: what.to_string(),
            source,
        };

        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(IdentityError::Status {
                what: what.to_string(),
                status: status.as_u16(),
            });
        }

        response.json().await.map_err(request_error)
    }
}

fn http_client(
    ca: Option<reqwest::Certificate>,
    timeout: Duration,
) -> Result<reqwest::Client, IdentityError> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(ca) = ca {
        builder = builder.add_root_certificate(ca);
    }
    builder.build().map_err(IdentityError::Client)
}

async fn read_service_account(dir: &Path, file: &str) -> Result<String, IdentityError> {
    let path = dir.join(file);
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| IdentityError::ServiceAccount { path, source })
}

fn api_base_url(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("https://[{host}]:{port}")
    } else {
        format!("https://{host}:{port}")
    }
}

//! Kubernetes client
//!
//! Minimal API server client for the `kubernetes` slot. It resolves the
//! server, CA bundle and credentials either from the pod's mounted service
//! account or from a kubeconfig file, as selected by [`ClusterMode`].

use crate::config::{ClusterConfig, ClusterMode};
use crate::gcp::http::{GcpHttpClient, DEFAULT_USER_AGENT};
use crate::registry::SlotHandle;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// API server address used in-cluster when no master URL is configured
pub const IN_CLUSTER_SERVER: &str = "https://kubernetes.default.svc";

/// Kubernetes API client
#[derive(Debug)]
pub struct KubeClient {
    slot: String,
    server: String,
    namespace: String,
    token: Option<String>,
    http: GcpHttpClient,
}

/// Everything needed to talk to one API server
#[derive(Debug, Default)]
struct Endpoint {
    server: String,
    namespace: Option<String>,
    token: Option<String>,
    ca_pem: Option<Vec<u8>>,
    identity_pem: Option<Vec<u8>>,
    insecure: bool,
}

impl KubeClient {
    /// Build a client from cluster settings
    pub async fn connect(slot: &str, cluster: &ClusterConfig) -> Result<Self> {
        let mut endpoint = match cluster.mode {
            ClusterMode::InCluster => in_cluster_endpoint(&cluster.service_account_dir).await?,
            ClusterMode::Kubeconfig => {
                let path = cluster
                    .kubeconfig_path()
                    .context("Cannot locate kubeconfig: no home directory")?;
                kubeconfig_endpoint(&path).await?
            }
        };

        if let Some(master) = &cluster.master_url {
            endpoint.server = master.clone();
        }

        Self::from_endpoint(slot, endpoint)
    }

    fn from_endpoint(slot: &str, endpoint: Endpoint) -> Result<Self> {
        Url::parse(&endpoint.server)
            .with_context(|| format!("Invalid API server URL '{}'", endpoint.server))?;

        let mut builder = reqwest::Client::builder().user_agent(DEFAULT_USER_AGENT);
        if let Some(ca) = &endpoint.ca_pem {
            let cert = reqwest::Certificate::from_pem(ca).context("Invalid cluster CA certificate")?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(identity) = &endpoint.identity_pem {
            let identity =
                reqwest::Identity::from_pem(identity).context("Invalid client certificate")?;
            builder = builder.identity(identity);
        }
        if endpoint.insecure {
            tracing::warn!("TLS verification disabled for {}", endpoint.server);
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            slot: slot.to_string(),
            server: endpoint.server.trim_end_matches('/').to_string(),
            namespace: endpoint.namespace.unwrap_or_else(|| "default".to_string()),
            token: endpoint.token,
            http: GcpHttpClient::from_client(client),
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Namespace from the service account or current context
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// GET an API path such as `/api/v1/namespaces/default/pods`
    pub async fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}/{}", self.server, path.trim_start_matches('/'));
        self.http.get(&url, self.token.as_deref()).await
    }

    /// List pods in a namespace (all namespaces when empty)
    pub async fn list_pods(&self, namespace: &str) -> Result<Vec<Value>> {
        let path = if namespace.is_empty() {
            "/api/v1/pods".to_string()
        } else {
            format!("/api/v1/namespaces/{}/pods", urlencoding::encode(namespace))
        };
        let response = self.get(&path).await?;
        Ok(response
            .get("items")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl SlotHandle for KubeClient {
    fn slot(&self) -> &str {
        &self.slot
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

async fn in_cluster_endpoint(dir: &Path) -> Result<Endpoint> {
    let token = tokio::fs::read_to_string(dir.join("token"))
        .await
        .with_context(|| format!("Not running in a cluster: cannot read {}/token", dir.display()))?;
    let ca_pem = tokio::fs::read(dir.join("ca.crt"))
        .await
        .with_context(|| format!("Cannot read {}/ca.crt", dir.display()))?;
    let namespace = tokio::fs::read_to_string(dir.join("namespace"))
        .await
        .ok()
        .map(|ns| ns.trim().to_string());

    Ok(Endpoint {
        server: IN_CLUSTER_SERVER.to_string(),
        namespace,
        token: Some(token.trim().to_string()),
        ca_pem: Some(ca_pem),
        ..Endpoint::default()
    })
}

#[derive(Debug, Deserialize)]
struct Kubeconfig {
    #[serde(rename = "current-context", default)]
    current_context: Option<String>,
    #[serde(default)]
    clusters: Vec<Named<ClusterEntry>>,
    #[serde(default)]
    contexts: Vec<Named<ContextEntry>>,
    #[serde(default)]
    users: Vec<Named<UserEntry>>,
}

#[derive(Debug, Deserialize)]
struct Named<T> {
    name: String,
    #[serde(alias = "cluster", alias = "context", alias = "user")]
    value: T,
}

#[derive(Debug, Deserialize)]
struct ClusterEntry {
    server: String,
    #[serde(rename = "certificate-authority-data", default)]
    certificate_authority_data: Option<String>,
    #[serde(rename = "certificate-authority", default)]
    certificate_authority: Option<PathBuf>,
    #[serde(rename = "insecure-skip-tls-verify", default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UserEntry {
    #[serde(default)]
    token: Option<String>,
    #[serde(rename = "tokenFile", default)]
    token_file: Option<PathBuf>,
    #[serde(rename = "client-certificate-data", default)]
    client_certificate_data: Option<String>,
    #[serde(rename = "client-key-data", default)]
    client_key_data: Option<String>,
}

fn find<'a, T>(entries: &'a [Named<T>], name: &str, kind: &str) -> Result<&'a T> {
    entries
        .iter()
        .find(|e| e.name == name)
        .map(|e| &e.value)
        .with_context(|| format!("kubeconfig has no {} named '{}'", kind, name))
}

fn decode(data: &str, what: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .with_context(|| format!("Invalid base64 in {}", what))
}

async fn kubeconfig_endpoint(path: &Path) -> Result<Endpoint> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
    let kubeconfig: Kubeconfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse kubeconfig {}", path.display()))?;

    let context_name = kubeconfig
        .current_context
        .as_deref()
        .filter(|c| !c.is_empty())
        .context("kubeconfig has no current-context")?;
    let context = find(&kubeconfig.contexts, context_name, "context")?;
    let cluster = find(&kubeconfig.clusters, &context.cluster, "cluster")?;
    let default_user = UserEntry::default();
    let user = match &context.user {
        Some(name) => find(&kubeconfig.users, name, "user")?,
        None => &default_user,
    };

    let ca_pem = match (&cluster.certificate_authority_data, &cluster.certificate_authority) {
        (Some(data), _) => Some(decode(data, "certificate-authority-data")?),
        (None, Some(file)) => Some(
            tokio::fs::read(file)
                .await
                .with_context(|| format!("Failed to read CA file {}", file.display()))?,
        ),
        (None, None) => None,
    };

    let token = match (&user.token, &user.token_file) {
        (Some(token), _) => Some(token.clone()),
        (None, Some(file)) => Some(
            tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("Failed to read token file {}", file.display()))?
                .trim()
                .to_string(),
        ),
        (None, None) => None,
    };

    let identity_pem = match (&user.client_certificate_data, &user.client_key_data) {
        (Some(cert), Some(key)) => {
            let mut pem = decode(cert, "client-certificate-data")?;
            pem.push(b'\n');
            pem.extend(decode(key, "client-key-data")?);
            Some(pem)
        }
        _ => None,
    };

    Ok(Endpoint {
        server: cluster.server.clone(),
        namespace: context.namespace.clone(),
        token,
        ca_pem,
        identity_pem,
        insecure: cluster.insecure_skip_tls_verify,
    })
}

//! Service Client
//!
//! Authenticated REST client bound to one GCP service endpoint. Every REST
//! slot in the registry holds one of these.

use super::auth::Authenticator;
use super::http::GcpHttpClient;
use crate::registry::SlotHandle;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use url::Url;

/// REST client for a single GCP service
#[derive(Debug)]
pub struct ServiceClient {
    slot: String,
    base_url: String,
    resource: String,
    auth: Authenticator,
    http: GcpHttpClient,
    closed: AtomicBool,
}

impl ServiceClient {
    /// Create a client rooted at `base_url`
    pub fn new(slot: &str, base_url: &str, auth: Authenticator, http: GcpHttpClient) -> Result<Self> {
        let parsed = Url::parse(base_url)
            .with_context(|| format!("Invalid endpoint '{}' for slot {}", base_url, slot))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("Endpoint '{}' must be http or https", base_url);
        }

        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self {
            slot: slot.to_string(),
            base_url,
            resource: String::new(),
            auth,
            http,
            closed: AtomicBool::new(false),
        })
    }

    /// Set the resource root (e.g. `projects/my-project`) used by [`Self::resource_url`]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into().trim_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.auth
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Build a URL relative to the service endpoint; absolute URLs pass through
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Build a URL under the resource root
    pub fn resource_url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        match (self.resource.is_empty(), path.is_empty()) {
            (true, _) => self.url(path),
            (false, true) => self.url(&self.resource),
            (false, false) => self.url(&format!("{}/{}", self.resource, path)),
        }
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<Value> {
        let token = self.token().await?;
        self.http.get(&self.url(path), token.as_deref()).await
    }

    /// Make a GET request with URL-encoded query parameters
    pub async fn get_with_query(&self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        self.get(&add_query_params(&self.url(path), params)).await
    }

    /// Make a POST request
    pub async fn post(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        let token = self.token().await?;
        self.http.post(&self.url(path), token.as_deref(), body).await
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<Value> {
        let token = self.token().await?;
        self.http.delete(&self.url(path), token.as_deref()).await
    }

    async fn token(&self) -> Result<Option<String>> {
        if self.is_closed() {
            anyhow::bail!("Client for slot {} is closed", self.slot);
        }
        self.auth.bearer().await
    }
}

#[async_trait]
impl SlotHandle for ServiceClient {
    fn slot(&self) -> &str {
        &self.slot
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            anyhow::bail!("Client for slot {} was already closed", self.slot);
        }
        tracing::debug!("Closed client for slot {}", self.slot);
        Ok(())
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Append query parameters to a URL, encoding each value
pub fn add_query_params(url: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }

    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, query)
}

//! HTTP utilities for GCP REST API calls

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;

/// User agent sent when no `UserAgent` option is given
pub const DEFAULT_USER_AGENT: &str = concat!("gcpset/", env!("CARGO_PKG_VERSION"));

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Truncate long responses and strip control characters for logging
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// HTTP client wrapper for GCP API calls
#[derive(Clone, Debug)]
pub struct GcpHttpClient {
    client: Client,
}

impl GcpHttpClient {
    /// Create a new HTTP client
    pub fn new(user_agent: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder().user_agent(user_agent);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Wrap an already-configured reqwest client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Make a GET request
    pub async fn get(&self, url: &str, token: Option<&str>) -> Result<Value> {
        tracing::debug!("GET {}", url);
        let request = authorize(self.client.get(url), token);
        send(request).await
    }

    /// Make a POST request with an optional JSON body
    pub async fn post(&self, url: &str, token: Option<&str>, body: Option<&Value>) -> Result<Value> {
        tracing::debug!("POST {}", url);

        let mut request = authorize(self.client.post(url), token);
        if let Some(body) = body {
            request = request.json(body);
        }
        send(request).await
    }

    /// Make a DELETE request
    pub async fn delete(&self, url: &str, token: Option<&str>) -> Result<Value> {
        tracing::debug!("DELETE {}", url);
        let request = authorize(self.client.delete(url), token);
        send(request).await
    }
}

fn authorize(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

async fn send(request: RequestBuilder) -> Result<Value> {
    let response = request.send().await.context("Failed to send request")?;

    let status = response.status();
    let body = response
        .text()
        .await
        .context("Failed to read response body")?;

    if !status.is_success() {
        // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
        tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
        return Err(anyhow::anyhow!("API request failed: {}", status));
    }

    if body.is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&body).context("Failed to parse response JSON")
}

/// Format a GCP API error for display
/// Security: Sanitizes error messages to avoid leaking sensitive API details
pub fn format_gcp_error(error: &anyhow::Error) -> String {
    let error_str = format!("{:#}", error);

    if error_str.contains("API request failed") {
        if error_str.contains("403") {
            return "Permission denied. Check your GCP IAM permissions.".to_string();
        }
        if error_str.contains("401") {
            return "Authentication failed. Run 'gcloud auth application-default login'."
                .to_string();
        }
        if error_str.contains("404") {
            return "Resource not found.".to_string();
        }
        if error_str.contains("429") {
            return "Rate limit exceeded. Please try again later.".to_string();
        }
        if error_str.contains("500") || error_str.contains("503") {
            return "GCP service temporarily unavailable. Please try again.".to_string();
        }
        return "Request failed. Check your network connection and try again.".to_string();
    }

    let sanitized = error_str
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(120)
        .collect::<String>();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}

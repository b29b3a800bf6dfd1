//! Connectors turn a slot definition into a live handle
//!
//! The registry never constructs clients itself; it asks its [`Connector`].
//! [`GcpConnector`] is the real one. Tests plug in their own.

use super::handle::SlotHandle;
use super::slots::{render_template, SlotDef, SlotKind};
use crate::config::{ClientOption, Config};
use crate::gcp::auth::{Authenticator, DefaultCredentials, GcpCredentials};
use crate::gcp::client::ServiceClient;
use crate::gcp::http::{GcpHttpClient, DEFAULT_USER_AGENT};
use crate::kube::KubeClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Builds the handle for one slot
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, slot: &SlotDef, config: &Config) -> Result<Arc<dyn SlotHandle>>;
}

/// Connector for real GCP and Kubernetes endpoints
#[derive(Default)]
pub struct GcpConnector {
    adc: DefaultCredentials,
}

impl GcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    async fn connect_rest(&self, slot: &SlotDef, config: &Config) -> Result<ServiceClient> {
        let settings = RestSettings::resolve(slot, config)?;

        let auth = match settings.auth {
            AuthChoice::Default => {
                let provider = self.adc.provider().await?;
                Authenticator::Credentials(GcpCredentials::from_provider(provider, &config.scopes))
            }
            AuthChoice::File(path) => {
                Authenticator::Credentials(GcpCredentials::from_file(&path, &config.scopes)?)
            }
            AuthChoice::Token(token) => Authenticator::Static(token),
            AuthChoice::Anonymous => Authenticator::Anonymous,
        };

        let http = GcpHttpClient::new(&settings.user_agent, settings.timeout)?;

        let resource = match &slot.resource {
            Some(template) => render_template(template, config).map_err(anyhow::Error::msg)?,
            None => String::new(),
        };

        let client = ServiceClient::new(&slot.name, &settings.endpoint, auth, http)?
            .with_resource(resource);

        if config.verify_on_build {
            if let Some(probe) = &slot.probe {
                let path = render_template(probe, config).map_err(anyhow::Error::msg)?;
                client
                    .get(&path)
                    .await
                    .with_context(|| format!("Probe of {} failed", slot.display_name))?;
            }
        }

        tracing::debug!(
            "Connected {} at {} ({})",
            slot.name,
            client.base_url(),
            client.authenticator().kind()
        );

        Ok(client)
    }
}

#[async_trait]
impl Connector for GcpConnector {
    async fn connect(&self, slot: &SlotDef, config: &Config) -> Result<Arc<dyn SlotHandle>> {
        match slot.kind {
            SlotKind::Rest => Ok(Arc::new(self.connect_rest(slot, config).await?)),
            SlotKind::Kubernetes => Ok(Arc::new(
                KubeClient::connect(&slot.name, &config.cluster).await?,
            )),
        }
    }
}

#[derive(Debug, PartialEq)]
enum AuthChoice {
    /// Application Default Credentials
    Default,
    File(std::path::PathBuf),
    Token(String),
    Anonymous,
}

/// Effective REST settings after applying options in order
#[derive(Debug)]
struct RestSettings {
    endpoint: String,
    user_agent: String,
    timeout: Option<Duration>,
    auth: AuthChoice,
}

impl RestSettings {
    fn resolve(slot: &SlotDef, config: &Config) -> Result<Self> {
        let mut settings = RestSettings {
            endpoint: slot.endpoint.clone().unwrap_or_default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: None,
            auth: AuthChoice::Default,
        };

        for option in config.options_for(&slot.name) {
            match option {
                ClientOption::CredentialsFile(path) => settings.auth = AuthChoice::File(path.clone()),
                ClientOption::AccessToken(token) => settings.auth = AuthChoice::Token(token.clone()),
                ClientOption::WithoutAuthentication => settings.auth = AuthChoice::Anonymous,
                ClientOption::Endpoint(endpoint) => settings.endpoint = endpoint.clone(),
                ClientOption::UserAgent(ua) => settings.user_agent = ua.clone(),
                ClientOption::RequestTimeoutSecs(secs) => {
                    settings.timeout = Some(Duration::from_secs(*secs))
                }
            }
        }

        if settings.endpoint.is_empty() {
            anyhow::bail!("Slot {} has no endpoint", slot.name);
        }

        Ok(settings)
    }
}

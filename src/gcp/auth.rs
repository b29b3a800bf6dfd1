//! GCP Authentication
//!
//! Resolves how a slot authenticates: Application Default Credentials, a
//! service account key file, a pre-issued access token, or no auth at all.

use anyhow::{Context, Result};
use gcp_auth::TokenProvider;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OnceCell, RwLock};

/// Token expiry buffer - refresh tokens this much before they actually expire
/// This prevents using tokens that are about to expire during a request
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Default token TTL if we can't determine expiry (conservative: 30 minutes)
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// GCP credentials holder with token caching
#[derive(Clone)]
pub struct GcpCredentials {
    provider: Arc<dyn TokenProvider>,
    scopes: Arc<Vec<String>>,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// When this token expires (with buffer applied)
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

impl GcpCredentials {
    /// Wrap an existing token provider
    pub fn from_provider(provider: Arc<dyn TokenProvider>, scopes: &[String]) -> Self {
        Self {
            provider,
            scopes: Arc::new(scopes.to_vec()),
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Credentials from a service account key file
    pub fn from_file(path: &Path, scopes: &[String]) -> Result<Self> {
        let account = gcp_auth::CustomServiceAccount::from_file(path)
            .with_context(|| format!("Failed to load credentials file {}", path.display()))?;
        Ok(Self::from_provider(Arc::new(account), scopes))
    }

    /// Get an access token for API calls
    /// Security: Checks token expiry before returning cached token
    pub async fn get_token(&self) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let scopes: Vec<&str> = self.scopes.iter().map(String::as_str).collect();
        let token = self
            .provider
            .token(&scopes)
            .await
            .context("Failed to get access token")?;

        let token_str = token.as_str().to_string();

        // gcp_auth's expiry is not relied on; a conservative TTL is used instead
        let expires_at = Instant::now() + DEFAULT_TOKEN_TTL - TOKEN_EXPIRY_BUFFER;

        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(CachedToken {
                token: token_str.clone(),
                expires_at,
            });
        }

        tracing::debug!(
            "New token cached, expires in ~{} minutes",
            (DEFAULT_TOKEN_TTL - TOKEN_EXPIRY_BUFFER).as_secs() / 60
        );

        Ok(token_str)
    }

    /// Force refresh the token
    pub async fn refresh_token(&self) -> Result<String> {
        {
            let mut cache = self.token_cache.write().await;
            *cache = None;
        }

        self.get_token().await
    }
}

/// How requests from one handle are authorized
#[derive(Clone)]
pub enum Authenticator {
    Credentials(GcpCredentials),
    Static(String),
    Anonymous,
}

impl Authenticator {
    /// Bearer token for the next request, `None` for anonymous access
    pub async fn bearer(&self) -> Result<Option<String>> {
        match self {
            Authenticator::Credentials(credentials) => credentials.get_token().await.map(Some),
            Authenticator::Static(token) => Ok(Some(token.clone())),
            Authenticator::Anonymous => Ok(None),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Authenticator::Credentials(_) => "credentials",
            Authenticator::Static(_) => "access-token",
            Authenticator::Anonymous => "anonymous",
        }
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print the token itself
        write!(f, "Authenticator({})", self.kind())
    }
}

/// Application Default Credentials, discovered at most once and shared by
/// every slot that needs them
#[derive(Default)]
pub struct DefaultCredentials {
    provider: OnceCell<Arc<dyn TokenProvider>>,
}

impl DefaultCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover ADC on first use; a failed discovery is retried by the next caller
    pub async fn provider(&self) -> Result<Arc<dyn TokenProvider>> {
        let provider = self
            .provider
            .get_or_try_init(|| async {
                gcp_auth::provider().await.context(
                    "Failed to initialize GCP authentication. Run 'gcloud auth application-default login'",
                )
            })
            .await?;
        Ok(provider.clone())
    }
}

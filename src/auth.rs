use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Subscription secret is empty")]
    MissingSecret,
    #[error("Token endpoint unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
    #[error("Secret rejected: {status} - {message}")]
    Rejected { status: u16, message: String },
    #[error("Token endpoint returned an empty token")]
    EmptyToken,
}

/// Short-lived bearer token for the connection handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for an `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Exchanges a subscription secret for a bearer token
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self, secret: &str) -> Result<AccessToken, AuthError>;
}

pub struct HttpTokenProvider {
    client: Client,
    token_url: String,
}

impl HttpTokenProvider {
    pub fn new(token_url: impl Into<String>) -> Result<Self, AuthError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            token_url: token_url.into(),
        })
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn fetch_token(&self, secret: &str) -> Result<AccessToken, AuthError> {
        if secret.trim().is_empty() {
            return Err(AuthError::MissingSecret);
        }

        log::debug!("Auth: requesting token from {}", self.token_url);
        let response = self
            .client
            .post(&self.token_url)
            .header(SUBSCRIPTION_KEY_HEADER, secret)
            .header(reqwest::header::CONTENT_LENGTH, "0")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Auth: token request rejected with status {}", status);
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let token = response.text().await?;
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::EmptyToken);
        }

        log::info!("Auth: obtained access token");
        Ok(AccessToken::new(token))
    }
}

struct CachedToken {
    token: AccessToken,
    fetched_at: Instant,
}

/// Reuses tokens per secret until `ttl` elapses, then refreshes through the inner provider.
pub struct CachedTokenProvider<P> {
    inner: P,
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl<P: TokenProvider> CachedTokenProvider<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn invalidate(&self, secret: &str) {
        self.cache.lock().await.remove(secret);
    }
}

#[async_trait]
impl<P: TokenProvider> TokenProvider for CachedTokenProvider<P> {
    async fn fetch_token(&self, secret: &str) -> Result<AccessToken, AuthError> {
        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.get(secret) {
            if entry.fetched_at.elapsed() < self.ttl {
                log::debug!("Auth: reusing cached token");
                return Ok(entry.token.clone());
            }
            log::debug!("Auth: cached token expired, refreshing");
        }

        let token = self.inner.fetch_token(secret).await?;
        cache.insert(
            secret.to_string(),
            CachedToken {
                token: token.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(token)
    }
}

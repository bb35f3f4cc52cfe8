use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::models::{SecretRef, ServiceCredentials};
use crate::utils::{AppError, AppResult};

/// Anything that can hand out a bearer token for a scope.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self, scope: &str) -> AppResult<String>;
}

/// Turns an opaque secret reference into the secret value.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, secret: &SecretRef) -> AppResult<String>;
}

/// Resolves `env:NAME` (or a bare `NAME`) from the process environment.
pub struct EnvSecretResolver;

impl SecretResolver for EnvSecretResolver {
    fn resolve(&self, secret: &SecretRef) -> AppResult<String> {
        let name = secret.as_str().strip_prefix("env:").unwrap_or(secret.as_str()).trim();
        if name.is_empty() {
            return Err(AppError::Identity("empty client secret reference".into()));
        }
        std::env::var(name)
            .map_err(|_| AppError::Identity(format!("client secret '{}' is not set", name)))
    }
}

/// Result of the interactive delegated sign-in, acquired by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegatedToken {
    pub access_token: String,
    pub scopes: Vec<String>,
    pub account: Option<String>,
}

/// Serves tokens the interactive host already acquired, matched by scope.
pub struct StaticTokenProvider {
    tokens: Vec<DelegatedToken>,
}

impl StaticTokenProvider {
    pub fn new(tokens: Vec<DelegatedToken>) -> Self {
        Self { tokens }
    }

    pub fn single(scope: &str, access_token: &str) -> Self {
        Self::new(vec![DelegatedToken {
            access_token: access_token.to_string(),
            scopes: vec![scope.to_string()],
            account: None,
        }])
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self, scope: &str) -> AppResult<String> {
        self.tokens
            .iter()
            .find(|t| t.scopes.iter().any(|s| s.eq_ignore_ascii_case(scope)))
            .map(|t| t.access_token.clone())
            .ok_or_else(|| AppError::Identity(format!("no consented token for scope {}", scope)))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Client-credential flow against `{authority}/{tenant}/oauth2/v2.0/token`.
pub struct ClientCredentialProvider {
    http: reqwest::Client,
    authority: String,
    credentials: ServiceCredentials,
    secrets: Arc<dyn SecretResolver>,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl ClientCredentialProvider {
    pub fn new(
        http: reqwest::Client,
        authority: impl Into<String>,
        credentials: ServiceCredentials,
        secrets: Arc<dyn SecretResolver>,
    ) -> Self {
        Self {
            http,
            authority: authority.into(),
            credentials,
            secrets,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, scope: &str) -> Option<String> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .get(scope)
            .filter(|t| t.expires_at > Instant::now() + Duration::from_secs(30))
            .map(|t| t.value.clone())
    }

    async fn acquire(&self, scope: &str) -> AppResult<String> {
        let secret = self.secrets.resolve(&self.credentials.client_secret_ref)?;
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority.trim_end_matches('/'),
            self.credentials.tenant_id
        );
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", secret.as_str()),
            ("scope", scope),
        ];

        let response = self
            .http
            .post(&token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Identity(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<TokenErrorResponse>(&body)
                .ok()
                .and_then(|e| e.error_description.or(e.error))
                .unwrap_or(body);
            return Err(AppError::Identity(format!(
                "token request for tenant {} returned {}: {}",
                self.credentials.tenant_id, status, detail
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::Identity(format!("invalid token response: {}", e)))?;
        let expires_in = token.expires_in.unwrap_or(3600);
        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.insert(
                scope.to_string(),
                CachedToken {
                    value: token.access_token.clone(),
                    expires_at: Instant::now() + Duration::from_secs(expires_in),
                },
            );
        }
        log::debug!("Acquired app token for client {} ({})", self.credentials.client_id, scope);
        Ok(token.access_token)
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialProvider {
    async fn token(&self, scope: &str) -> AppResult<String> {
        if let Some(token) = self.cached(scope) {
            return Ok(token);
        }
        self.acquire(scope).await
    }
}

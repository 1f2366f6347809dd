//! Client-credential tokens, cached per application and tenant.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Deserialize;
use subscription_broker::{ApplicationId, Credential, TenantId};

use crate::config::GraphConfig;
use crate::error::GraphError;

#[derive(Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Cache of bearer tokens keyed by (application, tenant).
#[derive(Default)]
pub(crate) struct TokenCache {
    tokens: DashMap<(ApplicationId, TenantId), AccessToken>,
}

impl TokenCache {
    /// A valid token for the credential, requesting a new one if the cached
    /// token is missing or inside the refresh margin.
    pub(crate) async fn access_token(
        &self,
        http: &reqwest::Client,
        config: &GraphConfig,
        credential: &Credential,
    ) -> Result<String, GraphError> {
        let key = (credential.application_id(), credential.tenant_id());
        if let Some(token) = self.tokens.get(&key) {
            if token.expires_at > Instant::now() + config.token_refresh_margin {
                return Ok(token.value.clone());
            }
        }

        let token = request_token(http, config, credential).await?;
        let value = token.value.clone();
        self.tokens.insert(key, token);
        Ok(value)
    }

    pub(crate) fn invalidate(&self, credential: &Credential) {
        self.tokens
            .remove(&(credential.application_id(), credential.tenant_id()));
    }

    pub(crate) fn len(&self) -> usize {
        self.tokens.len()
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

async fn request_token(
    http: &reqwest::Client,
    config: &GraphConfig,
    credential: &Credential,
) -> Result<AccessToken, GraphError> {
    let client_id = credential.application_id().to_string();
    let form = [
        ("grant_type", "client_credentials"),
        ("client_id", client_id.as_str()),
        ("client_secret", credential.secret()),
        ("scope", config.scope.as_str()),
    ];

    let response = http
        .post(config.token_url(&credential.tenant_id().to_string()))
        .form(&form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let reason = match serde_json::from_str::<TokenErrorResponse>(&body) {
            Ok(error) => match error.error_description {
                Some(description) => format!("{}: {}", error.error, description),
                None => error.error,
            },
            Err(_) => format!("HTTP {}", status.as_u16()),
        };
        return Err(GraphError::Token(reason));
    }

    let token: TokenResponse = response.json().await?;
    tracing::debug!(
        tenant_id = %credential.tenant_id(),
        application_id = %credential.application_id(),
        expires_in = token.expires_in,
        "Acquired Graph access token"
    );

    Ok(AccessToken {
        value: token.access_token,
        expires_at: Instant::now() + Duration::from_secs(token.expires_in),
    })
}

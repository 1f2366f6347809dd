//! Microsoft Graph client for call-record webhooks
//!
//! Implements [`DirectoryClient`] over HTTPS: subscriptions are created,
//! renewed and deleted through `/subscriptions`, and call records are fetched
//! from `/communications/callRecords` with their sessions and segments
//! expanded. Requests authenticate with an app-only token obtained through
//! the OAuth2 client-credentials grant and cached per application and tenant.

mod config;
mod error;
mod token;

pub use config::GraphConfig;
pub use error::GraphError;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use subscription_broker::{
    CreateSubscriptionRequest, Credential, DirectoryClient, RemoteError, RemoteSubscription,
    ResourceId, SubscriptionId,
};

use token::TokenCache;

const CALL_RECORD_EXPAND: &str = "sessions($expand=segments)";

#[derive(Deserialize)]
struct GraphErrorBody {
    error: GraphErrorDetail,
}

#[derive(Deserialize)]
struct GraphErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Graph implementation of [`DirectoryClient`].
///
/// Cloning the client shares the connection pool and the token cache.
#[derive(Debug, Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    config: Arc<GraphConfig>,
    tokens: Arc<TokenCache>,
}

impl GraphClient {
    /// Create a client with the given endpoints.
    pub fn new(config: GraphConfig) -> Result<Self, GraphError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GraphError::Config(e.to_string()))?;

        Ok(Self {
            http,
            config: Arc::new(config),
            tokens: Arc::new(TokenCache::default()),
        })
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Number of cached access tokens.
    pub fn cached_tokens(&self) -> usize {
        self.tokens.len()
    }

    async fn authorized(
        &self,
        credential: &Credential,
        builder: RequestBuilder,
    ) -> Result<Response, GraphError> {
        let token = self
            .tokens
            .access_token(&self.http, &self.config, credential)
            .await?;

        let response = builder
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(response);
        }

        if response.status() == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate(credential);
        }
        Err(status_error(response).await)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        builder: RequestBuilder,
    ) -> Result<T, GraphError> {
        let response = self.authorized(credential, builder).await?;
        Ok(response.json::<T>().await?)
    }

    async fn send_no_content(
        &self,
        credential: &Credential,
        builder: RequestBuilder,
    ) -> Result<(), GraphError> {
        self.authorized(credential, builder).await?;
        Ok(())
    }
}

async fn status_error(response: Response) -> GraphError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get("Retry-After")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();

    let message = match serde_json::from_str::<GraphErrorBody>(&body) {
        Ok(GraphErrorBody { error }) => match (error.code, error.message) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (Some(text), None) | (None, Some(text)) => text,
            (None, None) => body,
        },
        Err(_) if body.is_empty() => format!("HTTP {status}"),
        Err(_) => body,
    };

    GraphError::Status {
        status,
        message,
        retry_after,
    }
}

#[async_trait]
impl DirectoryClient for GraphClient {
    async fn create_subscription(
        &self,
        credential: &Credential,
        request: &CreateSubscriptionRequest,
    ) -> Result<RemoteSubscription, RemoteError> {
        let builder = self
            .http
            .post(self.config.graph_endpoint("subscriptions"))
            .json(request);

        let subscription: RemoteSubscription = self.send_json(credential, builder).await?;
        tracing::debug!(
            tenant_id = %credential.tenant_id(),
            subscription_id = %subscription.id,
            "Graph created subscription"
        );
        Ok(subscription)
    }

    async fn renew_subscription(
        &self,
        credential: &Credential,
        subscription_id: &SubscriptionId,
        expiration: DateTime<Utc>,
    ) -> Result<RemoteSubscription, RemoteError> {
        let builder = self
            .http
            .patch(
                self.config
                    .graph_endpoint(&format!("subscriptions/{subscription_id}")),
            )
            .json(&json!({ "expirationDateTime": expiration }));

        Ok(self.send_json(credential, builder).await?)
    }

    async fn delete_subscription(
        &self,
        credential: &Credential,
        subscription_id: &SubscriptionId,
    ) -> Result<(), RemoteError> {
        let builder = self.http.delete(
            self.config
                .graph_endpoint(&format!("subscriptions/{subscription_id}")),
        );

        Ok(self.send_no_content(credential, builder).await?)
    }

    async fn fetch_call_record(
        &self,
        credential: &Credential,
        record_id: ResourceId,
    ) -> Result<serde_json::Value, RemoteError> {
        let builder = self
            .http
            .get(
                self.config
                    .graph_endpoint(&format!("communications/callRecords/{record_id}")),
            )
            .query(&[("$expand", CALL_RECORD_EXPAND)]);

        Ok(self.send_json(credential, builder).await?)
    }
}

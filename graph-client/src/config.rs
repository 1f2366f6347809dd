//! Configuration for the Graph client

use std::time::Duration;

use url::Url;

use crate::error::GraphError;

/// Endpoints and timeouts used by [`GraphClient`](crate::GraphClient).
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Identity platform authority
    /// Default: https://login.microsoftonline.com
    pub authority_url: String,

    /// Graph API base, including the version segment
    /// Default: https://graph.microsoft.com/v1.0
    pub graph_url: String,

    /// Scope requested with the client-credentials grant
    /// Default: https://graph.microsoft.com/.default
    pub scope: String,

    /// Per-request timeout
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// Tokens are refreshed this long before they expire
    /// Default: 60 seconds
    pub token_refresh_margin: Duration,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            authority_url: "https://login.microsoftonline.com".to_string(),
            graph_url: "https://graph.microsoft.com/v1.0".to_string(),
            scope: "https://graph.microsoft.com/.default".to_string(),
            request_timeout: Duration::from_secs(30),
            token_refresh_margin: Duration::from_secs(60),
        }
    }
}

impl GraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        for (name, value) in [("authority_url", &self.authority_url), ("graph_url", &self.graph_url)] {
            Url::parse(value).map_err(|e| GraphError::Config(format!("{name} '{value}': {e}")))?;
        }
        if self.request_timeout.is_zero() {
            return Err(GraphError::Config(
                "request_timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn token_url(&self, tenant: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_url.trim_end_matches('/'),
            tenant
        )
    }

    pub(crate) fn graph_endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.graph_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn with_authority_url(mut self, url: impl Into<String>) -> Self {
        self.authority_url = url.into();
        self
    }

    pub fn with_graph_url(mut self, url: impl Into<String>) -> Self {
        self.graph_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_token_refresh_margin(mut self, margin: Duration) -> Self {
        self.token_refresh_margin = margin;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_building() {
        let config = GraphConfig::new()
            .with_authority_url("http://127.0.0.1:9000/")
            .with_graph_url("http://127.0.0.1:9000/v1.0/");

        assert_eq!(
            config.token_url("contoso"),
            "http://127.0.0.1:9000/contoso/oauth2/v2.0/token"
        );
        assert_eq!(
            config.graph_endpoint("/subscriptions"),
            "http://127.0.0.1:9000/v1.0/subscriptions"
        );
    }

    #[test]
    fn test_validation() {
        assert!(GraphConfig::default().validate().is_ok());
        assert!(GraphConfig::new().with_graph_url("nope").validate().is_err());
        assert!(GraphConfig::new()
            .with_request_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}

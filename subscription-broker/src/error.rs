//! Error types for the subscription-broker crate.

use crate::types::{ResourceKind, TenantId};

/// Errors that can occur in the subscription broker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// No credential has been registered for the tenant
    #[error("No application registered for tenant {0}")]
    CredentialNotFound(TenantId),

    /// The tenant holds no subscription for the requested resource kind
    #[error("Subscription not found: {tenant_id} / {kind}")]
    SubscriptionNotFound {
        /// The tenant ID
        tenant_id: TenantId,
        /// The resource kind
        kind: ResourceKind,
    },

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An error occurred during shutdown
    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

/// Errors returned by a [`DirectoryClient`](crate::remote::DirectoryClient).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The request never produced a response
    #[error("Network error: {0}")]
    Network(String),

    /// Token acquisition failed or the platform refused the credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The platform is throttling this client
    #[error("Throttled by remote platform (retry after {retry_after_secs:?}s)")]
    Throttled {
        /// Seconds to wait, when the platform said so
        retry_after_secs: Option<u64>,
    },

    /// The platform answered with a non-success status
    #[error("Remote API returned {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message extracted from the response body
        message: String,
    },

    /// The platform answered with something that could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Raised when a shutdown or a caller cancels an in-flight operation.
///
/// The only error register, remove and renew return; every other failure is
/// logged and reported as `Ok(false)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Operation canceled")]
pub struct OperationCanceled;

/// Errors from validating an inbound notification payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The body is not a notification envelope
    #[error("Malformed notification envelope: {0}")]
    MalformedEnvelope(String),

    /// The envelope has no notification collection
    #[error("Notification envelope has no value collection")]
    MissingValue,
}

/// Errors from configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid public endpoint '{0}': {1}")]
    InvalidPublicEndpoint(String, String),

    #[error("{0} must be greater than 0")]
    MustBePositive(&'static str),

    #[error("{0} is out of range")]
    OutOfRange(&'static str),

    #[error("Renewal interval ({interval_secs}s) must be shorter than half the subscription lifetime ({lifetime_secs}s)")]
    RenewalWindowTooLong {
        interval_secs: u64,
        lifetime_secs: u64,
    },
}

impl From<ConfigError> for BrokerError {
    fn from(e: ConfigError) -> Self {
        BrokerError::Configuration(e.to_string())
    }
}

/// Convenience type alias for Results using BrokerError.
pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_broker_error_display() {
        let tenant = TenantId::new(Uuid::nil());

        let error = BrokerError::CredentialNotFound(tenant);
        assert_eq!(
            error.to_string(),
            "No application registered for tenant 00000000-0000-0000-0000-000000000000"
        );

        let error = BrokerError::SubscriptionNotFound {
            tenant_id: tenant,
            kind: ResourceKind::CallRecord,
        };
        assert!(error.to_string().contains("Subscription not found"));
        assert!(error.to_string().contains("CallRecord"));

        let error = BrokerError::ShutdownError("timeout".to_string());
        assert_eq!(error.to_string(), "Shutdown error: timeout");
    }

    #[test]
    fn test_remote_error_display() {
        let error = RemoteError::Api {
            status: 404,
            message: "ResourceNotFound".to_string(),
        };
        assert_eq!(error.to_string(), "Remote API returned 404: ResourceNotFound");

        let error = RemoteError::Throttled {
            retry_after_secs: Some(30),
        };
        assert!(error.to_string().contains("30"));

        let error = RemoteError::Network("connection reset".to_string());
        assert_eq!(error.to_string(), "Network error: connection reset");

        let error = RemoteError::Unauthorized("bad secret".to_string());
        assert_eq!(error.to_string(), "Unauthorized: bad secret");
    }

    #[test]
    fn test_config_error_conversion() {
        let error: BrokerError = ConfigError::MustBePositive("renewal_interval").into();
        assert_eq!(
            error.to_string(),
            "Configuration error: renewal_interval must be greater than 0"
        );
    }
}

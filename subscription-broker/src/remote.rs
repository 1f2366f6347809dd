//! Contract for the remote platform that holds push subscriptions.
//!
//! The broker never talks HTTP itself. Everything it needs from the platform
//! goes through [`DirectoryClient`], which the `graph-client` crate
//! implements against Microsoft Graph and tests implement with in-memory
//! mocks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credentials::Credential;
use crate::error::RemoteError;
use crate::types::{ChangeType, ResourceId, SubscriptionId};

/// Request to create a push subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
    /// Change type the platform should notify about
    pub change_type: ChangeType,
    /// Where notifications are delivered
    pub notification_url: String,
    /// Path of the resource to watch
    pub resource: String,
    /// Shared secret echoed back on every notification
    pub client_state: String,
    /// Requested expiration
    #[serde(rename = "expirationDateTime")]
    pub expiration: DateTime<Utc>,
}

/// A subscription as reported by the platform.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSubscription {
    pub id: SubscriptionId,
    #[serde(default)]
    pub resource: Option<String>,
    /// Some responses omit it; callers fall back to what they requested.
    #[serde(default, rename = "expirationDateTime")]
    pub expiration: Option<DateTime<Utc>>,
}

/// Operations the broker needs from the remote platform.
///
/// Every call carries the credential to act with, so one client instance
/// serves every tenant.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn create_subscription(
        &self,
        credential: &Credential,
        request: &CreateSubscriptionRequest,
    ) -> Result<RemoteSubscription, RemoteError>;

    async fn renew_subscription(
        &self,
        credential: &Credential,
        subscription_id: &SubscriptionId,
        expiration: DateTime<Utc>,
    ) -> Result<RemoteSubscription, RemoteError>;

    async fn delete_subscription(
        &self,
        credential: &Credential,
        subscription_id: &SubscriptionId,
    ) -> Result<(), RemoteError>;

    /// Fetch a call record with its sessions and segments expanded.
    async fn fetch_call_record(
        &self,
        credential: &Credential,
        record_id: ResourceId,
    ) -> Result<serde_json::Value, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_create_request_wire_shape() {
        let request = CreateSubscriptionRequest {
            change_type: ChangeType::Created,
            notification_url: "https://hooks.example.com/subscription".to_string(),
            resource: "communications/callRecords".to_string(),
            client_state: "state".to_string(),
            expiration: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["changeType"], "created");
        assert_eq!(json["notificationUrl"], "https://hooks.example.com/subscription");
        assert_eq!(json["resource"], "communications/callRecords");
        assert_eq!(json["clientState"], "state");
        assert_eq!(json["expirationDateTime"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn test_remote_subscription_tolerates_missing_fields() {
        let parsed: RemoteSubscription = serde_json::from_str(r#"{"id":"abc"}"#).unwrap();
        assert_eq!(parsed.id.as_str(), "abc");
        assert!(parsed.expiration.is_none());

        let parsed: RemoteSubscription = serde_json::from_str(
            r#"{"id":"abc","resource":"communications/callRecords","expirationDateTime":"2024-05-01T12:00:00.0000000Z","clientState":null}"#,
        )
        .unwrap();
        assert_eq!(parsed.resource.as_deref(), Some("communications/callRecords"));
        assert!(parsed.expiration.is_some());
    }
}

//! Core types for the subscription-broker crate.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Wrap an existing UUID.
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            /// Get the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a tenant (directory) on whose behalf subscriptions are held.
    TenantId
);

uuid_id!(
    /// Identifier of an application registration used to talk to the platform.
    ApplicationId
);

uuid_id!(
    /// Identifier of a resource referenced by a change notification.
    ResourceId
);

/// Identifier assigned to a subscription by the remote platform.
///
/// Kept opaque: the platform currently hands out GUIDs but nothing here
/// depends on that.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    /// Create a new subscription ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the subscription ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SubscriptionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SubscriptionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kinds of resources a subscription can target.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum ResourceKind {
    Alert,
    CallRecord,
    ChatMessage,
    DriveItemBusiness,
    DriveItemPersonal,
    Group,
    Message,
    SharePointSiteList,
    User,
}

impl ResourceKind {
    /// Every known resource kind.
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Alert,
        ResourceKind::CallRecord,
        ResourceKind::ChatMessage,
        ResourceKind::DriveItemBusiness,
        ResourceKind::DriveItemPersonal,
        ResourceKind::Group,
        ResourceKind::Message,
        ResourceKind::SharePointSiteList,
        ResourceKind::User,
    ];

    /// Name used on the HTTP surface and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Alert => "Alert",
            ResourceKind::CallRecord => "CallRecord",
            ResourceKind::ChatMessage => "ChatMessage",
            ResourceKind::DriveItemBusiness => "DriveItemBusiness",
            ResourceKind::DriveItemPersonal => "DriveItemPersonal",
            ResourceKind::Group => "Group",
            ResourceKind::Message => "Message",
            ResourceKind::SharePointSiteList => "SharePointSiteList",
            ResourceKind::User => "User",
        }
    }

    /// The `@odata.type` discriminator carried in notification resource data,
    /// for the kinds the notification processor understands.
    pub fn odata_type(&self) -> Option<&'static str> {
        match self {
            ResourceKind::CallRecord => Some("#microsoft.graph.callrecord"),
            _ => None,
        }
    }

    /// Resolve a recognized resource kind from an `@odata.type` discriminator.
    pub fn from_odata_type(discriminator: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| {
            kind.odata_type()
                .is_some_and(|t| t.eq_ignore_ascii_case(discriminator))
        })
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a resource kind name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown resource kind: {0}")]
pub struct UnknownResourceKind(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownResourceKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownResourceKind(s.to_string()))
    }
}

/// Change types carried by notifications.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Updated => "updated",
            ChangeType::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(ChangeType::Created),
            "updated" => Ok(ChangeType::Updated),
            "deleted" => Ok(ChangeType::Deleted),
            other => Err(format!("unknown change type: {other}")),
        }
    }
}

/// An active subscription held with the remote platform.
///
/// Only `expiration` changes after creation, when a renewal succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRecord {
    /// Identifier assigned by the remote platform
    pub id: SubscriptionId,
    /// Tenant the subscription belongs to
    pub tenant_id: TenantId,
    /// Kind of resource subscribed to
    pub kind: ResourceKind,
    /// Path of the subscribed resource, e.g. `communications/callRecords`
    pub resource_path: String,
    /// When the platform will drop the subscription unless renewed
    pub expiration: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// Create a new subscription record.
    pub fn new(
        id: SubscriptionId,
        tenant_id: TenantId,
        kind: ResourceKind,
        resource_path: impl Into<String>,
        expiration: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            kind,
            resource_path: resource_path.into(),
            expiration,
        }
    }

    /// Whether this record matches the kind and, if given, the resource path.
    pub fn matches(&self, kind: ResourceKind, resource_path: Option<&str>) -> bool {
        self.kind == kind && resource_path.map_or(true, |path| self.resource_path == path)
    }

    /// Whether the subscription lapses before `checkpoint`.
    pub fn expires_before(&self, checkpoint: DateTime<Utc>) -> bool {
        self.expiration < checkpoint
    }
}

/// Random token embedded in every subscription and checked on every
/// inbound notification entry.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientState(String);

impl ClientState {
    /// Generate a fresh token for this process.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Use a fixed token. Intended for tests.
    pub fn from_value(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against the client state declared by a notification entry.
    pub fn matches(&self, declared: Option<&str>) -> bool {
        declared == Some(self.0.as_str())
    }
}

impl fmt::Debug for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientState(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_resource_kind_parsing_is_case_insensitive() {
        assert_eq!("CallRecord".parse::<ResourceKind>(), Ok(ResourceKind::CallRecord));
        assert_eq!("callrecord".parse::<ResourceKind>(), Ok(ResourceKind::CallRecord));
        assert_eq!(" callRecord ".parse::<ResourceKind>(), Ok(ResourceKind::CallRecord));
        assert_eq!(
            "SharePointSiteList".parse::<ResourceKind>(),
            Ok(ResourceKind::SharePointSiteList)
        );
        assert!("Calendar".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_odata_discriminator() {
        assert_eq!(
            ResourceKind::from_odata_type("#microsoft.graph.callrecord"),
            Some(ResourceKind::CallRecord)
        );
        assert_eq!(
            ResourceKind::from_odata_type("#Microsoft.Graph.CallRecord"),
            Some(ResourceKind::CallRecord)
        );
        assert_eq!(ResourceKind::from_odata_type("#microsoft.graph.user"), None);
        assert_eq!(ResourceKind::User.odata_type(), None);
    }

    #[test]
    fn test_change_type_serde() {
        let parsed: ChangeType = serde_json::from_str("\"deleted\"").unwrap();
        assert_eq!(parsed, ChangeType::Deleted);
        assert_eq!(serde_json::to_string(&ChangeType::Created).unwrap(), "\"created\"");
        assert_eq!("Updated".parse::<ChangeType>(), Ok(ChangeType::Updated));
    }

    #[test]
    fn test_record_matching_and_expiry() {
        let now = Utc::now();
        let record = SubscriptionRecord::new(
            SubscriptionId::new("sub-1"),
            TenantId::new(Uuid::new_v4()),
            ResourceKind::CallRecord,
            "communications/callRecords",
            now + Duration::minutes(5),
        );

        assert!(record.matches(ResourceKind::CallRecord, None));
        assert!(record.matches(ResourceKind::CallRecord, Some("communications/callRecords")));
        assert!(!record.matches(ResourceKind::CallRecord, Some("users")));
        assert!(!record.matches(ResourceKind::User, None));

        assert!(record.expires_before(now + Duration::minutes(20)));
        assert!(!record.expires_before(now + Duration::minutes(5)));
    }

    #[test]
    fn test_client_state() {
        let state = ClientState::from_value("secret-token");
        assert!(state.matches(Some("secret-token")));
        assert!(!state.matches(Some("forged")));
        assert!(!state.matches(None));
        assert_eq!(format!("{state:?}"), "ClientState(..)");

        assert_ne!(ClientState::generate(), ClientState::generate());
    }

    #[test]
    fn test_tenant_id_parse_and_display() {
        let raw = "6f1c1a4e-1f6b-4c39-9d39-6bcb1f1d2a11";
        let tenant: TenantId = raw.parse().unwrap();
        assert_eq!(tenant.to_string(), raw);
        assert!("not-a-guid".parse::<TenantId>().is_err());
    }
}

//! Inbound push notification handling.
//!
//! A delivery is either a validation handshake, answered by echoing the
//! token, or a JSON envelope `{"value": [...]}` of change notifications.
//! Each entry in the envelope is checked on its own: a bad entry is logged
//! and skipped without affecting the others or the response.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::events::{ChangeEvent, EventBus};
use crate::types::{ChangeType, ClientState, ResourceId, ResourceKind, TenantId};

/// One change notification as sent by the platform.
///
/// Every field is optional on the wire so that one malformed entry cannot
/// fail the whole envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    #[serde(default)]
    pub client_state: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub change_type: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub resource_data: Option<ResourceData>,
}

/// Open-ended description of the changed resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceData {
    #[serde(rename = "@odata.type", default, skip_serializing_if = "Option::is_none")]
    pub odata_type: Option<String>,
    /// Older SDK spelling of the discriminator.
    #[serde(rename = "oDataType", default, skip_serializing_if = "Option::is_none")]
    pub legacy_odata_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub additional: serde_json::Map<String, serde_json::Value>,
}

impl ResourceData {
    pub fn discriminator(&self) -> Option<&str> {
        self.odata_type
            .as_deref()
            .or(self.legacy_odata_type.as_deref())
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    value: Option<serde_json::Value>,
}

/// Why a single notification entry was not dispatched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryRejection {
    #[error("Malformed entry: {0}")]
    Malformed(String),

    #[error("Client state does not match")]
    ClientStateMismatch,

    #[error("Missing resource data")]
    MissingResourceData,

    #[error("Missing or invalid tenant id")]
    MissingTenant,

    #[error("Missing resource data type")]
    MissingDiscriminator,

    #[error("Unrecognized resource data type: {0}")]
    UnrecognizedType(String),

    #[error("Missing or unknown change type")]
    UnknownChangeType,

    #[error("Cannot parse resource id for {kind}: {id:?}")]
    InvalidResourceId { kind: ResourceKind, id: Option<String> },
}

/// Per-entry results of processing one envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingReport {
    pub received: usize,
    pub dispatched: usize,
    /// Index of each skipped entry with the reason it was skipped
    pub rejected: Vec<(usize, EntryRejection)>,
}

impl ProcessingReport {
    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }
}

/// Result of handling one inbound delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// Echo this token back with 200
    Handshake(String),
    /// Envelope accepted; reply 202
    Accepted(ProcessingReport),
    /// Envelope unusable; reply 400
    Rejected(ValidationError),
}

/// Validates inbound notifications and publishes them on the event bus.
#[derive(Debug, Clone)]
pub struct NotificationProcessor {
    client_state: ClientState,
    bus: EventBus,
}

impl NotificationProcessor {
    pub fn new(client_state: ClientState, bus: EventBus) -> Self {
        Self { client_state, bus }
    }

    pub fn process(&self, validation_token: Option<&str>, body: &[u8]) -> NotificationOutcome {
        if let Some(token) = validation_token {
            tracing::info!("Returning token for subscription validation");
            return NotificationOutcome::Handshake(token.to_string());
        }

        match self.process_envelope(body) {
            Ok(report) => NotificationOutcome::Accepted(report),
            Err(e) => {
                tracing::info!("Rejected notification delivery: {}", e);
                NotificationOutcome::Rejected(e)
            }
        }
    }

    fn process_envelope(&self, body: &[u8]) -> Result<ProcessingReport, ValidationError> {
        let envelope: RawEnvelope = serde_json::from_slice(body)
            .map_err(|e| ValidationError::MalformedEnvelope(e.to_string()))?;

        let entries = match envelope.value {
            None | Some(serde_json::Value::Null) => return Err(ValidationError::MissingValue),
            Some(serde_json::Value::Array(entries)) => entries,
            Some(_) => {
                return Err(ValidationError::MalformedEnvelope(
                    "value is not an array".to_string(),
                ))
            }
        };

        tracing::debug!("Processing {} change notification(s)", entries.len());

        let mut report = ProcessingReport {
            received: entries.len(),
            ..ProcessingReport::default()
        };

        for (index, entry) in entries.into_iter().enumerate() {
            match self.process_entry(entry) {
                Ok(event) => {
                    self.bus.publish(event);
                    report.dispatched += 1;
                }
                Err(rejection) => {
                    match &rejection {
                        EntryRejection::InvalidResourceId { .. } => {
                            tracing::error!(entry = index, "{}", rejection)
                        }
                        _ => tracing::info!(entry = index, "Skipping notification: {}", rejection),
                    }
                    report.rejected.push((index, rejection));
                }
            }
        }

        Ok(report)
    }

    fn process_entry(&self, entry: serde_json::Value) -> Result<ChangeEvent, EntryRejection> {
        let notification: ChangeNotification = serde_json::from_value(entry)
            .map_err(|e| EntryRejection::Malformed(e.to_string()))?;

        if !self.client_state.matches(notification.client_state.as_deref()) {
            return Err(EntryRejection::ClientStateMismatch);
        }

        let resource_data = notification
            .resource_data
            .as_ref()
            .ok_or(EntryRejection::MissingResourceData)?;

        let tenant_id: TenantId = notification
            .tenant_id
            .as_deref()
            .and_then(|t| t.parse().ok())
            .ok_or(EntryRejection::MissingTenant)?;

        let discriminator = resource_data
            .discriminator()
            .ok_or(EntryRejection::MissingDiscriminator)?;

        let Some(kind) = ResourceKind::from_odata_type(discriminator) else {
            return Err(EntryRejection::UnrecognizedType(discriminator.to_string()));
        };

        let change: ChangeType = notification
            .change_type
            .as_deref()
            .and_then(|c| c.parse().ok())
            .ok_or(EntryRejection::UnknownChangeType)?;

        let resource_id: ResourceId = resource_data
            .id
            .as_deref()
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| EntryRejection::InvalidResourceId {
                kind,
                id: resource_data.id.clone(),
            })?;

        Ok(ChangeEvent {
            change,
            kind,
            tenant_id,
            resource_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventFilter;
    use serde_json::json;
    use uuid::Uuid;

    const STATE: &str = "expected-state";

    fn processor() -> (NotificationProcessor, EventBus) {
        let bus = EventBus::new();
        (
            NotificationProcessor::new(ClientState::from_value(STATE), bus.clone()),
            bus,
        )
    }

    fn entry(client_state: &str, change: &str, odata_key: &str, odata_type: &str, id: &str) -> serde_json::Value {
        json!({
            "clientState": client_state,
            "tenantId": Uuid::new_v4().to_string(),
            "changeType": change,
            "resource": "communications/callRecords/x",
            "subscriptionId": "sub-1",
            "resourceData": { odata_key: odata_type, "id": id }
        })
    }

    fn body(entries: Vec<serde_json::Value>) -> Vec<u8> {
        serde_json::to_vec(&json!({ "value": entries })).unwrap()
    }

    #[test]
    fn test_handshake_ignores_body() {
        let (processor, bus) = processor();
        let mut events = bus.subscribe(EventFilter::All);

        let outcome = processor.process(Some("abc"), b"definitely not json");
        assert_eq!(outcome, NotificationOutcome::Handshake("abc".to_string()));
        assert!(events.try_recv().is_none());
    }

    #[test]
    fn test_malformed_envelope() {
        let (processor, _bus) = processor();

        assert!(matches!(
            processor.process(None, b"{not json"),
            NotificationOutcome::Rejected(ValidationError::MalformedEnvelope(_))
        ));
        assert_eq!(
            processor.process(None, b"{}"),
            NotificationOutcome::Rejected(ValidationError::MissingValue)
        );
        assert_eq!(
            processor.process(None, br#"{"value":null}"#),
            NotificationOutcome::Rejected(ValidationError::MissingValue)
        );
        assert!(matches!(
            processor.process(None, br#"{"value":"x"}"#),
            NotificationOutcome::Rejected(ValidationError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_valid_entries_dispatch_typed_events() {
        let (processor, bus) = processor();
        let mut events = bus.subscribe(EventFilter::All);
        let record_id = Uuid::new_v4();

        let outcome = processor.process(
            None,
            &body(vec![
                entry(STATE, "created", "@odata.type", "#microsoft.graph.callrecord", &record_id.to_string()),
                entry(STATE, "deleted", "oDataType", "#microsoft.graph.callRecord", &Uuid::new_v4().to_string()),
            ]),
        );

        let NotificationOutcome::Accepted(report) = outcome else {
            panic!("expected accepted outcome");
        };
        assert_eq!(report.received, 2);
        assert_eq!(report.dispatched, 2);

        let first = events.try_recv().unwrap();
        assert_eq!(first.change, ChangeType::Created);
        assert_eq!(first.kind, ResourceKind::CallRecord);
        assert_eq!(first.resource_id, ResourceId::new(record_id));
        assert_eq!(events.try_recv().unwrap().change, ChangeType::Deleted);
    }

    #[test]
    fn test_client_state_mismatch_discards_entry() {
        let (processor, bus) = processor();
        let mut events = bus.subscribe(EventFilter::All);

        let outcome = processor.process(
            None,
            &body(vec![entry("forged", "created", "@odata.type", "#microsoft.graph.callrecord", &Uuid::new_v4().to_string())]),
        );

        let NotificationOutcome::Accepted(report) = outcome else {
            panic!("expected accepted outcome");
        };
        assert_eq!(report.dispatched, 0);
        assert_eq!(report.rejected, vec![(0, EntryRejection::ClientStateMismatch)]);
        assert!(events.try_recv().is_none());
    }

    #[test]
    fn test_each_entry_is_judged_independently() {
        let (processor, bus) = processor();
        let mut events = bus.subscribe(EventFilter::All);

        let mut missing_tenant = entry(STATE, "created", "@odata.type", "#microsoft.graph.callrecord", &Uuid::new_v4().to_string());
        missing_tenant["tenantId"] = serde_json::Value::Null;
        let mut missing_data = entry(STATE, "created", "@odata.type", "#microsoft.graph.callrecord", "x");
        missing_data["resourceData"] = serde_json::Value::Null;

        let outcome = processor.process(
            None,
            &body(vec![
                entry(STATE, "created", "@odata.type", "#microsoft.graph.user", &Uuid::new_v4().to_string()),
                entry(STATE, "created", "@odata.type", "#microsoft.graph.callrecord", "not-a-guid"),
                missing_tenant,
                missing_data,
                json!(42),
                entry(STATE, "created", "@odata.type", "#microsoft.graph.callrecord", &Uuid::new_v4().to_string()),
            ]),
        );

        let NotificationOutcome::Accepted(report) = outcome else {
            panic!("expected accepted outcome");
        };
        assert_eq!(report.received, 6);
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.rejected_count(), 5);
        assert_eq!(
            report.rejected[0],
            (0, EntryRejection::UnrecognizedType("#microsoft.graph.user".to_string()))
        );
        assert!(matches!(report.rejected[1], (1, EntryRejection::InvalidResourceId { .. })));
        assert_eq!(report.rejected[2], (2, EntryRejection::MissingTenant));
        assert_eq!(report.rejected[3], (3, EntryRejection::MissingResourceData));
        assert!(matches!(report.rejected[4], (4, EntryRejection::Malformed(_))));

        assert!(events.try_recv().is_some());
        assert!(events.try_recv().is_none());
    }

    #[test]
    fn test_empty_envelope_is_accepted() {
        let (processor, _bus) = processor();
        assert_eq!(
            processor.process(None, br#"{"value":[]}"#),
            NotificationOutcome::Accepted(ProcessingReport::default())
        );
    }

    #[test]
    fn test_resource_data_keeps_unknown_keys() {
        let data: ResourceData = serde_json::from_value(json!({
            "@odata.type": "#microsoft.graph.callrecord",
            "@odata.id": "communications/callRecords/1",
            "id": "1"
        }))
        .unwrap();

        assert_eq!(data.discriminator(), Some("#microsoft.graph.callrecord"));
        assert!(data.additional.contains_key("@odata.id"));
    }
}

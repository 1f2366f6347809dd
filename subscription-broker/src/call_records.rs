//! Cache of call-record details fed by change events.
//!
//! [`CallRecordObserver`] listens for call-record events. On "created" it
//! fetches the full record, with sessions and segments, through the tenant's
//! credential and stores it. On "deleted" it drops the cached copy. The store
//! keeps at most `capacity` records and evicts the oldest first.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::credentials::CredentialRegistry;
use crate::events::{ChangeEvent, EventBus, EventFilter};
use crate::manager::cancelable;
use crate::remote::DirectoryClient;
use crate::types::{ChangeType, ResourceId, ResourceKind, TenantId};

/// A fetched call record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRecord {
    #[serde(skip)]
    pub id: ResourceId,
    #[serde(skip)]
    pub tenant_id: TenantId,
    /// The document as returned by the platform
    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl CallRecord {
    /// Wrap a fetched document. Non-object documents are stored under `value`.
    pub fn new(id: ResourceId, tenant_id: TenantId, document: serde_json::Value) -> Self {
        let data = match document {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self { id, tenant_id, data }
    }
}

/// Bounded in-memory store of call records, oldest first.
#[derive(Debug, Clone)]
pub struct CallRecordStore {
    records: Arc<RwLock<VecDeque<CallRecord>>>,
    capacity: usize,
}

impl CallRecordStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Arc::new(RwLock::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Store a record, replacing any previous copy with the same id.
    ///
    /// Returns the record evicted to make room, if any.
    pub async fn insert(&self, record: CallRecord) -> Option<CallRecord> {
        let mut records = self.records.write().await;
        records.retain(|existing| existing.id != record.id);
        records.push_back(record);
        if records.len() > self.capacity {
            records.pop_front()
        } else {
            None
        }
    }

    pub async fn remove(&self, id: ResourceId) -> bool {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|record| record.id != id);
        records.len() != before
    }

    pub async fn get(&self, id: ResourceId) -> Option<CallRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|record| record.id == id)
            .cloned()
    }

    pub async fn ids(&self) -> Vec<ResourceId> {
        self.records.read().await.iter().map(|record| record.id).collect()
    }

    pub async fn all(&self) -> Vec<CallRecord> {
        self.records.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

/// Event consumer that keeps a [`CallRecordStore`] current.
#[derive(Clone)]
pub struct CallRecordObserver {
    store: CallRecordStore,
    credentials: CredentialRegistry,
    client: Arc<dyn DirectoryClient>,
}

impl CallRecordObserver {
    pub fn new(
        store: CallRecordStore,
        credentials: CredentialRegistry,
        client: Arc<dyn DirectoryClient>,
    ) -> Self {
        Self {
            store,
            credentials,
            client,
        }
    }

    /// Subscribe to the bus and process events until canceled.
    ///
    /// The subscription is taken before this returns, so events published
    /// afterwards are not missed.
    pub fn spawn(self, bus: &EventBus, cancel: CancellationToken) -> JoinHandle<()> {
        let mut subscription = bus.subscribe(EventFilter::ByKind(ResourceKind::CallRecord));
        let bus = bus.clone();

        tokio::spawn(async move {
            tracing::debug!("Call record observer started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = subscription.recv() => match event {
                        Some(event) => self.handle(event, &cancel).await,
                        None => break,
                    },
                }
            }
            bus.unsubscribe(subscription.id());
            tracing::debug!("Call record observer stopped");
        })
    }

    /// Apply one event to the store.
    pub async fn handle(&self, event: ChangeEvent, cancel: &CancellationToken) {
        match event.change {
            ChangeType::Created => self.fetch_and_store(event, cancel).await,
            ChangeType::Deleted => {
                if self.store.remove(event.resource_id).await {
                    tracing::debug!(record_id = %event.resource_id, "Dropped deleted call record");
                }
            }
            ChangeType::Updated => {
                tracing::debug!(record_id = %event.resource_id, "Ignoring call record update");
            }
        }
    }

    async fn fetch_and_store(&self, event: ChangeEvent, cancel: &CancellationToken) {
        let Some(credential) = self.credentials.first_for_tenant(event.tenant_id) else {
            tracing::error!(
                tenant_id = %event.tenant_id,
                "Cannot fetch call record {}: no application registered for tenant",
                event.resource_id
            );
            return;
        };

        let fetched = match cancelable(
            cancel,
            self.client.fetch_call_record(&credential, event.resource_id),
        )
        .await
        {
            Ok(fetched) => fetched,
            Err(_) => return,
        };

        match fetched {
            Ok(document) => {
                let record = CallRecord::new(event.resource_id, event.tenant_id, document);
                if let Some(evicted) = self.store.insert(record).await {
                    tracing::debug!(record_id = %evicted.id, "Evicted oldest call record");
                }
                tracing::info!(
                    tenant_id = %event.tenant_id,
                    record_id = %event.resource_id,
                    "Stored call record"
                );
            }
            Err(e) => {
                tracing::error!(
                    tenant_id = %event.tenant_id,
                    record_id = %event.resource_id,
                    "Cannot fetch call record: {}",
                    e
                );
            }
        }
    }
}

impl std::fmt::Debug for CallRecordObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRecordObserver")
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn record(id: ResourceId) -> CallRecord {
        CallRecord::new(
            id,
            TenantId::new(Uuid::nil()),
            json!({ "id": id.to_string(), "type": "peerToPeer" }),
        )
    }

    fn new_id() -> ResourceId {
        ResourceId::new(Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_store_evicts_oldest_beyond_capacity() {
        let store = CallRecordStore::new(2);
        let (a, b, c) = (new_id(), new_id(), new_id());

        assert!(store.insert(record(a)).await.is_none());
        assert!(store.insert(record(b)).await.is_none());
        let evicted = store.insert(record(c)).await.unwrap();

        assert_eq!(evicted.id, a);
        assert_eq!(store.ids().await, vec![b, c]);
    }

    #[tokio::test]
    async fn test_store_replaces_same_id() {
        let store = CallRecordStore::new(5);
        let id = new_id();

        store.insert(record(id)).await;
        let mut updated = record(id);
        updated.data.insert("version".to_string(), json!(2));
        store.insert(updated).await;

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(id).await.unwrap().data["version"], json!(2));
    }

    #[tokio::test]
    async fn test_store_remove() {
        let store = CallRecordStore::new(5);
        let id = new_id();
        store.insert(record(id)).await;

        assert!(store.remove(id).await);
        assert!(!store.remove(id).await);
        assert!(store.is_empty().await);
        assert!(store.get(id).await.is_none());
    }

    #[test]
    fn test_record_serializes_as_document() {
        let id = new_id();
        let json = serde_json::to_value(record(id)).unwrap();
        assert_eq!(json, json!({ "id": id.to_string(), "type": "peerToPeer" }));

        let wrapped = CallRecord::new(id, TenantId::new(Uuid::nil()), json!([1, 2]));
        assert_eq!(serde_json::to_value(wrapped).unwrap(), json!({ "value": [1, 2] }));
    }
}

//! Per-tenant ledger of active subscriptions.
//!
//! The ledger is the system of record that registration, removal and renewal
//! all mutate. The top-level tenant map is a `DashMap`, so inserting and
//! removing tenants is atomic. Each tenant's collection sits behind its own
//! async mutex, and [`TenantGuard`] holds that mutex for the length of a
//! check-then-act sequence, including the remote call in the middle.
//!
//! # Empty tenants
//!
//! Dropping a guard whose collection is empty retires the entry and removes
//! it from the map while the lock is still held. A task that cloned the entry
//! earlier and was waiting on the lock sees the retired flag and resolves the
//! tenant again, so no record is ever added to an entry that is no longer in
//! the map.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::{ResourceKind, SubscriptionId, SubscriptionRecord, TenantId};

/// The subscriptions held for one tenant.
#[derive(Debug, Default)]
pub struct TenantSubscriptions {
    records: Vec<SubscriptionRecord>,
    retired: bool,
}

impl TenantSubscriptions {
    pub fn records(&self) -> &[SubscriptionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Find the record for a resource kind, optionally narrowed to a path.
    pub fn find(&self, kind: ResourceKind, resource_path: Option<&str>) -> Option<&SubscriptionRecord> {
        self.records.iter().find(|r| r.matches(kind, resource_path))
    }

    pub fn find_by_id(&self, id: &SubscriptionId) -> Option<&SubscriptionRecord> {
        self.records.iter().find(|r| &r.id == id)
    }

    /// Insert a record unless one already exists for its kind and path.
    ///
    /// Returns `false` when the record was a duplicate and was not inserted.
    pub fn insert(&mut self, record: SubscriptionRecord) -> bool {
        if self.find(record.kind, Some(&record.resource_path)).is_some() {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn remove(&mut self, id: &SubscriptionId) -> Option<SubscriptionRecord> {
        let index = self.records.iter().position(|r| &r.id == id)?;
        Some(self.records.swap_remove(index))
    }

    pub fn update_expiration(&mut self, id: &SubscriptionId, expiration: DateTime<Utc>) -> bool {
        match self.records.iter_mut().find(|r| &r.id == id) {
            Some(record) => {
                record.expiration = expiration;
                true
            }
            None => false,
        }
    }
}

type TenantEntry = Arc<Mutex<TenantSubscriptions>>;
type TenantMap = DashMap<TenantId, TenantEntry>;

/// Exclusive access to one tenant's subscriptions.
///
/// Dereferences to [`TenantSubscriptions`]. If the collection is empty when
/// the guard is dropped, the tenant is removed from the ledger.
pub struct TenantGuard {
    tenant_id: TenantId,
    entry: TenantEntry,
    tenants: Arc<TenantMap>,
    guard: OwnedMutexGuard<TenantSubscriptions>,
}

impl TenantGuard {
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

impl Deref for TenantGuard {
    type Target = TenantSubscriptions;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for TenantGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for TenantGuard {
    fn drop(&mut self) {
        if self.guard.is_empty() && !self.guard.retired {
            self.guard.retired = true;
            let entry = &self.entry;
            self.tenants
                .remove_if(&self.tenant_id, |_, current| Arc::ptr_eq(current, entry));
            tracing::debug!(tenant_id = %self.tenant_id, "Pruned tenant with no subscriptions");
        }
    }
}

/// Concurrency-safe map from tenant to its active subscriptions.
///
/// Cloning the ledger yields another handle to the same state.
#[derive(Clone, Default)]
pub struct SubscriptionLedger {
    tenants: Arc<TenantMap>,
}

impl SubscriptionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically get or insert the entry for a tenant.
    ///
    /// A freshly inserted entry is empty and is pruned again by the first
    /// guard that is dropped while it is still empty. Only reachable through
    /// [`lock_tenant`](Self::lock_tenant), which always hands out such a guard.
    pub(crate) fn get_or_create_tenant_entry(&self, tenant_id: TenantId) -> TenantEntry {
        let entry = self
            .tenants
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(Mutex::new(TenantSubscriptions::default())));
        Arc::clone(entry.value())
    }

    /// Lock the tenant's collection, creating it if needed.
    ///
    /// This is the public get-or-create: the entry is pruned again when the
    /// guard drops with no subscriptions in it.
    pub async fn lock_tenant(&self, tenant_id: TenantId) -> TenantGuard {
        loop {
            let entry = self.get_or_create_tenant_entry(tenant_id);
            if let Some(guard) = self.acquire(tenant_id, entry).await {
                return guard;
            }
        }
    }

    /// Lock the tenant's collection if the tenant is known.
    pub async fn lock_existing(&self, tenant_id: TenantId) -> Option<TenantGuard> {
        loop {
            let entry = self
                .tenants
                .get(&tenant_id)
                .map(|entry| Arc::clone(entry.value()))?;
            if let Some(guard) = self.acquire(tenant_id, entry).await {
                return Some(guard);
            }
        }
    }

    async fn acquire(&self, tenant_id: TenantId, entry: TenantEntry) -> Option<TenantGuard> {
        let guard = Arc::clone(&entry).lock_owned().await;
        if guard.retired {
            return None;
        }
        Some(TenantGuard {
            tenant_id,
            entry,
            tenants: Arc::clone(&self.tenants),
            guard,
        })
    }

    /// Whether the tenant currently has an entry.
    pub fn contains_tenant(&self, tenant_id: TenantId) -> bool {
        self.tenants.contains_key(&tenant_id)
    }

    pub async fn find(
        &self,
        tenant_id: TenantId,
        kind: ResourceKind,
        resource_path: Option<&str>,
    ) -> Option<SubscriptionRecord> {
        let guard = self.lock_existing(tenant_id).await?;
        guard.find(kind, resource_path).cloned()
    }

    /// Add a record for the tenant. Returns `false` for a duplicate.
    pub async fn add(&self, tenant_id: TenantId, record: SubscriptionRecord) -> bool {
        self.lock_tenant(tenant_id).await.insert(record)
    }

    /// Remove a record, pruning the tenant once its collection is empty.
    pub async fn remove(&self, tenant_id: TenantId, id: &SubscriptionId) -> Option<SubscriptionRecord> {
        self.lock_existing(tenant_id).await?.remove(id)
    }

    pub async fn update_expiration(
        &self,
        tenant_id: TenantId,
        id: &SubscriptionId,
        expiration: DateTime<Utc>,
    ) -> bool {
        match self.lock_existing(tenant_id).await {
            Some(mut guard) => guard.update_expiration(id, expiration),
            None => false,
        }
    }

    /// Copy every tenant's records.
    ///
    /// Entry handles are collected first and the map is released before any
    /// tenant lock is awaited, so the copy never blocks structural changes.
    pub async fn snapshot(&self) -> Vec<(TenantId, Vec<SubscriptionRecord>)> {
        let entries: Vec<(TenantId, TenantEntry)> = self
            .tenants
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        let mut snapshot = Vec::with_capacity(entries.len());
        for (tenant_id, entry) in entries {
            let guard = entry.lock().await;
            if guard.retired || guard.records.is_empty() {
                continue;
            }
            snapshot.push((tenant_id, guard.records.clone()));
        }
        snapshot
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    /// Total number of records across all tenants.
    pub async fn record_count(&self) -> usize {
        self.snapshot()
            .await
            .iter()
            .map(|(_, records)| records.len())
            .sum()
    }
}

impl std::fmt::Debug for SubscriptionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionLedger")
            .field("tenants", &self.tenants.len())
            .finish()
    }
}

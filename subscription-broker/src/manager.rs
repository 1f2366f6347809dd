//! Subscription lifecycle: register, renew and remove.
//!
//! Every operation runs under the tenant's ledger guard, so the lookup, the
//! remote call and the ledger update form one atomic step per tenant. Two
//! concurrent registrations for the same triple therefore result in exactly
//! one remote create. Operations on different tenants never contend.
//!
//! Remote failures are logged and reported as `Ok(false)` with the ledger
//! left as it was. Cancellation is the only error surfaced to callers.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::BrokerConfig;
use crate::credentials::{Credential, CredentialRegistry};
use crate::error::{BrokerError, ConfigError, OperationCanceled};
use crate::ledger::{SubscriptionLedger, TenantGuard};
use crate::remote::{CreateSubscriptionRequest, DirectoryClient};
use crate::types::{
    ChangeType, ClientState, ResourceKind, SubscriptionId, SubscriptionRecord, TenantId,
};

/// Race a future against a cancellation token.
pub(crate) async fn cancelable<F>(
    cancel: &CancellationToken,
    future: F,
) -> Result<F::Output, OperationCanceled>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OperationCanceled),
        output = future => Ok(output),
    }
}

struct ManagerInner {
    ledger: SubscriptionLedger,
    credentials: CredentialRegistry,
    client: Arc<dyn DirectoryClient>,
    client_state: ClientState,
    notification_url: Url,
    lifetime: chrono::Duration,
}

/// Result of one renewal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    Renewed,
    /// The record was removed before the renewal could run
    Missing,
    /// No credential, or the platform refused
    Failed,
}

/// Manages the subscriptions held with the remote platform.
///
/// Cloning the manager yields another handle to the same ledger, registry
/// and client.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<ManagerInner>,
}

impl SubscriptionManager {
    pub fn new(
        config: &BrokerConfig,
        ledger: SubscriptionLedger,
        credentials: CredentialRegistry,
        client: Arc<dyn DirectoryClient>,
        client_state: ClientState,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            inner: Arc::new(ManagerInner {
                ledger,
                credentials,
                client,
                client_state,
                notification_url: config.notification_url()?,
                lifetime: config.lifetime_delta()?,
            }),
        })
    }

    pub fn ledger(&self) -> &SubscriptionLedger {
        &self.inner.ledger
    }

    pub fn credentials(&self) -> &CredentialRegistry {
        &self.inner.credentials
    }

    pub fn client(&self) -> &Arc<dyn DirectoryClient> {
        &self.inner.client
    }

    pub fn notification_url(&self) -> &Url {
        &self.inner.notification_url
    }

    fn credential_for(&self, tenant_id: TenantId) -> Option<Arc<Credential>> {
        let credential = self.inner.credentials.first_for_tenant(tenant_id);
        if credential.is_none() {
            tracing::warn!(
                tenant_id = %tenant_id,
                "{}",
                BrokerError::CredentialNotFound(tenant_id)
            );
        }
        credential
    }

    /// `now + lifetime`, or `None` when that is past the last representable
    /// timestamp.
    fn requested_expiration(&self, tenant_id: TenantId) -> Option<DateTime<Utc>> {
        let expiration = Utc::now().checked_add_signed(self.inner.lifetime);
        if expiration.is_none() {
            tracing::error!(
                tenant_id = %tenant_id,
                "Subscription lifetime of {}s overflows the expiration timestamp",
                self.inner.lifetime.num_seconds()
            );
        }
        expiration
    }

    /// Register a subscription for the tenant.
    ///
    /// Returns `Ok(true)` if the tenant already holds a subscription for the
    /// kind and path, or if the platform accepted a new one.
    pub async fn register(
        &self,
        tenant_id: TenantId,
        kind: ResourceKind,
        resource_path: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, OperationCanceled> {
        let mut tenant = cancelable(cancel, self.inner.ledger.lock_tenant(tenant_id)).await?;

        if let Some(existing) = tenant.find(kind, Some(resource_path)) {
            tracing::debug!(
                tenant_id = %tenant_id,
                subscription_id = %existing.id,
                "Subscription for {} already registered",
                kind
            );
            return Ok(true);
        }

        let Some(credential) = self.credential_for(tenant_id) else {
            return Ok(false);
        };

        let Some(requested_expiration) = self.requested_expiration(tenant_id) else {
            return Ok(false);
        };
        let request = CreateSubscriptionRequest {
            change_type: ChangeType::Created,
            notification_url: self.inner.notification_url.to_string(),
            resource: resource_path.to_string(),
            client_state: self.inner.client_state.as_str().to_string(),
            expiration: requested_expiration,
        };

        let created = cancelable(
            cancel,
            self.inner.client.create_subscription(&credential, &request),
        )
        .await?;

        match created {
            Ok(remote) => {
                let record = SubscriptionRecord::new(
                    remote.id,
                    tenant_id,
                    kind,
                    resource_path,
                    remote.expiration.unwrap_or(requested_expiration),
                );
                tracing::info!(
                    tenant_id = %tenant_id,
                    subscription_id = %record.id,
                    expiration = %record.expiration,
                    "Registered subscription for resource {}",
                    kind
                );
                tenant.insert(record);
                Ok(true)
            }
            Err(e) => {
                tracing::error!(
                    tenant_id = %tenant_id,
                    "Error while registering subscription for {}: {}",
                    kind,
                    e
                );
                Ok(false)
            }
        }
    }

    /// Remove the tenant's subscription for a resource kind.
    ///
    /// A tenant with no subscriptions at all counts as success without any
    /// remote call; a known tenant without a subscription of that kind does
    /// not.
    pub async fn remove(
        &self,
        tenant_id: TenantId,
        kind: ResourceKind,
        cancel: &CancellationToken,
    ) -> Result<bool, OperationCanceled> {
        let Some(tenant) = cancelable(cancel, self.inner.ledger.lock_existing(tenant_id)).await?
        else {
            tracing::debug!(
                tenant_id = %tenant_id,
                "Cannot remove {} subscription: tenant has no known subscriptions",
                kind
            );
            return Ok(true);
        };

        let Some(record) = tenant.find(kind, None).cloned() else {
            tracing::warn!(
                tenant_id = %tenant_id,
                "Cannot remove subscription: {}",
                BrokerError::SubscriptionNotFound { tenant_id, kind }
            );
            return Ok(false);
        };

        self.delete_record(tenant, &record.id, cancel).await
    }

    /// Remove one subscription by id. Used for shutdown cleanup.
    pub async fn remove_subscription(
        &self,
        tenant_id: TenantId,
        subscription_id: &SubscriptionId,
        cancel: &CancellationToken,
    ) -> Result<bool, OperationCanceled> {
        let Some(tenant) = cancelable(cancel, self.inner.ledger.lock_existing(tenant_id)).await?
        else {
            return Ok(true);
        };
        if tenant.find_by_id(subscription_id).is_none() {
            return Ok(true);
        }

        self.delete_record(tenant, subscription_id, cancel).await
    }

    async fn delete_record(
        &self,
        mut tenant: TenantGuard,
        subscription_id: &SubscriptionId,
        cancel: &CancellationToken,
    ) -> Result<bool, OperationCanceled> {
        let tenant_id = tenant.tenant_id();
        let Some(credential) = self.credential_for(tenant_id) else {
            return Ok(false);
        };

        tracing::info!(
            tenant_id = %tenant_id,
            subscription_id = %subscription_id,
            "Removing subscription"
        );

        let deleted = cancelable(
            cancel,
            self.inner.client.delete_subscription(&credential, subscription_id),
        )
        .await?;

        match deleted {
            Ok(()) => {
                tenant.remove(subscription_id);
                Ok(true)
            }
            Err(e) => {
                tracing::error!(
                    tenant_id = %tenant_id,
                    subscription_id = %subscription_id,
                    "Error while removing subscription: {}",
                    e
                );
                Ok(false)
            }
        }
    }

    /// Extend a subscription by another full lifetime.
    ///
    /// Returns `Ok(false)` if the record no longer exists or the platform
    /// refused; the stored expiration is then unchanged.
    pub async fn renew(
        &self,
        tenant_id: TenantId,
        subscription_id: &SubscriptionId,
        cancel: &CancellationToken,
    ) -> Result<bool, OperationCanceled> {
        let outcome = self.try_renew(tenant_id, subscription_id, cancel).await?;
        Ok(outcome == RenewOutcome::Renewed)
    }

    /// Like [`renew`](Self::renew), but tells a record that disappeared
    /// apart from one the platform refused to extend.
    pub async fn try_renew(
        &self,
        tenant_id: TenantId,
        subscription_id: &SubscriptionId,
        cancel: &CancellationToken,
    ) -> Result<RenewOutcome, OperationCanceled> {
        let Some(mut tenant) =
            cancelable(cancel, self.inner.ledger.lock_existing(tenant_id)).await?
        else {
            return Ok(RenewOutcome::Missing);
        };
        if tenant.find_by_id(subscription_id).is_none() {
            return Ok(RenewOutcome::Missing);
        }

        let Some(credential) = self.credential_for(tenant_id) else {
            return Ok(RenewOutcome::Failed);
        };

        let Some(requested_expiration) = self.requested_expiration(tenant_id) else {
            return Ok(RenewOutcome::Failed);
        };
        let renewed = cancelable(
            cancel,
            self.inner.client.renew_subscription(
                &credential,
                subscription_id,
                requested_expiration,
            ),
        )
        .await?;

        match renewed {
            Ok(remote) => {
                let expiration = remote.expiration.unwrap_or(requested_expiration);
                tenant.update_expiration(subscription_id, expiration);
                tracing::info!(
                    tenant_id = %tenant_id,
                    subscription_id = %subscription_id,
                    expiration = %expiration,
                    "Renewed subscription"
                );
                Ok(RenewOutcome::Renewed)
            }
            Err(e) => {
                tracing::error!(
                    tenant_id = %tenant_id,
                    subscription_id = %subscription_id,
                    "Error while renewing subscription: {}",
                    e
                );
                Ok(RenewOutcome::Failed)
            }
        }
    }

    /// Copy of every active subscription, grouped by tenant.
    pub async fn subscriptions(&self) -> Vec<(TenantId, Vec<SubscriptionRecord>)> {
        self.inner.ledger.snapshot().await
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("ledger", &self.inner.ledger)
            .field("credentials", &self.inner.credentials)
            .field("notification_url", &self.inner.notification_url.as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancelable_passes_output_through() {
        let cancel = CancellationToken::new();
        assert_eq!(cancelable(&cancel, async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_cancelable_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = cancelable(&cancel, async { 7 }).await;
        assert_eq!(result, Err(OperationCanceled));
    }

    #[tokio::test]
    async fn test_cancelable_interrupts_pending_future() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = cancelable(&cancel, std::future::pending::<()>()).await;
        assert_eq!(result, Err(OperationCanceled));
    }
}

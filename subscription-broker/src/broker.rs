//! Main WebhookBroker implementation
//!
//! The broker owns every piece of shared state: the credential registry, the
//! subscription ledger, the per-process client state, the event bus and the
//! call-record store. It wires them into the subscription manager, the
//! notification processor, the renewal scheduler and the call-record
//! observer, and tears them down in order on shutdown.

use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::call_records::{CallRecordObserver, CallRecordStore};
use crate::config::BrokerConfig;
use crate::credentials::{Credential, CredentialRegistry};
use crate::error::{OperationCanceled, Result};
use crate::events::EventBus;
use crate::ledger::SubscriptionLedger;
use crate::manager::SubscriptionManager;
use crate::notification::{NotificationOutcome, NotificationProcessor};
use crate::remote::DirectoryClient;
use crate::renewal::{RenewalHandle, RenewalScheduler};
use crate::types::{ApplicationId, ClientState, ResourceKind, TenantId};

/// Composition root of the webhook service.
pub struct WebhookBroker {
    config: BrokerConfig,
    handle: BrokerHandle,
    bus: EventBus,
    renewal: Option<RenewalHandle>,
    observer: Option<JoinHandle<()>>,
}

impl WebhookBroker {
    /// Create a broker with a freshly generated client state.
    pub fn new(config: BrokerConfig, client: Arc<dyn DirectoryClient>) -> Result<Self> {
        Self::with_client_state(config, client, ClientState::generate())
    }

    pub fn with_client_state(
        config: BrokerConfig,
        client: Arc<dyn DirectoryClient>,
        client_state: ClientState,
    ) -> Result<Self> {
        config.validate()?;

        let credentials = CredentialRegistry::new();
        let bus = EventBus::new();
        let manager = SubscriptionManager::new(
            &config,
            SubscriptionLedger::new(),
            credentials.clone(),
            client,
            client_state.clone(),
        )?;

        let handle = BrokerHandle {
            manager,
            processor: NotificationProcessor::new(client_state, bus.clone()),
            store: CallRecordStore::new(config.call_record_capacity),
            shutdown: CancellationToken::new(),
        };

        tracing::debug!(
            notification_url = %handle.manager.notification_url(),
            "Created webhook broker"
        );

        Ok(Self {
            config,
            handle,
            bus,
            renewal: None,
            observer: None,
        })
    }

    /// Start the renewal scheduler and the call-record observer.
    ///
    /// Calling this more than once has no further effect.
    pub fn start(&mut self) {
        if self.renewal.is_some() {
            return;
        }

        let scheduler =
            RenewalScheduler::new(self.handle.manager.clone(), self.config.renewal_interval);
        self.renewal = Some(scheduler.start());

        let observer = CallRecordObserver::new(
            self.handle.store.clone(),
            self.handle.manager.credentials().clone(),
            Arc::clone(self.handle.manager.client()),
        );
        self.observer = Some(observer.spawn(&self.bus, self.handle.shutdown.child_token()));

        tracing::info!("Webhook broker started");
    }

    /// A cloneable handle for request handlers.
    pub fn handle(&self) -> BrokerHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn manager(&self) -> &SubscriptionManager {
        &self.handle.manager
    }

    /// Shut down the broker.
    ///
    /// In-flight operations started through a [`BrokerHandle`] are canceled,
    /// the renewal scheduler is stopped and awaited, and then every remaining
    /// subscription is removed from the remote platform on a best-effort
    /// basis.
    pub async fn shutdown(mut self) -> Result<()> {
        tracing::info!("Shutting down webhook broker");
        self.handle.shutdown.cancel();

        let mut result = Ok(());
        if let Some(renewal) = self.renewal.take() {
            if let Err(e) = renewal.shutdown(self.config.shutdown_timeout).await {
                tracing::warn!("Error during renewal shutdown: {}", e);
                result = Err(e);
            }
        }

        if let Some(observer) = self.observer.take() {
            if timeout(self.config.shutdown_timeout, observer).await.is_err() {
                tracing::warn!("Call record observer did not stop in time");
            }
        }

        self.remove_all_subscriptions().await;

        tracing::info!("Webhook broker shutdown complete");
        result
    }

    async fn remove_all_subscriptions(&self) {
        let manager = &self.handle.manager;
        let snapshot = manager.subscriptions().await;
        if snapshot.is_empty() {
            return;
        }

        tracing::info!("Removing subscriptions");
        let cleanup_token = CancellationToken::new();
        let cleanup = &cleanup_token;
        let removals = snapshot.iter().flat_map(move |(tenant_id, records)| {
            records
                .iter()
                .map(move |record| manager.remove_subscription(*tenant_id, &record.id, cleanup))
        });

        match timeout(self.config.shutdown_timeout, join_all(removals)).await {
            Ok(results) => {
                let failed = results.iter().filter(|r| !matches!(r, Ok(true))).count();
                if failed > 0 {
                    tracing::warn!("{} subscription(s) could not be removed", failed);
                }
            }
            Err(_) => tracing::warn!("Timed out removing subscriptions"),
        }
    }
}

impl Drop for WebhookBroker {
    fn drop(&mut self) {
        self.handle.shutdown.cancel();
    }
}

impl std::fmt::Debug for WebhookBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookBroker")
            .field("config", &self.config)
            .field("started", &self.renewal.is_some())
            .finish()
    }
}

/// Cloneable access to the broker for request handlers.
///
/// Operations started through a handle are canceled when the broker shuts
/// down and then return [`OperationCanceled`].
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    manager: SubscriptionManager,
    processor: NotificationProcessor,
    store: CallRecordStore,
    shutdown: CancellationToken,
}

impl BrokerHandle {
    /// Add a credential if the pair is not yet known.
    pub fn add_credential(
        &self,
        application_id: ApplicationId,
        tenant_id: TenantId,
        secret: impl Into<String>,
    ) -> Arc<Credential> {
        self.manager
            .credentials()
            .add(application_id, tenant_id, secret)
    }

    pub fn has_credential(&self, tenant_id: TenantId) -> bool {
        self.manager.credentials().first_for_tenant(tenant_id).is_some()
    }

    pub async fn register(
        &self,
        tenant_id: TenantId,
        kind: ResourceKind,
        resource_path: &str,
    ) -> std::result::Result<bool, OperationCanceled> {
        self.manager
            .register(tenant_id, kind, resource_path, &self.shutdown)
            .await
    }

    pub async fn remove(
        &self,
        tenant_id: TenantId,
        kind: ResourceKind,
    ) -> std::result::Result<bool, OperationCanceled> {
        self.manager.remove(tenant_id, kind, &self.shutdown).await
    }

    pub fn process_notification(
        &self,
        validation_token: Option<&str>,
        body: &[u8],
    ) -> NotificationOutcome {
        self.processor.process(validation_token, body)
    }

    pub fn call_records(&self) -> &CallRecordStore {
        &self.store
    }

    pub fn manager(&self) -> &SubscriptionManager {
        &self.manager
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

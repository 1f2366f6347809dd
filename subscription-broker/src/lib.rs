//! # subscription-broker
//!
//! Push-subscription lifecycle for call-record change notifications.
//!
//! The crate registers webhook subscriptions with the remote platform on
//! behalf of tenants, renews them before they lapse, validates inbound
//! notification envelopes and republishes accepted entries as typed
//! [`ChangeEvent`]s on an in-process [`EventBus`].
//!
//! The remote platform is reached through the [`DirectoryClient`] trait; the
//! `graph-client` crate provides the Microsoft Graph implementation.
//!
//! ```no_run
//! use std::sync::Arc;
//! use subscription_broker::{BrokerConfig, DirectoryClient, WebhookBroker};
//!
//! # async fn example(client: Arc<dyn DirectoryClient>) -> subscription_broker::Result<()> {
//! let config = BrokerConfig::new().with_public_endpoint("https://hooks.example.com/");
//! let mut broker = WebhookBroker::new(config, client)?;
//! broker.start();
//!
//! let handle = broker.handle();
//! // hand `handle` to the HTTP layer ...
//!
//! broker.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod call_records;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod ledger;
pub mod manager;
pub mod notification;
pub mod remote;
pub mod renewal;
pub mod types;

pub use broker::{BrokerHandle, WebhookBroker};
pub use call_records::{CallRecord, CallRecordObserver, CallRecordStore};
pub use config::{BrokerConfig, NOTIFICATION_ROUTE};
pub use credentials::{Credential, CredentialRegistry};
pub use error::{BrokerError, ConfigError, OperationCanceled, RemoteError, Result, ValidationError};
pub use events::{ChangeEvent, EventBus, EventFilter, EventSubscription};
pub use ledger::{SubscriptionLedger, TenantGuard};
pub use manager::{RenewOutcome, SubscriptionManager};
pub use notification::{
    ChangeNotification, EntryRejection, NotificationOutcome, NotificationProcessor,
    ProcessingReport, ResourceData,
};
pub use remote::{CreateSubscriptionRequest, DirectoryClient, RemoteSubscription};
pub use renewal::{RenewalHandle, RenewalReport, RenewalScheduler};
pub use types::{
    ApplicationId, ChangeType, ClientState, ResourceId, ResourceKind, SubscriptionId,
    SubscriptionRecord, TenantId, UnknownResourceKind,
};

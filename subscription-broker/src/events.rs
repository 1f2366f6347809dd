//! In-process event bus for resource change events.
//!
//! The notification processor publishes a [`ChangeEvent`] for every accepted
//! notification entry. Consumers subscribe with an [`EventFilter`] and receive
//! matching events on their own unbounded channel, so a slow consumer never
//! holds up delivery to the others or the HTTP request that triggered it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::types::{ChangeType, ResourceId, ResourceKind, TenantId};

/// A change reported by the remote platform for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub change: ChangeType,
    pub kind: ResourceKind,
    pub tenant_id: TenantId,
    pub resource_id: ResourceId,
}

/// Selects which events a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    ByChange(ChangeType),
    ByKind(ResourceKind),
}

impl EventFilter {
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::ByChange(change) => event.change == *change,
            EventFilter::ByKind(kind) => event.kind == *kind,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug)]
pub struct EventSubscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl EventSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next matching event.
    ///
    /// Returns `None` once the subscription has been removed from the bus.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }
}

struct Subscriber {
    filter: EventFilter,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

/// Fan-out of change events to any number of subscribers.
///
/// Cloning the bus yields another handle to the same subscriber set.
///
/// # Example
///
/// ```
/// use subscription_broker::events::{ChangeEvent, EventBus, EventFilter};
/// use subscription_broker::types::{ChangeType, ResourceId, ResourceKind, TenantId};
/// use uuid::Uuid;
///
/// let bus = EventBus::new();
/// let mut created = bus.subscribe(EventFilter::ByChange(ChangeType::Created));
///
/// let reached = bus.publish(ChangeEvent {
///     change: ChangeType::Created,
///     kind: ResourceKind::CallRecord,
///     tenant_id: TenantId::new(Uuid::new_v4()),
///     resource_id: ResourceId::new(Uuid::new_v4()),
/// });
///
/// assert_eq!(reached, 1);
/// assert!(created.try_recv().is_some());
/// ```
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<DashMap<u64, Subscriber>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, filter: EventFilter) -> EventSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, Subscriber { filter, sender });
        tracing::debug!(subscriber_id = id, "Event subscriber added");
        EventSubscription { id, receiver }
    }

    /// Remove a subscriber. Its receiver drains and then yields `None`.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber_id = id, "Event subscriber removed");
        }
        removed
    }

    /// Deliver an event to every matching subscriber.
    ///
    /// Returns how many subscribers received it. Subscribers whose receiver
    /// was dropped are removed.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let mut delivered = 0;
        self.subscribers.retain(|_, subscriber| {
            if !subscriber.filter.matches(&event) {
                return !subscriber.sender.is_closed();
            }
            match subscriber.sender.send(event) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });

        tracing::trace!(
            change = %event.change,
            kind = %event.kind,
            resource_id = %event.resource_id,
            delivered,
            "Published change event"
        );
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use uuid::Uuid;

    fn event(change: ChangeType, kind: ResourceKind) -> ChangeEvent {
        ChangeEvent {
            change,
            kind,
            tenant_id: TenantId::new(Uuid::new_v4()),
            resource_id: ResourceId::new(Uuid::new_v4()),
        }
    }

    #[rstest]
    #[case(EventFilter::All, ChangeType::Deleted, ResourceKind::User, true)]
    #[case(EventFilter::ByChange(ChangeType::Created), ChangeType::Created, ResourceKind::CallRecord, true)]
    #[case(EventFilter::ByChange(ChangeType::Created), ChangeType::Updated, ResourceKind::CallRecord, false)]
    #[case(EventFilter::ByKind(ResourceKind::CallRecord), ChangeType::Deleted, ResourceKind::CallRecord, true)]
    #[case(EventFilter::ByKind(ResourceKind::CallRecord), ChangeType::Created, ResourceKind::Group, false)]
    fn test_filter_matching(
        #[case] filter: EventFilter,
        #[case] change: ChangeType,
        #[case] kind: ResourceKind,
        #[case] expected: bool,
    ) {
        assert_eq!(filter.matches(&event(change, kind)), expected);
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscribers_only() {
        let bus = EventBus::new();
        let mut all = bus.subscribe(EventFilter::All);
        let mut deleted = bus.subscribe(EventFilter::ByChange(ChangeType::Deleted));

        let created = event(ChangeType::Created, ResourceKind::CallRecord);
        assert_eq!(bus.publish(created), 1);

        assert_eq!(all.recv().await, Some(created));
        assert!(deleted.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_receiver() {
        let bus = EventBus::new();
        let mut subscription = bus.subscribe(EventFilter::All);

        assert!(bus.unsubscribe(subscription.id()));
        assert!(!bus.unsubscribe(subscription.id()));
        assert_eq!(bus.publish(event(ChangeType::Created, ResourceKind::CallRecord)), 0);
        assert_eq!(subscription.recv().await, None);
    }

    #[test]
    fn test_dropped_receivers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe(EventFilter::All);
        let dropped = bus.subscribe(EventFilter::ByKind(ResourceKind::User));
        drop(dropped);

        bus.publish(event(ChangeType::Created, ResourceKind::CallRecord));
        assert_eq!(bus.subscriber_count(), 1);
        drop(kept);
    }

    #[test]
    fn test_subscription_ids_are_unique() {
        let bus = EventBus::new();
        let a = bus.subscribe(EventFilter::All);
        let b = bus.subscribe(EventFilter::All);
        assert_ne!(a.id(), b.id());
    }
}

//! Notification delivery to subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::model::{Binding, Term};
use crate::overlay::PeerId;
use crate::{Error, Result};
use super::subscription::{SubscriberRef, SubscriptionId};

/// One solution of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub subscription: SubscriptionId,
    /// Graph of the event that completed the solution.
    pub graph: Term,
    pub binding: Binding,
    /// Peer that assembled the solution.
    pub source: PeerId,
    pub delivered_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(subscription: SubscriptionId, graph: Term, binding: Binding, source: PeerId) -> Self {
        Self { subscription, graph, binding, source, delivered_at: Utc::now() }
    }
}

/// Receives the notifications of the subscriptions it was registered for.
#[async_trait]
pub trait NotificationListener: Send + Sync + 'static {
    async fn on_notification(&self, notification: Notification) -> Result<()>;
}

/// Forwards notifications into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl NotificationListener for ChannelListener {
    async fn on_notification(&self, notification: Notification) -> Result<()> {
        self.sender
            .send(notification)
            .map_err(|e| Error::NotificationError(format!("receiver dropped for {}", e.0.subscription)))
    }
}

/// Resolves subscriber references to listeners.
///
/// Shared by every peer of an overlay: whichever peer completes a solution
/// delivers it directly.
#[derive(Default)]
pub struct SubscriberDirectory {
    listeners: RwLock<HashMap<SubscriberRef, Arc<dyn NotificationListener>>>,
    delivered: RwLock<HashMap<SubscriptionId, u64>>,
    next: AtomicU64,
}

impl SubscriberDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn NotificationListener>) -> SubscriberRef {
        let subscriber = SubscriberRef(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        self.listeners.write().insert(subscriber, listener);
        subscriber
    }

    /// Returns `false` if the subscriber was not registered.
    pub fn unregister(&self, subscriber: SubscriberRef) -> bool {
        self.listeners.write().remove(&subscriber).is_some()
    }

    pub fn is_registered(&self, subscriber: SubscriberRef) -> bool {
        self.listeners.read().contains_key(&subscriber)
    }

    pub async fn deliver(&self, subscriber: SubscriberRef, notification: Notification) -> Result<()> {
        let listener = self.listeners.read().get(&subscriber).cloned();
        let Some(listener) = listener else {
            return Err(Error::NotificationError(format!(
                "no listener for subscriber {} of {}",
                subscriber.0, notification.subscription
            )));
        };
        let subscription = notification.subscription;
        listener.on_notification(notification).await?;
        *self.delivered.write().entry(subscription).or_insert(0) += 1;
        Ok(())
    }

    /// Notifications delivered so far for `subscription`.
    pub fn delivered(&self, subscription: SubscriptionId) -> u64 {
        self.delivered.read().get(&subscription).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(id: u64) -> Notification {
        Notification::new(SubscriptionId(id), Term::iri("urn:g"), Binding::new(), PeerId(1))
    }

    #[tokio::test]
    async fn test_deliver_through_channel() {
        let directory = SubscriberDirectory::new();
        let (listener, mut rx) = ChannelListener::new();
        let subscriber = directory.register(Arc::new(listener));

        directory.deliver(subscriber, notification(3)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().subscription, SubscriptionId(3));
        assert_eq!(directory.delivered(SubscriptionId(3)), 1);
    }

    #[tokio::test]
    async fn test_unknown_or_closed_subscriber_fails() {
        let directory = SubscriberDirectory::new();
        let err = directory.deliver(SubscriberRef(42), notification(1)).await.unwrap_err();
        assert!(matches!(err, Error::NotificationError(_)));

        let (listener, rx) = ChannelListener::new();
        let subscriber = directory.register(Arc::new(listener));
        drop(rx);
        assert!(directory.deliver(subscriber, notification(1)).await.is_err());
        assert_eq!(directory.delivered(SubscriptionId(1)), 0);

        assert!(directory.unregister(subscriber));
        assert!(!directory.is_registered(subscriber));
    }
}

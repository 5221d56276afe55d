//! # Publish/Subscribe
//!
//! Continuous SPARQL queries over published quadruples.
//!
//! A subscription is decomposed into sub-subscriptions, each indexed on
//! the peers whose zones intersect its region. A published quadruple is
//! stored at the peer owning its coordinate, which matches it against its
//! index. A single-pattern subscription is notified at once. Otherwise a
//! partial match is recorded and the join is assembled once every pattern
//! has matched within the same event graph.

pub mod subscription;
pub mod matcher;
pub mod index;
pub mod notification;
pub(crate) mod protocol;
pub(crate) mod assembly;

pub use subscription::{SubSubscription, SubscriberRef, Subscription, SubscriptionId, SubscriptionState};
pub use matcher::match_quadruple;
pub use index::{PartialBinding, PartialStore, SubscriptionIndex};
pub use notification::{ChannelListener, Notification, NotificationListener, SubscriberDirectory};

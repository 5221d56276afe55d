//! Remote invocation: `send(peer, envelope) -> response`.

use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};

use crate::routing::{Envelope, Response};
use crate::{Error, Result};
use super::PeerId;

/// What a peer's inbox carries: the envelope and where to send the outcome.
pub type Inbound = (Envelope, oneshot::Sender<Result<Response>>);

/// Delivers an envelope to a peer and awaits its response.
///
/// Implementations perform no retries. An unknown or stopped peer is
/// reported as `Error::Unreachable`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, to: PeerId, envelope: Envelope) -> Result<Response>;
}

/// In-process transport over tokio channels.
#[derive(Clone, Default)]
pub struct LocalTransport {
    inboxes: Arc<RwLock<HashMap<PeerId, mpsc::UnboundedSender<Inbound>>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the inbox of `peer`. Envelopes sent before the receiver is
    /// drained are queued.
    pub fn register(&self, peer: PeerId) -> mpsc::UnboundedReceiver<Inbound> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inboxes.write().insert(peer, sender);
        receiver
    }

    /// Makes `peer` unreachable. Returns whether it was registered.
    pub fn unregister(&self, peer: PeerId) -> bool {
        self.inboxes.write().remove(&peer).is_some()
    }

    pub fn is_registered(&self, peer: PeerId) -> bool {
        self.inboxes.read().contains_key(&peer)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, to: PeerId, envelope: Envelope) -> Result<Response> {
        let inbox = self.inboxes.read().get(&to).cloned();
        let inbox = inbox.ok_or(Error::Unreachable(to))?;
        let (reply, response) = oneshot::channel();
        inbox.send((envelope, reply)).map_err(|_| Error::Unreachable(to))?;
        response.await.map_err(|_| Error::Unreachable(to))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{MessageId, Operation, Reply, Routing};

    fn envelope() -> Envelope {
        Envelope::new(MessageId { origin: PeerId::CLIENT, sequence: 1 }, Routing::Direct, Operation::Lookup)
    }

    #[tokio::test]
    async fn test_send_to_registered_peer() {
        let transport = LocalTransport::new();
        let mut inbox = transport.register(PeerId(1));
        tokio::spawn(async move {
            while let Some((_, reply)) = inbox.recv().await {
                let _ = reply.send(Ok(Response::delivered(PeerId(1), Reply::Peer(PeerId(1)), 0)));
            }
        });
        let response = transport.send(PeerId(1), envelope()).await.unwrap();
        assert!(matches!(response.reply, Reply::Peer(PeerId(1))));
    }

    #[tokio::test]
    async fn test_unregistered_peer_is_unreachable() {
        let transport = LocalTransport::new();
        let _inbox = transport.register(PeerId(1));
        assert!(transport.unregister(PeerId(1)));
        let err = transport.send(PeerId(1), envelope()).await.unwrap_err();
        assert!(matches!(err, Error::Unreachable(PeerId(1))));
    }
}

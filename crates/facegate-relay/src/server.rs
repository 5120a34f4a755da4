//! Broadcast relay: a websocket fan-out switch.
//!
//! Every text or binary message from one subscriber is forwarded verbatim to
//! every other connected subscriber. No history, no authentication. Each
//! subscriber has a small outbound queue; while it is full, messages for
//! that subscriber are dropped.

use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

/// Outbound messages buffered per subscriber.
pub const SUBSCRIBER_QUEUE: usize = 16;

/// Registry of connected subscribers.
#[derive(Default)]
pub struct Hub {
    subscribers: RwLock<HashMap<Uuid, mpsc::Sender<Message>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and get the receiving end of its outbound queue.
    pub async fn register(&self) -> (Uuid, mpsc::Receiver<Message>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        self.subscribers.write().await.insert(id, tx);
        (id, rx)
    }

    pub async fn unregister(&self, id: &Uuid) {
        self.subscribers.write().await.remove(id);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Queue `message` for every subscriber except `from`. Returns the number of recipients.
    ///
    /// Subscribers whose queue is full miss this message.
    pub async fn forward(&self, from: &Uuid, message: &Message) -> usize {
        let subscribers = self.subscribers.read().await;
        let mut delivered = 0;
        for (id, tx) in subscribers.iter() {
            if id == from {
                continue;
            }
            match tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(subscriber = %id, "subscriber queue full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }
}

pub struct BroadcastRelay {
    listener: TcpListener,
    hub: Arc<Hub>,
}

impl BroadcastRelay {
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            hub: Arc::new(Hub::new()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> Arc<Hub> {
        Arc::clone(&self.hub)
    }

    /// Accept subscribers until the listener fails.
    pub async fn run(self) -> std::io::Result<()> {
        tracing::info!(addr = %self.listener.local_addr()?, "broadcast relay listening");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            tokio::spawn(serve_subscriber(Arc::clone(&self.hub), stream, peer));
        }
    }
}

async fn serve_subscriber(hub: Arc<Hub>, stream: TcpStream, peer: SocketAddr) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(%peer, error = %e, "websocket handshake failed");
            return;
        }
    };
    let (mut sink, mut incoming) = ws.split();
    let (id, mut outbound) = hub.register().await;
    tracing::info!(%peer, subscriber = %id, "subscriber connected");

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = incoming.next().await {
        match message {
            Ok(message @ (Message::Text(_) | Message::Binary(_))) => {
                let recipients = hub.forward(&id, &message).await;
                tracing::trace!(subscriber = %id, recipients, "forwarded");
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(subscriber = %id, error = %e, "subscriber read failed");
                break;
            }
        }
    }

    hub.unregister(&id).await;
    writer.abort();
    tracing::info!(%peer, subscriber = %id, "subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forward_skips_sender() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.register().await;
        let (_b, mut rx_b) = hub.register().await;
        let (_c, mut rx_c) = hub.register().await;

        let sent = hub.forward(&a, &Message::Text("hello".into())).await;
        assert_eq!(sent, 2);
        assert_eq!(rx_b.recv().await, Some(Message::Text("hello".into())));
        assert_eq!(rx_c.recv().await, Some(Message::Text("hello".into())));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stalled_subscriber_queue_is_bounded() {
        let hub = Hub::new();
        let (a, _rx_a) = hub.register().await;
        let (_slow, mut rx_slow) = hub.register().await;

        let mut delivered = 0;
        for i in 0..(SUBSCRIBER_QUEUE * 4) {
            delivered += hub.forward(&a, &Message::Text(format!("event-{i}"))).await;
        }
        assert_eq!(delivered, SUBSCRIBER_QUEUE);

        let mut queued = Vec::new();
        while let Ok(message) = rx_slow.try_recv() {
            queued.push(message);
        }
        assert_eq!(queued.len(), SUBSCRIBER_QUEUE);
        assert_eq!(queued[0], Message::Text("event-0".into()));

        // Once drained it receives again.
        assert_eq!(hub.forward(&a, &Message::Text("fresh".into())).await, 1);
        assert_eq!(rx_slow.recv().await, Some(Message::Text("fresh".into())));
    }

    #[tokio::test]
    async fn test_unregister_removes_subscriber() {
        let hub = Hub::new();
        let (a, _rx_a) = hub.register().await;
        let (b, _rx_b) = hub.register().await;
        hub.unregister(&b).await;
        assert_eq!(hub.subscriber_count().await, 1);
        assert_eq!(hub.forward(&a, &Message::Binary(vec![1, 2])).await, 0);
    }
}

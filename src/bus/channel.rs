use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::trace;

use super::{BusError, BusResult, Envelope, EventBus};

/// In-process bus over a tokio broadcast channel.
///
/// Slow subscribers lag and lose the oldest messages instead of blocking the
/// publisher. Publishing with no subscribers is not an error.
#[derive(Debug)]
pub struct ChannelBus {
    tx: broadcast::Sender<Envelope>,
    closed: AtomicBool,
}

impl ChannelBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, closed: AtomicBool::new(false) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Refuse further publishes; they fail with `BusError::Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventBus for ChannelBus {
    async fn publish(&self, envelope: Envelope) -> BusResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed(envelope.topic));
        }
        let receivers = self.tx.send(envelope).unwrap_or(0);
        trace!(receivers, "Published event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = ChannelBus::new(8);
        let env = Envelope { topic: "t".into(), payload: "{}".into() };
        assert!(bus.publish(env).await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_bus_rejects() {
        let bus = ChannelBus::new(8);
        let mut rx = bus.subscribe();
        bus.close();
        let env = Envelope { topic: "t".into(), payload: "{}".into() };
        assert!(matches!(bus.publish(env.clone()).await, Err(BusError::Closed(_))));
        bus.reopen();
        bus.publish(env.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), env);
    }
}

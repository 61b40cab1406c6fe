use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::bus::{BusResult, Envelope, EventBus, Topics};
use crate::engine::types::{MatchResult, OrderRecord};

/// Wraps the bus with the engine's delivery policy.
///
/// Intake publishes are reported to the caller. Match and cancel events are
/// emitted after the book has already changed, so a failed publish is parked
/// in an undelivered buffer for `redeliver` instead of failing the request.
/// The buffer is bounded; past `capacity` the oldest parked events are dropped.
pub struct Publisher {
    bus: Arc<dyn EventBus>,
    topics: Topics,
    undelivered: Mutex<VecDeque<Envelope>>,
    capacity: usize,
}

pub const DEFAULT_UNDELIVERED_CAPACITY: usize = 10_000;

impl Publisher {
    pub fn new(bus: Arc<dyn EventBus>, topics: Topics) -> Self {
        Self {
            bus,
            topics,
            undelivered: Mutex::new(VecDeque::new()),
            capacity: DEFAULT_UNDELIVERED_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub async fn publish_intake(&self, order: &OrderRecord) -> BusResult<()> {
        let envelope = Envelope::encode(&self.topics.intake, order)?;
        self.bus.publish(envelope).await
    }

    pub async fn emit(&self, result: &MatchResult) {
        let envelope = match Envelope::encode(&self.topics.matches, result) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, node = %result.node.node_name(), "Dropping unencodable match event");
                return;
            }
        };
        if let Err(e) = self.bus.publish(envelope.clone()).await {
            warn!(error = %e, topic = %envelope.topic, "Match event not delivered, parked for redelivery");
            metrics::counter!("lobx_events_undelivered_total").increment(1);
            let mut parked = self.undelivered.lock();
            parked.push_back(envelope);
            self.shed(&mut parked);
        }
    }

    fn shed(&self, parked: &mut VecDeque<Envelope>) {
        let excess = parked.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }
        parked.drain(..excess);
        warn!(dropped = excess, capacity = self.capacity, "Undelivered buffer full, dropped oldest events");
        metrics::counter!("lobx_events_dropped_total").increment(excess as u64);
    }

    /// Retry parked events oldest first. Stops at the first failure, leaving it
    /// and everything after it parked.
    pub async fn redeliver(&self) -> BusResult<usize> {
        let mut sent = 0;
        loop {
            let next = self.undelivered.lock().pop_front();
            let Some(envelope) = next else {
                return Ok(sent);
            };
            if let Err(e) = self.bus.publish(envelope.clone()).await {
                let mut parked = self.undelivered.lock();
                parked.push_front(envelope);
                self.shed(&mut parked);
                return Err(e);
            }
            sent += 1;
        }
    }

    pub fn undelivered(&self) -> usize {
        self.undelivered.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ChannelBus;
    use crate::engine::types::Side;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_failed_emit_is_parked_then_redelivered() {
        let bus = Arc::new(ChannelBus::new(16));
        let mut rx = bus.subscribe();
        let publisher = Publisher::new(bus.clone(), Topics::default());
        let order = OrderRecord::cancel("c1", "o1", "eth2usdt", Side::Sale, dec!(2));

        bus.close();
        publisher.emit(&MatchResult::cancelled(&order)).await;
        assert_eq!(publisher.undelivered(), 1);
        assert!(publisher.redeliver().await.is_err());
        assert_eq!(publisher.undelivered(), 1);

        bus.reopen();
        assert_eq!(publisher.redeliver().await.unwrap(), 1);
        assert_eq!(publisher.undelivered(), 0);
        let env = rx.recv().await.unwrap();
        assert_eq!(env.topic, "matchOrder");
        assert!(env.decode::<MatchResult>().unwrap().is_cancel());
    }

    #[tokio::test]
    async fn test_full_buffer_drops_oldest() {
        let bus = Arc::new(ChannelBus::new(16));
        let mut rx = bus.subscribe();
        let publisher = Publisher::new(bus.clone(), Topics::default()).with_capacity(2);

        bus.close();
        for id in ["o1", "o2", "o3"] {
            let order = OrderRecord::cancel("c1", id, "eth2usdt", Side::Buy, dec!(1));
            publisher.emit(&MatchResult::cancelled(&order)).await;
        }
        assert_eq!(publisher.undelivered(), 2);

        bus.reopen();
        assert_eq!(publisher.redeliver().await.unwrap(), 2);
        let first: MatchResult = rx.recv().await.unwrap().decode().unwrap();
        let second: MatchResult = rx.recv().await.unwrap().decode().unwrap();
        assert_eq!(first.node.order_id, "o2");
        assert_eq!(second.node.order_id, "o3");
    }
}

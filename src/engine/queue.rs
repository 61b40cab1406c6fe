//! Price-level FIFO backed by the shared store.
//!
//! Queue order is arrival order: `peek_front` always yields the earliest
//! surviving insertion no matter how many removals or in-place updates happened.

use rust_decimal::Decimal;
use tracing::{debug, trace};

use crate::engine::keys;
use crate::engine::types::{OrderRecord, Side};
use crate::store::codec::{record_from_bytes, record_to_bytes};
use crate::store::{BookStore, StoreResult};

/// Transient handle on one price level; holds no state besides its key.
pub struct PriceLevelQueue<'a> {
    store: &'a dyn BookStore,
    key: String,
}

impl<'a> PriceLevelQueue<'a> {
    pub fn new(store: &'a dyn BookStore, symbol: &str, side: Side, price: Decimal) -> Self {
        Self { store, key: keys::queue_key(symbol, side, price) }
    }

    /// Handle on the level `order` rests (or would rest) on.
    pub fn for_order(store: &'a dyn BookStore, order: &OrderRecord) -> Self {
        Self { store, key: order.queue_key() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append at the tail. Returns false if the node is already queued.
    pub async fn push_back(&self, order: &OrderRecord) -> StoreResult<bool> {
        let node = order.node_name();
        let pushed = self.store.queue_push_back(&self.key, &node, record_to_bytes(order)?).await?;
        debug!(queue = %self.key, node = %node, volume = %order.volume, pushed, "Queued resting order");
        Ok(pushed)
    }

    pub async fn peek_front(&self) -> StoreResult<Option<OrderRecord>> {
        match self.store.queue_front(&self.key).await? {
            Some(bytes) => Ok(Some(record_from_bytes(&self.key, &bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn find(&self, node_name: &str) -> StoreResult<Option<OrderRecord>> {
        match self.store.queue_get(&self.key, node_name).await? {
            Some(bytes) => Ok(Some(record_from_bytes(node_name, &bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn remove(&self, node_name: &str) -> StoreResult<bool> {
        let removed = self.store.queue_remove(&self.key, node_name).await?;
        trace!(queue = %self.key, node = %node_name, removed, "Removed from queue");
        Ok(removed)
    }

    /// Rewrite a resting order's remaining volume in place. A non-positive volume
    /// removes the order instead, so nothing empty is ever left resting.
    pub async fn update_remaining(&self, node_name: &str, new_volume: Decimal) -> StoreResult<bool> {
        if new_volume <= Decimal::ZERO {
            return self.remove(node_name).await;
        }
        let Some(mut order) = self.find(node_name).await? else {
            return Ok(false);
        };
        order.volume = new_volume;
        self.store.queue_update(&self.key, node_name, record_to_bytes(&order)?).await
    }

    pub async fn len(&self) -> StoreResult<usize> {
        self.store.queue_len(&self.key).await
    }

    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }
}

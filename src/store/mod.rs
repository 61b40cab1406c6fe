//! Shared key-value / sorted-set store the book lives in.
//!
//! The engine only ever issues single operations against a `BookStore`; each
//! operation is atomic on its own, but nothing spans a whole match.

pub mod types;
pub use types::*;
pub mod codec;
pub mod memory;
pub mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use async_trait::async_trait;
use rust_decimal::Decimal;

#[async_trait]
pub trait BookStore: Send + Sync {
    // Hash fields: intake guards and aggregate depth.
    async fn hash_exists(&self, key: &str, field: &str) -> StoreResult<bool>;
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;
    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>>;
    async fn hash_del(&self, key: &str, field: &str) -> StoreResult<bool>;
    /// Atomically add `delta` to a decimal field (missing counts as zero) and return the new value.
    async fn hash_incr(&self, key: &str, field: &str, delta: Decimal) -> StoreResult<Decimal>;

    // Sorted sets: the price indices.
    async fn zset_add(&self, key: &str, member: &str, score: Decimal) -> StoreResult<bool>;
    async fn zset_rem(&self, key: &str, member: &str) -> StoreResult<bool>;
    /// Members with `min <= score <= max` (`None` is unbounded), ascending or, with `rev`, descending.
    async fn zset_range_by_score(
        &self,
        key: &str,
        min: Option<Decimal>,
        max: Option<Decimal>,
        rev: bool,
    ) -> StoreResult<Vec<(String, Decimal)>>;

    // Arrival-ordered queues of opaque payloads addressed by node name.
    /// Returns false (and stores nothing) if `node` is already queued.
    async fn queue_push_back(&self, queue: &str, node: &str, payload: Vec<u8>) -> StoreResult<bool>;
    async fn queue_front(&self, queue: &str) -> StoreResult<Option<Vec<u8>>>;
    async fn queue_get(&self, queue: &str, node: &str) -> StoreResult<Option<Vec<u8>>>;
    /// Replace a payload in place, keeping its position. Returns false if `node` is absent.
    async fn queue_update(&self, queue: &str, node: &str, payload: Vec<u8>) -> StoreResult<bool>;
    async fn queue_remove(&self, queue: &str, node: &str) -> StoreResult<bool>;
    async fn queue_len(&self, queue: &str) -> StoreResult<usize>;
}

use std::collections::BTreeMap;

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::store::codec::decimal_from_str;
use crate::store::{BookStore, StoreError, StoreResult};

#[derive(Debug, Default)]
struct Queue {
    next_seq: u64,
    entries: BTreeMap<u64, Vec<u8>>,
    index: AHashMap<String, u64>,
}

#[derive(Debug, Default)]
struct State {
    hashes: AHashMap<String, AHashMap<String, String>>,
    zsets: AHashMap<String, AHashMap<String, Decimal>>,
    queues: AHashMap<String, Queue>,
}

/// Process-local store. Every call takes one lock, so individual operations are
/// atomic exactly like they are against a real shared store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookStore for MemoryStore {
    async fn hash_exists(&self, key: &str, field: &str) -> StoreResult<bool> {
        let state = self.state.lock();
        Ok(state.hashes.get(key).is_some_and(|h| h.contains_key(field)))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.hashes.entry(key.to_string()).or_default().insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let state = self.state.lock();
        Ok(state.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn hash_del(&self, key: &str, field: &str) -> StoreResult<bool> {
        let mut state = self.state.lock();
        let Some(hash) = state.hashes.get_mut(key) else {
            return Ok(false);
        };
        let removed = hash.remove(field).is_some();
        if hash.is_empty() {
            state.hashes.remove(key);
        }
        Ok(removed)
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: Decimal) -> StoreResult<Decimal> {
        let mut state = self.state.lock();
        let hash = state.hashes.entry(key.to_string()).or_default();
        let current = match hash.get(field) {
            Some(raw) => decimal_from_str(key, raw)?,
            None => Decimal::ZERO,
        };
        let next = current.checked_add(delta).ok_or_else(|| StoreError::overflow(key, field))?;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn zset_add(&self, key: &str, member: &str, score: Decimal) -> StoreResult<bool> {
        let mut state = self.state.lock();
        let added = state
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score)
            .is_none();
        Ok(added)
    }

    async fn zset_rem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut state = self.state.lock();
        let Some(zset) = state.zsets.get_mut(key) else {
            return Ok(false);
        };
        let removed = zset.remove(member).is_some();
        if zset.is_empty() {
            state.zsets.remove(key);
        }
        Ok(removed)
    }

    async fn zset_range_by_score(
        &self,
        key: &str,
        min: Option<Decimal>,
        max: Option<Decimal>,
        rev: bool,
    ) -> StoreResult<Vec<(String, Decimal)>> {
        let state = self.state.lock();
        let Some(zset) = state.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let mut members: Vec<(String, Decimal)> = zset
            .iter()
            .filter(|(_, score)| min.map_or(true, |m| **score >= m) && max.map_or(true, |m| **score <= m))
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        members.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        if rev {
            members.reverse();
        }
        Ok(members)
    }

    async fn queue_push_back(&self, queue: &str, node: &str, payload: Vec<u8>) -> StoreResult<bool> {
        let mut state = self.state.lock();
        let q = state.queues.entry(queue.to_string()).or_default();
        if q.index.contains_key(node) {
            return Ok(false);
        }
        let seq = q.next_seq;
        q.next_seq += 1;
        q.entries.insert(seq, payload);
        q.index.insert(node.to_string(), seq);
        Ok(true)
    }

    async fn queue_front(&self, queue: &str) -> StoreResult<Option<Vec<u8>>> {
        let state = self.state.lock();
        Ok(state
            .queues
            .get(queue)
            .and_then(|q| q.entries.values().next())
            .cloned())
    }

    async fn queue_get(&self, queue: &str, node: &str) -> StoreResult<Option<Vec<u8>>> {
        let state = self.state.lock();
        Ok(state
            .queues
            .get(queue)
            .and_then(|q| q.index.get(node).and_then(|seq| q.entries.get(seq)))
            .cloned())
    }

    async fn queue_update(&self, queue: &str, node: &str, payload: Vec<u8>) -> StoreResult<bool> {
        let mut state = self.state.lock();
        let Some(q) = state.queues.get_mut(queue) else {
            return Ok(false);
        };
        let Some(seq) = q.index.get(node).copied() else {
            return Ok(false);
        };
        q.entries.insert(seq, payload);
        Ok(true)
    }

    async fn queue_remove(&self, queue: &str, node: &str) -> StoreResult<bool> {
        let mut state = self.state.lock();
        let Some(q) = state.queues.get_mut(queue) else {
            return Ok(false);
        };
        let Some(seq) = q.index.remove(node) else {
            return Ok(false);
        };
        q.entries.remove(&seq);
        if q.entries.is_empty() {
            state.queues.remove(queue);
        }
        Ok(true)
    }

    async fn queue_len(&self, queue: &str) -> StoreResult<usize> {
        let state = self.state.lock();
        Ok(state.queues.get(queue).map_or(0, |q| q.entries.len()))
    }
}

//! Embedded persistent backend on top of `sled`.
//!
//! Layout, one tree per concern, composite keys joined with a NUL byte:
//! - `hash`:        `key\0field`       -> utf-8 value
//! - `zset`:        `key\0member`      -> utf-8 decimal score
//! - `queue`:       `queue\0seq(be)`   -> payload
//! - `queue_index`: `queue\0node`      -> seq(be)
//!
//! `seq` comes from `Db::generate_id`, which is monotonic across restarts, so a
//! prefix scan of `queue` yields arrival order.

use std::path::Path;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use tracing::{debug, info};

use crate::store::codec::decimal_from_bytes;
use crate::store::{BookStore, StoreError, StoreResult};

const SEP: u8 = 0;

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

fn tx_error(err: TransactionError<()>) -> StoreError {
    match err {
        TransactionError::Abort(()) => StoreError::Backend("transaction aborted".to_string()),
        TransactionError::Storage(e) => e.into(),
    }
}

fn prefix(key: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(key.len() + 1);
    k.extend_from_slice(key.as_bytes());
    k.push(SEP);
    k
}

fn compound(key: &str, rest: &[u8]) -> Vec<u8> {
    let mut k = prefix(key);
    k.extend_from_slice(rest);
    k
}

fn seq_from(key: &str, bytes: &[u8]) -> StoreResult<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::codec(key, "queue sequence is not 8 bytes"))?;
    Ok(u64::from_be_bytes(raw))
}

#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
    hashes: sled::Tree,
    zsets: sled::Tree,
    queues: sled::Tree,
    queue_index: sled::Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        info!(path = %path.display(), "Opened sled book store");
        Self::from_db(db)
    }

    /// Throwaway store, removed from disk on drop.
    pub fn temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> StoreResult<Self> {
        Ok(Self {
            hashes: db.open_tree("hash")?,
            zsets: db.open_tree("zset")?,
            queues: db.open_tree("queue")?,
            queue_index: db.open_tree("queue_index")?,
            db,
        })
    }

    pub async fn flush(&self) -> StoreResult<usize> {
        let bytes = self.db.flush_async().await?;
        debug!(bytes, "Flushed sled book store");
        Ok(bytes)
    }
}

#[async_trait]
impl BookStore for SledStore {
    async fn hash_exists(&self, key: &str, field: &str) -> StoreResult<bool> {
        Ok(self.hashes.contains_key(compound(key, field.as_bytes()))?)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.hashes.insert(compound(key, field.as_bytes()), value.as_bytes())?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        match self.hashes.get(compound(key, field.as_bytes()))? {
            Some(v) => {
                let s = std::str::from_utf8(&v).map_err(|e| StoreError::codec(key, e))?;
                Ok(Some(s.to_string()))
            }
            None => Ok(None),
        }
    }

    async fn hash_del(&self, key: &str, field: &str) -> StoreResult<bool> {
        Ok(self.hashes.remove(compound(key, field.as_bytes()))?.is_some())
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: Decimal) -> StoreResult<Decimal> {
        let mut failed = None;
        // The closure may rerun on a compare-and-swap retry.
        let updated = self.hashes.update_and_fetch(compound(key, field.as_bytes()), |old| {
            failed = None;
            let current = match old.map(|bytes| decimal_from_bytes(key, bytes)).transpose() {
                Ok(current) => current.unwrap_or(Decimal::ZERO),
                Err(e) => {
                    failed = Some(e);
                    return old.map(|bytes| bytes.to_vec());
                }
            };
            match current.checked_add(delta) {
                Some(next) => Some(next.to_string().into_bytes()),
                None => {
                    failed = Some(StoreError::overflow(key, field));
                    old.map(|bytes| bytes.to_vec())
                }
            }
        })?;
        if let Some(e) = failed {
            return Err(e);
        }
        match updated {
            Some(bytes) => decimal_from_bytes(key, &bytes),
            None => Err(StoreError::Backend(format!("increment of {key} produced no value"))),
        }
    }

    async fn zset_add(&self, key: &str, member: &str, score: Decimal) -> StoreResult<bool> {
        let previous = self
            .zsets
            .insert(compound(key, member.as_bytes()), score.to_string().as_bytes())?;
        Ok(previous.is_none())
    }

    async fn zset_rem(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self.zsets.remove(compound(key, member.as_bytes()))?.is_some())
    }

    async fn zset_range_by_score(
        &self,
        key: &str,
        min: Option<Decimal>,
        max: Option<Decimal>,
        rev: bool,
    ) -> StoreResult<Vec<(String, Decimal)>> {
        let p = prefix(key);
        let mut members = Vec::new();
        for entry in self.zsets.scan_prefix(&p) {
            let (k, v) = entry?;
            let member = std::str::from_utf8(&k[p.len()..]).map_err(|e| StoreError::codec(key, e))?;
            let score = decimal_from_bytes(key, &v)?;
            if min.map_or(true, |m| score >= m) && max.map_or(true, |m| score <= m) {
                members.push((member.to_string(), score));
            }
        }
        // Keys sort bytewise, not numerically.
        members.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        if rev {
            members.reverse();
        }
        Ok(members)
    }

    async fn queue_push_back(&self, queue: &str, node: &str, payload: Vec<u8>) -> StoreResult<bool> {
        let seq = self.db.generate_id()?;
        let index_key = compound(queue, node.as_bytes());
        let entry_key = compound(queue, &seq.to_be_bytes());
        (&self.queues, &self.queue_index)
            .transaction(|(entries, index)| {
                if index.get(&index_key)?.is_some() {
                    return Ok(false);
                }
                entries.insert(entry_key.as_slice(), payload.as_slice())?;
                index.insert(index_key.as_slice(), &seq.to_be_bytes()[..])?;
                Ok::<_, ConflictableTransactionError<()>>(true)
            })
            .map_err(tx_error)
    }

    async fn queue_front(&self, queue: &str) -> StoreResult<Option<Vec<u8>>> {
        match self.queues.scan_prefix(prefix(queue)).next() {
            Some(entry) => Ok(Some(entry?.1.to_vec())),
            None => Ok(None),
        }
    }

    async fn queue_get(&self, queue: &str, node: &str) -> StoreResult<Option<Vec<u8>>> {
        let Some(seq) = self.queue_index.get(compound(queue, node.as_bytes()))? else {
            return Ok(None);
        };
        let seq = seq_from(queue, &seq)?;
        Ok(self.queues.get(compound(queue, &seq.to_be_bytes()))?.map(|v| v.to_vec()))
    }

    async fn queue_update(&self, queue: &str, node: &str, payload: Vec<u8>) -> StoreResult<bool> {
        let index_key = compound(queue, node.as_bytes());
        (&self.queues, &self.queue_index)
            .transaction(|(entries, index)| {
                let Some(seq) = index.get(&index_key)? else {
                    return Ok(false);
                };
                entries.insert(compound(queue, &seq), payload.as_slice())?;
                Ok::<_, ConflictableTransactionError<()>>(true)
            })
            .map_err(tx_error)
    }

    async fn queue_remove(&self, queue: &str, node: &str) -> StoreResult<bool> {
        let index_key = compound(queue, node.as_bytes());
        (&self.queues, &self.queue_index)
            .transaction(|(entries, index)| {
                let Some(seq) = index.remove(index_key.as_slice())? else {
                    return Ok(false);
                };
                entries.remove(compound(queue, &seq))?;
                Ok::<_, ConflictableTransactionError<()>>(true)
            })
            .map_err(tx_error)
    }

    async fn queue_len(&self, queue: &str) -> StoreResult<usize> {
        let mut n = 0;
        for entry in self.queue_index.scan_prefix(prefix(queue)) {
            entry?;
            n += 1;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_zset_orders_numerically_not_bytewise() {
        let store = SledStore::temporary().unwrap();
        for p in [dec!(10), dec!(9.5), dec!(100)] {
            store.zset_add("z", &p.to_string(), p).await.unwrap();
        }
        let desc = store.zset_range_by_score("z", None, None, true).await.unwrap();
        let prices: Vec<Decimal> = desc.into_iter().map(|(_, s)| s).collect();
        assert_eq!(prices, vec![dec!(100), dec!(10), dec!(9.5)]);
    }

    #[tokio::test]
    async fn test_hash_incr_is_exact() {
        let store = SledStore::temporary().unwrap();
        for _ in 0..10 {
            store.hash_incr("d", "p", dec!(0.1)).await.unwrap();
        }
        assert_eq!(store.hash_incr("d", "p", dec!(-1)).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_hash_incr_overflow_leaves_value() {
        let store = SledStore::temporary().unwrap();
        store.hash_incr("d", "p", Decimal::MAX).await.unwrap();
        assert!(matches!(store.hash_incr("d", "p", dec!(1)).await, Err(StoreError::Overflow { .. })));
        assert_eq!(store.hash_get("d", "p").await.unwrap(), Some(Decimal::MAX.to_string()));
    }

    #[tokio::test]
    async fn test_hash_incr_rejects_corrupt_value() {
        let store = SledStore::temporary().unwrap();
        store.hash_set("d", "p", "not-a-number").await.unwrap();
        assert!(matches!(store.hash_incr("d", "p", dec!(1)).await, Err(StoreError::Codec { .. })));
        assert_eq!(store.hash_get("d", "p").await.unwrap().as_deref(), Some("not-a-number"));
    }

    #[tokio::test]
    async fn test_queue_fifo_and_update_in_place() {
        let store = SledStore::temporary().unwrap();
        store.queue_push_back("q", "a", b"a".to_vec()).await.unwrap();
        store.queue_push_back("q", "b", b"b".to_vec()).await.unwrap();
        store.queue_push_back("q2", "z", b"z".to_vec()).await.unwrap();
        assert!(!store.queue_push_back("q", "a", b"dup".to_vec()).await.unwrap());

        assert!(store.queue_update("q", "a", b"a2".to_vec()).await.unwrap());
        assert_eq!(store.queue_front("q").await.unwrap(), Some(b"a2".to_vec()));
        assert_eq!(store.queue_get("q", "b").await.unwrap(), Some(b"b".to_vec()));
        assert_eq!(store.queue_len("q").await.unwrap(), 2);

        assert!(store.queue_remove("q", "a").await.unwrap());
        assert!(!store.queue_remove("q", "a").await.unwrap());
        assert_eq!(store.queue_front("q").await.unwrap(), Some(b"b".to_vec()));
        assert!(!store.queue_update("q", "missing", b"x".to_vec()).await.unwrap());
    }
}

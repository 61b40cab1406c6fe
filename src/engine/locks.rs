use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per symbol. Holding a symbol's guard serializes every
/// submit and cancel on that symbol within this process, which makes the
/// opposite-depth snapshot and the queue walk that follows it atomic with
/// respect to other requests.
#[derive(Debug, Default)]
pub struct SymbolLocks {
    inner: Mutex<AHashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SymbolLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, symbol: &str) -> OwnedMutexGuard<()> {
        let lock = self.inner.lock().entry(symbol.to_string()).or_default().clone();
        lock.lock_owned().await
    }
}

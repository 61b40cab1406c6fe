use std::str::FromStr;

use rust_decimal::Decimal;

use crate::engine::types::OrderRecord;
use crate::store::types::{StoreError, StoreResult};

/// Encode an order record as a queue payload.
pub fn record_to_bytes(record: &OrderRecord) -> StoreResult<Vec<u8>> {
    bincode::serialize(record).map_err(|e| StoreError::codec(record.node_name(), e))
}

/// Decode a queue payload read back from the store; `key` is only used for error context.
pub fn record_from_bytes(key: &str, bytes: &[u8]) -> StoreResult<OrderRecord> {
    bincode::deserialize(bytes).map_err(|e| StoreError::codec(key, e))
}

pub fn decimal_from_str(key: &str, s: &str) -> StoreResult<Decimal> {
    Decimal::from_str(s.trim()).map_err(|e| StoreError::codec(key, e))
}

pub fn decimal_from_bytes(key: &str, bytes: &[u8]) -> StoreResult<Decimal> {
    let s = std::str::from_utf8(bytes).map_err(|e| StoreError::codec(key, e))?;
    decimal_from_str(key, s)
}

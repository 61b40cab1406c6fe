use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::BusError;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sale,
}

impl Side {
    /// The side an incoming order on `self` matches against.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sale,
            Side::Sale => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sale => "sale",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Add,
    Cancel,
}

// One order (or cancel request) as it flows through intake and matching.
// `volume` is the remaining unfilled quantity and only ever moves down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub client_id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub volume: Decimal,
    pub action: Action,
}

impl OrderRecord {
    pub fn new(
        client_id: impl Into<String>,
        order_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        price: Decimal,
        volume: Decimal,
        action: Action,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            order_id: order_id.into(),
            symbol: symbol.into(),
            side,
            price,
            volume,
            action,
        }
    }

    pub fn add(
        client_id: impl Into<String>,
        order_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        price: Decimal,
        volume: Decimal,
    ) -> Self {
        Self::new(client_id, order_id, symbol, side, price, volume, Action::Add)
    }

    /// Cancel request for a resting order. The volume carried here is informational only;
    /// the queue's copy decides how much depth is released.
    pub fn cancel(
        client_id: impl Into<String>,
        order_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        price: Decimal,
    ) -> Self {
        Self::new(client_id, order_id, symbol, side, price, Decimal::ZERO, Action::Cancel)
    }

    pub fn is_filled(&self) -> bool {
        self.volume <= Decimal::ZERO
    }
}

// Outcome of one match step, or of a cancel (match_volume == 0, node == match_node).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub node: OrderRecord,
    pub match_node: OrderRecord,
    pub match_volume: Decimal,
}

impl MatchResult {
    pub fn fill(node: &OrderRecord, match_node: &OrderRecord, match_volume: Decimal) -> Self {
        Self {
            node: node.clone(),
            match_node: match_node.clone(),
            match_volume,
        }
    }

    pub fn cancelled(node: &OrderRecord) -> Self {
        Self {
            node: node.clone(),
            match_node: node.clone(),
            match_volume: Decimal::ZERO,
        }
    }

    pub fn is_cancel(&self) -> bool {
        self.match_volume.is_zero()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResult {
    /// The incoming order after matching; `volume` is what is left.
    pub order: OrderRecord,
    pub fills: Vec<MatchResult>,
    /// Whether a remainder was posted to the book.
    pub rested: bool,
}

impl SubmitResult {
    pub fn traded_volume(&self) -> Decimal {
        self.fills
            .iter()
            .fold(Decimal::ZERO, |acc, f| acc.saturating_add(f.match_volume))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Submitted(SubmitResult),
    Cancelled(MatchResult),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("intake guard missing for {client_id}/{order_id}: duplicate or unregistered order")]
    DuplicateOrRejectedIntake { client_id: String, order_id: String },

    #[error("no resting order {node_name}")]
    UnknownOrder { node_name: String },

    #[error("invalid order: {reason}")]
    InvalidOrder { reason: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("event bus unavailable: {0}")]
    BusUnavailable(#[from] BusError),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_opposite_side() {
        assert_eq!(Side::Buy.opposite(), Side::Sale);
        assert_eq!(Side::Sale.opposite(), Side::Buy);
    }

    #[test]
    fn test_cancel_result_is_zero_volume() {
        let order = OrderRecord::cancel("c1", "o1", "eth2usdt", Side::Buy, dec!(0.5));
        let result = MatchResult::cancelled(&order);
        assert!(result.is_cancel());
        assert_eq!(result.node, result.match_node);
    }

    #[test]
    fn test_wire_format() {
        let order = OrderRecord::add("c1", "o1", "eth2usdt", Side::Sale, dec!(5.50), dec!(10));
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["side"], "SALE");
        assert_eq!(json["action"], "ADD");
        assert_eq!(json["price"], "5.50");
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::UnknownOrder { node_name: "x".into() };
        assert_eq!(err.to_string(), "no resting order x");
    }
}

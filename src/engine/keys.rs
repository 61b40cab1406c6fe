//! Storage key derivation.
//!
//! Every location an order touches in the shared store is a pure function of
//! symbol, side, price and order identity. Prices are normalized first so that
//! `5.0` and `5` land on the same keys. Client ids are length-prefixed, so any
//! characters are allowed in client and order ids without two identities
//! sharing a key.

use rust_decimal::Decimal;

use crate::engine::types::{OrderRecord, Side};

/// Canonical text form of a price, used inside keys and as sorted-set member.
pub fn price_token(price: Decimal) -> String {
    price.normalize().to_string()
}

pub fn queue_key(symbol: &str, side: Side, price: Decimal) -> String {
    format!("{symbol}:{side}:queue:{}", price_token(price))
}

pub fn node_name(symbol: &str, side: Side, price: Decimal, client_id: &str, order_id: &str) -> String {
    format!("{symbol}:{side}:{}:{}", price_token(price), order_identity(client_id, order_id))
}

pub fn depth_key(symbol: &str, side: Side) -> String {
    format!("{symbol}:{side}:depth")
}

pub fn depth_field(price: Decimal) -> String {
    price_token(price)
}

pub fn price_index_key(symbol: &str, side: Side) -> String {
    format!("{symbol}:{side}:prices")
}

pub fn price_index_key_rev(symbol: &str, side: Side) -> String {
    format!("{symbol}:{side}:prices:rev")
}

pub fn intake_guard_key(symbol: &str) -> String {
    format!("{symbol}:intake")
}

pub fn intake_guard_field(client_id: &str, order_id: &str) -> String {
    order_identity(client_id, order_id)
}

fn order_identity(client_id: &str, order_id: &str) -> String {
    format!("{}:{client_id}:{order_id}", client_id.len())
}

impl OrderRecord {
    pub fn queue_key(&self) -> String {
        queue_key(&self.symbol, self.side, self.price)
    }

    pub fn node_name(&self) -> String {
        node_name(&self.symbol, self.side, self.price, &self.client_id, &self.order_id)
    }

    pub fn depth_key(&self) -> String {
        depth_key(&self.symbol, self.side)
    }

    pub fn depth_field(&self) -> String {
        depth_field(self.price)
    }

    pub fn price_index_key(&self) -> String {
        price_index_key(&self.symbol, self.side)
    }

    pub fn price_index_key_rev(&self) -> String {
        price_index_key_rev(&self.symbol, self.side)
    }

    pub fn intake_guard_key(&self) -> String {
        intake_guard_key(&self.symbol)
    }

    pub fn intake_guard_field(&self) -> String {
        intake_guard_field(&self.client_id, &self.order_id)
    }
}

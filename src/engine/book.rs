use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, error, instrument, trace};

use crate::engine::keys;
use crate::engine::types::{OrderRecord, Side};
use crate::store::codec::decimal_from_str;
use crate::store::{BookStore, StoreResult};

const GUARD_MARK: &str = "1";

/// Depth ledger over the shared store.
///
/// Per symbol and side it keeps the aggregate resting volume at each price and
/// two sorted indices of the prices with positive aggregate: ascending (walked
/// by incoming buys against the sale side) and descending (walked by incoming
/// sales against the buy side).
#[derive(Clone)]
pub struct Book {
    store: Arc<dyn BookStore>,
}

impl Book {
    pub fn new(store: Arc<dyn BookStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn BookStore {
        self.store.as_ref()
    }

    // Idempotency guard

    pub async fn post_guard(&self, order: &OrderRecord) -> StoreResult<()> {
        self.store
            .hash_set(&order.intake_guard_key(), &order.intake_guard_field(), GUARD_MARK)
            .await
    }

    pub async fn guard_exists(&self, order: &OrderRecord) -> StoreResult<bool> {
        self.store
            .hash_exists(&order.intake_guard_key(), &order.intake_guard_field())
            .await
    }

    pub async fn clear_guard(&self, order: &OrderRecord) -> StoreResult<bool> {
        self.store
            .hash_del(&order.intake_guard_key(), &order.intake_guard_field())
            .await
    }

    // Aggregate depth and price indices

    #[instrument(level = "trace", skip(self))]
    pub async fn increase_depth(&self, symbol: &str, side: Side, price: Decimal, volume: Decimal) -> StoreResult<Decimal> {
        let total = self
            .store
            .hash_incr(&keys::depth_key(symbol, side), &keys::depth_field(price), volume)
            .await?;
        if total - volume <= Decimal::ZERO && total > Decimal::ZERO {
            self.index_price(symbol, side, price).await?;
            debug!(symbol, %side, %price, "Price level opened");
        }
        trace!(symbol, %side, %price, %total, "Depth increased");
        Ok(total)
    }

    #[instrument(level = "trace", skip(self))]
    pub async fn decrease_depth(&self, symbol: &str, side: Side, price: Decimal, volume: Decimal) -> StoreResult<Decimal> {
        let depth_key = keys::depth_key(symbol, side);
        let field = keys::depth_field(price);
        let total = self.store.hash_incr(&depth_key, &field, -volume).await?;
        if total < Decimal::ZERO {
            error!(symbol, %side, %price, %total, "Aggregate depth went negative, resetting level");
        }
        if total <= Decimal::ZERO {
            self.unindex_price(symbol, side, price).await?;
            self.store.hash_del(&depth_key, &field).await?;
            debug!(symbol, %side, %price, "Price level closed");
            return Ok(Decimal::ZERO);
        }
        trace!(symbol, %side, %price, %total, "Depth decreased");
        Ok(total)
    }

    async fn index_price(&self, symbol: &str, side: Side, price: Decimal) -> StoreResult<()> {
        let member = keys::price_token(price);
        self.store.zset_add(&keys::price_index_key(symbol, side), &member, price).await?;
        self.store.zset_add(&keys::price_index_key_rev(symbol, side), &member, price).await?;
        Ok(())
    }

    async fn unindex_price(&self, symbol: &str, side: Side, price: Decimal) -> StoreResult<()> {
        let member = keys::price_token(price);
        self.store.zset_rem(&keys::price_index_key(symbol, side), &member).await?;
        self.store.zset_rem(&keys::price_index_key_rev(symbol, side), &member).await?;
        Ok(())
    }

    /// Aggregate resting volume at one price, zero if the level is empty.
    pub async fn aggregate(&self, symbol: &str, side: Side, price: Decimal) -> StoreResult<Decimal> {
        let depth_key = keys::depth_key(symbol, side);
        match self.store.hash_get(&depth_key, &keys::depth_field(price)).await? {
            Some(raw) => decimal_from_str(&depth_key, &raw),
            None => Ok(Decimal::ZERO),
        }
    }

    async fn with_aggregates(&self, symbol: &str, side: Side, prices: Vec<(String, Decimal)>) -> StoreResult<Vec<(Decimal, Decimal)>> {
        let mut levels = Vec::with_capacity(prices.len());
        for (_, price) in prices {
            levels.push((price, self.aggregate(symbol, side, price).await?));
        }
        Ok(levels)
    }

    /// Crossing prices on the opposite side, best first.
    ///
    /// An incoming sale at P sees buy prices >= P, highest first; an incoming buy
    /// at P sees sale prices <= P, lowest first.
    #[instrument(level = "trace", skip(self, order), fields(symbol = %order.symbol, side = %order.side, price = %order.price))]
    pub async fn opposite_depths(&self, order: &OrderRecord) -> StoreResult<Vec<(Decimal, Decimal)>> {
        let opposite = order.side.opposite();
        let prices = match order.side {
            Side::Sale => {
                self.store
                    .zset_range_by_score(&keys::price_index_key_rev(&order.symbol, opposite), Some(order.price), None, true)
                    .await?
            }
            Side::Buy => {
                self.store
                    .zset_range_by_score(&keys::price_index_key(&order.symbol, opposite), None, Some(order.price), false)
                    .await?
            }
        };
        let depths = self.with_aggregates(&order.symbol, opposite, prices).await?;
        trace!(levels = depths.len(), "Collected opposite depths");
        Ok(depths)
    }

    /// Top `limit` levels of one side, best price first.
    pub async fn depth(&self, symbol: &str, side: Side, limit: usize) -> StoreResult<Vec<(Decimal, Decimal)>> {
        let mut prices = match side {
            Side::Buy => {
                self.store
                    .zset_range_by_score(&keys::price_index_key_rev(symbol, side), None, None, true)
                    .await?
            }
            Side::Sale => {
                self.store
                    .zset_range_by_score(&keys::price_index_key(symbol, side), None, None, false)
                    .await?
            }
        };
        prices.truncate(limit);
        self.with_aggregates(symbol, side, prices).await
    }

    pub async fn best_bid(&self, symbol: &str) -> StoreResult<Option<(Decimal, Decimal)>> {
        Ok(self.depth(symbol, Side::Buy, 1).await?.into_iter().next())
    }

    pub async fn best_ask(&self, symbol: &str) -> StoreResult<Option<(Decimal, Decimal)>> {
        Ok(self.depth(symbol, Side::Sale, 1).await?.into_iter().next())
    }

    pub async fn spread(&self, symbol: &str) -> StoreResult<Option<Decimal>> {
        match (self.best_bid(symbol).await?, self.best_ask(symbol).await?) {
            (Some((bid, _)), Some((ask, _))) => Ok(Some(ask - bid)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    const SYM: &str = "eth2usdt";

    fn book() -> Book {
        Book::new(Arc::new(MemoryStore::new()))
    }

    async fn indexed(book: &Book, side: Side) -> (Vec<String>, Vec<String>) {
        let asc = book
            .store()
            .zset_range_by_score(&keys::price_index_key(SYM, side), None, None, false)
            .await
            .unwrap();
        let desc = book
            .store()
            .zset_range_by_score(&keys::price_index_key_rev(SYM, side), None, None, false)
            .await
            .unwrap();
        (asc.into_iter().map(|(m, _)| m).collect(), desc.into_iter().map(|(m, _)| m).collect())
    }

    #[tokio::test]
    async fn test_guard_lifecycle() {
        let book = book();
        let order = OrderRecord::add("c1", "o1", SYM, Side::Buy, dec!(5), dec!(1));
        assert!(!book.guard_exists(&order).await.unwrap());
        book.post_guard(&order).await.unwrap();
        assert!(book.guard_exists(&order).await.unwrap());
        assert!(book.clear_guard(&order).await.unwrap());
        assert!(!book.clear_guard(&order).await.unwrap());
    }

    #[tokio::test]
    async fn test_depth_indexes_and_unindexes() {
        let book = book();
        book.increase_depth(SYM, Side::Sale, dec!(5.0), dec!(10)).await.unwrap();
        book.increase_depth(SYM, Side::Sale, dec!(5), dec!(2)).await.unwrap();
        assert_eq!(book.aggregate(SYM, Side::Sale, dec!(5)).await.unwrap(), dec!(12));
        assert_eq!(indexed(&book, Side::Sale).await, (vec!["5".to_string()], vec!["5".to_string()]));

        book.decrease_depth(SYM, Side::Sale, dec!(5), dec!(4)).await.unwrap();
        assert_eq!(indexed(&book, Side::Sale).await.0.len(), 1);

        let left = book.decrease_depth(SYM, Side::Sale, dec!(5), dec!(8)).await.unwrap();
        assert_eq!(left, Decimal::ZERO);
        assert_eq!(indexed(&book, Side::Sale).await, (vec![], vec![]));

        book.increase_depth(SYM, Side::Sale, dec!(5), dec!(1)).await.unwrap();
        assert_eq!(indexed(&book, Side::Sale).await.1, vec!["5".to_string()]);
    }

    #[tokio::test]
    async fn test_opposite_depths_for_buy_ascending() {
        let book = book();
        for (p, v) in [(dec!(5.5), dec!(10)), (dec!(5.0), dec!(10)), (dec!(7), dec!(1))] {
            book.increase_depth(SYM, Side::Sale, p, v).await.unwrap();
        }
        let incoming = OrderRecord::add("c1", "b1", SYM, Side::Buy, dec!(6), dec!(15));
        let depths = book.opposite_depths(&incoming).await.unwrap();
        assert_eq!(depths, vec![(dec!(5), dec!(10)), (dec!(5.5), dec!(10))]);
    }

    #[tokio::test]
    async fn test_opposite_depths_for_sale_descending() {
        let book = book();
        for p in [dec!(4), dec!(5), dec!(6)] {
            book.increase_depth(SYM, Side::Buy, p, dec!(1)).await.unwrap();
        }
        let incoming = OrderRecord::add("c1", "s1", SYM, Side::Sale, dec!(5), dec!(1));
        let prices: Vec<Decimal> = book.opposite_depths(&incoming).await.unwrap().into_iter().map(|(p, _)| p).collect();
        assert_eq!(prices, vec![dec!(6), dec!(5)]);

        let out_of_reach = OrderRecord::add("c1", "s2", SYM, Side::Sale, dec!(6.5), dec!(1));
        assert!(book.opposite_depths(&out_of_reach).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_top_of_book() {
        let book = book();
        assert_eq!(book.spread(SYM).await.unwrap(), None);
        book.increase_depth(SYM, Side::Buy, dec!(4.9), dec!(3)).await.unwrap();
        book.increase_depth(SYM, Side::Buy, dec!(4.8), dec!(3)).await.unwrap();
        book.increase_depth(SYM, Side::Sale, dec!(5.1), dec!(2)).await.unwrap();
        assert_eq!(book.best_bid(SYM).await.unwrap(), Some((dec!(4.9), dec!(3))));
        assert_eq!(book.best_ask(SYM).await.unwrap(), Some((dec!(5.1), dec!(2))));
        assert_eq!(book.spread(SYM).await.unwrap(), Some(dec!(0.2)));
        assert_eq!(book.depth(SYM, Side::Buy, 5).await.unwrap().len(), 2);
    }
}

//! Price-time priority matching.
//!
//! The outer loop walks the opposite side's crossing prices in the order the
//! book delivered them; the inner loop drains one price level front to back.
//! Every fill mutates queue and depth first and is published right after.

use std::cmp::Ordering;

use rust_decimal::Decimal;
use tracing::{debug, instrument, trace};

use crate::engine::book::Book;
use crate::engine::publisher::Publisher;
use crate::engine::queue::PriceLevelQueue;
use crate::engine::types::{MatchResult, OrderRecord};
use crate::store::StoreResult;

pub struct Matcher<'a> {
    book: &'a Book,
    publisher: &'a Publisher,
}

impl<'a> Matcher<'a> {
    pub fn new(book: &'a Book, publisher: &'a Publisher) -> Self {
        Self { book, publisher }
    }

    /// Match `incoming` against `depths` (price, aggregate), best price first.
    /// On return `incoming.volume` holds whatever is left to rest.
    #[instrument(skip_all, fields(node = %incoming.node_name(), levels = depths.len()))]
    pub async fn run(&self, incoming: &mut OrderRecord, depths: &[(Decimal, Decimal)]) -> StoreResult<Vec<MatchResult>> {
        let mut fills = Vec::new();
        let opposite = incoming.side.opposite();
        for (price, aggregate) in depths {
            trace!(%price, %aggregate, remaining = %incoming.volume, "Walking price level");
            let queue = PriceLevelQueue::new(self.book.store(), &incoming.symbol, opposite, *price);
            self.match_level(incoming, &queue, &mut fills).await?;
            if incoming.is_filled() {
                break;
            }
        }
        Ok(fills)
    }

    async fn match_level(
        &self,
        incoming: &mut OrderRecord,
        queue: &PriceLevelQueue<'_>,
        fills: &mut Vec<MatchResult>,
    ) -> StoreResult<()> {
        while let Some(mut resting) = queue.peek_front().await? {
            let node = resting.node_name();
            let diff = incoming.volume - resting.volume;
            let traded = match diff.cmp(&Decimal::ZERO) {
                Ordering::Greater | Ordering::Equal => {
                    let traded = resting.volume;
                    incoming.volume -= traded;
                    queue.remove(&node).await?;
                    self.book
                        .decrease_depth(&resting.symbol, resting.side, resting.price, traded)
                        .await?;
                    traded
                }
                Ordering::Less => {
                    let traded = incoming.volume;
                    resting.volume -= traded;
                    queue.update_remaining(&node, resting.volume).await?;
                    self.book
                        .decrease_depth(&resting.symbol, resting.side, resting.price, traded)
                        .await?;
                    incoming.volume = Decimal::ZERO;
                    traded
                }
            };

            debug!(
                taker = %incoming.node_name(),
                maker = %node,
                price = %resting.price,
                %traded,
                taker_left = %incoming.volume,
                maker_left = %resting.volume,
                "Fill executed"
            );
            metrics::counter!("lobx_fills_total").increment(1);

            let result = MatchResult::fill(incoming, &resting, traded);
            self.publisher.emit(&result).await;
            fills.push(result);

            if incoming.is_filled() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::bus::{ChannelBus, Topics};
    use crate::engine::types::Side;
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    const SYM: &str = "eth2usdt";

    struct Fixture {
        book: Book,
        publisher: Publisher,
        bus: Arc<ChannelBus>,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(ChannelBus::new(64));
        Fixture {
            book: Book::new(Arc::new(MemoryStore::new())),
            publisher: Publisher::new(bus.clone(), Topics::default()),
            bus,
        }
    }

    async fn rest(f: &Fixture, order: &OrderRecord) {
        f.book.increase_depth(&order.symbol, order.side, order.price, order.volume).await.unwrap();
        PriceLevelQueue::for_order(f.book.store(), order).push_back(order).await.unwrap();
    }

    async fn run(f: &Fixture, incoming: &mut OrderRecord) -> Vec<MatchResult> {
        let depths = f.book.opposite_depths(incoming).await.unwrap();
        Matcher::new(&f.book, &f.publisher).run(incoming, &depths).await.unwrap()
    }

    #[tokio::test]
    async fn test_taker_larger_than_maker_continues_in_level() {
        let f = fixture();
        rest(&f, &OrderRecord::add("m", "s1", SYM, Side::Sale, dec!(5), dec!(3))).await;
        rest(&f, &OrderRecord::add("m", "s2", SYM, Side::Sale, dec!(5), dec!(4))).await;

        let mut buy = OrderRecord::add("t", "b1", SYM, Side::Buy, dec!(5), dec!(5));
        let fills = run(&f, &mut buy).await;

        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].match_node.order_id, "s1");
        assert_eq!(fills[0].match_volume, dec!(3));
        assert_eq!(fills[1].match_node.order_id, "s2");
        assert_eq!(fills[1].match_volume, dec!(2));
        assert_eq!(fills[1].match_node.volume, dec!(2));
        assert!(buy.is_filled());
        assert_eq!(f.book.aggregate(SYM, Side::Sale, dec!(5)).await.unwrap(), dec!(2));
    }

    #[tokio::test]
    async fn test_event_snapshots_taker_after_each_step() {
        let f = fixture();
        let mut rx = f.bus.subscribe();
        rest(&f, &OrderRecord::add("m", "s1", SYM, Side::Sale, dec!(5), dec!(1))).await;
        rest(&f, &OrderRecord::add("m", "s2", SYM, Side::Sale, dec!(5), dec!(1))).await;

        let mut buy = OrderRecord::add("t", "b1", SYM, Side::Buy, dec!(5), dec!(3));
        run(&f, &mut buy).await;

        let first: MatchResult = rx.recv().await.unwrap().decode().unwrap();
        let second: MatchResult = rx.recv().await.unwrap().decode().unwrap();
        assert_eq!(first.node.volume, dec!(2));
        assert_eq!(second.node.volume, dec!(1));
        assert_eq!(buy.volume, dec!(1));
    }

    #[tokio::test]
    async fn test_no_depths_no_fills() {
        let f = fixture();
        let mut sale = OrderRecord::add("t", "s1", SYM, Side::Sale, dec!(5), dec!(3));
        assert!(run(&f, &mut sale).await.is_empty());
        assert_eq!(sale.volume, dec!(3));
    }

    #[tokio::test]
    async fn test_decimal_partials_do_not_drift() {
        let f = fixture();
        rest(&f, &OrderRecord::add("m", "s1", SYM, Side::Sale, dec!(5), dec!(1))).await;
        for i in 0..10 {
            let mut buy = OrderRecord::add("t", format!("b{i}"), SYM, Side::Buy, dec!(5), dec!(0.1));
            run(&f, &mut buy).await;
            assert!(buy.is_filled());
        }
        assert!(PriceLevelQueue::new(f.book.store(), SYM, Side::Sale, dec!(5)).is_empty().await.unwrap());
        assert!(f.book.best_ask(SYM).await.unwrap().is_none());
    }
}

//! Property-based checks of the book invariants over random order flow.
//!
//! Each case replays a random sequence of adds and cancels on a fresh
//! in-memory book and checks, after every step, that aggregates agree with
//! the queues, no volume goes negative, and the book never stays crossed.

use std::sync::Arc;

use lobx_match::bus::{ChannelBus, Topics};
use lobx_match::engine::{Engine, EngineError, OrderRecord, PriceLevelQueue, Side};
use lobx_match::store::MemoryStore;
use proptest::prelude::*;
use rust_decimal::Decimal;

const SYM: &str = "eth2usdt";

#[derive(Debug, Clone)]
enum Step {
    Add { side: Side, ticks: i64, volume: i64 },
    Cancel { pick: usize },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (any::<bool>(), 90i64..=110, 1i64..=20).prop_map(|(buy, ticks, volume)| Step::Add {
            side: if buy { Side::Buy } else { Side::Sale },
            ticks,
            volume,
        }),
        1 => any::<usize>().prop_map(|pick| Step::Cancel { pick }),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

/// Prices on a 0.05 grid around 5.00.
fn price(ticks: i64) -> Decimal {
    Decimal::new(ticks * 5, 2)
}

async fn resting_volume(engine: &Engine, order: &OrderRecord) -> Decimal {
    PriceLevelQueue::for_order(engine.book().store(), order)
        .find(&order.node_name())
        .await
        .unwrap()
        .map(|o| o.volume)
        .unwrap_or(Decimal::ZERO)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Aggregates equal the sum of queued volumes, nothing is negative, the
    /// book is never left crossed, and volume is conserved per side.
    #[test]
    fn book_invariants_hold(steps in prop::collection::vec(step(), 1..60)) {
        runtime().block_on(async move {
            let engine = Engine::new(Arc::new(MemoryStore::new()), Arc::new(ChannelBus::new(4096)), Topics::default());
            let mut placed: Vec<OrderRecord> = Vec::new();
            let mut submitted = [Decimal::ZERO; 2];
            let mut traded = Decimal::ZERO;
            let mut cancelled = [Decimal::ZERO; 2];

            for (i, step) in steps.into_iter().enumerate() {
                match step {
                    Step::Add { side, ticks, volume } => {
                        let order = OrderRecord::add("p", i.to_string(), SYM, side, price(ticks), Decimal::from(volume));
                        engine.register(&order).await.unwrap();
                        let result = engine.submit(order.clone()).await.unwrap();
                        for fill in &result.fills {
                            prop_assert!(fill.match_volume > Decimal::ZERO);
                            prop_assert!(fill.match_node.volume >= Decimal::ZERO);
                        }
                        prop_assert!(result.order.volume >= Decimal::ZERO);
                        submitted[side as usize] += order.volume;
                        traded += result.traded_volume();
                        placed.push(order);
                    }
                    Step::Cancel { pick } => {
                        if placed.is_empty() {
                            continue;
                        }
                        let target = &placed[pick % placed.len()];
                        let cancel = OrderRecord::cancel("p", target.order_id.clone(), SYM, target.side, target.price);
                        match engine.cancel(cancel).await {
                            Ok(result) => {
                                prop_assert!(result.node.volume > Decimal::ZERO);
                                cancelled[target.side as usize] += result.node.volume;
                            }
                            Err(EngineError::UnknownOrder { .. }) => {}
                            Err(e) => prop_assert!(false, "unexpected cancel error: {e}"),
                        }
                    }
                }

                // Aggregates agree with what is actually queued.
                let mut resting = [Decimal::ZERO; 2];
                for side in [Side::Buy, Side::Sale] {
                    let levels = engine.book().depth(SYM, side, usize::MAX).await.unwrap();
                    for (level_price, aggregate) in levels {
                        prop_assert!(aggregate > Decimal::ZERO, "indexed level {level_price} has aggregate {aggregate}");
                        let mut queued = Decimal::ZERO;
                        for order in placed.iter().filter(|o| o.side == side && o.price == level_price) {
                            queued += resting_volume(&engine, order).await;
                        }
                        prop_assert_eq!(aggregate, queued);
                        resting[side as usize] += aggregate;
                    }
                }

                if let (Some((bid, _)), Some((ask, _))) =
                    (engine.book().best_bid(SYM).await.unwrap(), engine.book().best_ask(SYM).await.unwrap())
                {
                    prop_assert!(bid < ask, "crossed book: bid {bid} ask {ask}");
                }

                for side in [Side::Buy, Side::Sale] {
                    let s = side as usize;
                    prop_assert_eq!(submitted[s], traded + resting[s] + cancelled[s]);
                }
            }
            Ok(())
        })?;
    }
}

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use crate::bus::{EventBus, Topics};
use crate::engine::book::Book;
use crate::engine::locks::SymbolLocks;
use crate::engine::matcher::Matcher;
use crate::engine::publisher::Publisher;
use crate::engine::queue::PriceLevelQueue;
use crate::engine::types::{Action, EngineError, EngineResult, MatchResult, OrderRecord, Outcome, SubmitResult};
use crate::store::BookStore;

/// Order lifecycle entry point: intake registration, add, cancel.
///
/// Store and bus are injected; the engine holds no book state of its own
/// besides the per-symbol locks.
pub struct Engine {
    book: Book,
    publisher: Publisher,
    locks: SymbolLocks,
}

impl Engine {
    pub fn new(store: Arc<dyn BookStore>, bus: Arc<dyn EventBus>, topics: Topics) -> Self {
        info!(intake = %topics.intake, matches = %topics.matches, "Initialized matching engine");
        Self {
            book: Book::new(store),
            publisher: Publisher::new(bus, topics),
            locks: SymbolLocks::new(),
        }
    }

    /// Bound on match events parked while the bus is down; the oldest are dropped past it.
    pub fn with_undelivered_capacity(mut self, capacity: usize) -> Self {
        self.publisher = self.publisher.with_capacity(capacity);
        self
    }

    pub fn book(&self) -> &Book {
        &self.book
    }

    /// Mark an order as admitted for intake and announce it on the intake topic.
    /// The guard is what lets exactly one later `submit` through.
    #[instrument(skip_all, fields(client = %order.client_id, order = %order.order_id))]
    pub async fn register(&self, order: &OrderRecord) -> EngineResult<()> {
        if order.action == Action::Add {
            validate_add(order)?;
            self.book.post_guard(order).await?;
        }
        self.publisher.publish_intake(order).await?;
        debug!(action = ?order.action, "Registered order for intake");
        Ok(())
    }

    /// Route a delivered intake message by its action.
    pub async fn dispatch(&self, order: OrderRecord) -> EngineResult<Outcome> {
        let outcome = match order.action {
            Action::Add => self.submit(order).await.map(Outcome::Submitted),
            Action::Cancel => self.cancel(order).await.map(Outcome::Cancelled),
        };
        if let Err(EngineError::StoreUnavailable(e)) = &outcome {
            error!(error = %e, "Store failure, request aborted");
        }
        outcome
    }

    #[instrument(skip_all, fields(node = %order.node_name(), volume = %order.volume))]
    pub async fn submit(&self, mut order: OrderRecord) -> EngineResult<SubmitResult> {
        if order.action != Action::Add {
            return Err(reject(invalid("submit requires an ADD order")));
        }
        validate_add(&order).map_err(reject)?;

        let _symbol_guard = self.locks.acquire(&order.symbol).await;

        if !self.book.guard_exists(&order).await? {
            warn!("Rejecting order without intake guard");
            return Err(reject(EngineError::DuplicateOrRejectedIntake {
                client_id: order.client_id.clone(),
                order_id: order.order_id.clone(),
            }));
        }
        let node = order.node_name();
        let own_level = PriceLevelQueue::for_order(self.book.store(), &order);
        if own_level.find(&node).await?.is_some() {
            warn!("Rejecting order whose node is already resting");
            return Err(reject(invalid("order is already resting")));
        }
        // Matching never touches the own-side level, so this holds until the post.
        let level = self.book.aggregate(&order.symbol, order.side, order.price).await?;
        if level.checked_add(order.volume).is_none() {
            warn!(%level, "Rejecting order that would overflow its price level");
            return Err(reject(invalid("volume would overflow the price level")));
        }
        self.book.clear_guard(&order).await?;
        metrics::counter!("lobx_orders_submitted_total").increment(1);

        let depths = self.book.opposite_depths(&order).await?;
        let fills = if depths.is_empty() {
            Vec::new()
        } else {
            Matcher::new(&self.book, &self.publisher).run(&mut order, &depths).await?
        };

        if order.is_filled() {
            debug!(fills = fills.len(), "Order fully filled");
            return Ok(SubmitResult { order, fills, rested: false });
        }

        self.book
            .increase_depth(&order.symbol, order.side, order.price, order.volume)
            .await?;
        own_level.push_back(&order).await?;
        debug!(fills = fills.len(), remaining = %order.volume, "Order resting");
        Ok(SubmitResult { order, fills, rested: true })
    }

    #[instrument(skip_all, fields(node = %order.node_name()))]
    pub async fn cancel(&self, mut order: OrderRecord) -> EngineResult<MatchResult> {
        if order.action != Action::Cancel {
            return Err(reject(invalid("cancel requires a CANCEL order")));
        }
        validate_ids(&order).map_err(reject)?;

        let _symbol_guard = self.locks.acquire(&order.symbol).await;

        // Shares the ADD's guard field, so an ADD still waiting in intake is
        // refused later. Absent when the ADD was already consumed.
        if !self.book.clear_guard(&order).await? {
            debug!("No intake guard to clear for cancel");
        }

        let node = order.node_name();
        let queue = PriceLevelQueue::for_order(self.book.store(), &order);
        let Some(resting) = queue.find(&node).await? else {
            warn!("Cancel target not resting");
            return Err(reject(EngineError::UnknownOrder { node_name: node }));
        };
        if order.volume != resting.volume {
            debug!(requested = %order.volume, resting = %resting.volume, "Using resting volume for cancel");
        }
        order.volume = resting.volume;

        self.book
            .decrease_depth(&order.symbol, order.side, order.price, order.volume)
            .await?;
        queue.remove(&node).await?;
        metrics::counter!("lobx_cancels_total").increment(1);

        let result = MatchResult::cancelled(&order);
        self.publisher.emit(&result).await;
        info!(released = %order.volume, "Order cancelled");
        Ok(result)
    }

    /// Retry match events whose first publish failed.
    pub async fn redeliver(&self) -> EngineResult<usize> {
        let sent = self.publisher.redeliver().await?;
        if sent > 0 {
            info!(sent, "Redelivered parked events");
        }
        Ok(sent)
    }

    pub fn undelivered(&self) -> usize {
        self.publisher.undelivered()
    }
}

fn invalid(reason: &str) -> EngineError {
    EngineError::InvalidOrder { reason: reason.to_string() }
}

fn reject(err: EngineError) -> EngineError {
    metrics::counter!("lobx_orders_rejected_total").increment(1);
    err
}

fn validate_ids(order: &OrderRecord) -> EngineResult<()> {
    if order.symbol.is_empty() || order.client_id.is_empty() || order.order_id.is_empty() {
        return Err(invalid("symbol, client id and order id are required"));
    }
    if order.symbol.contains(':') {
        return Err(invalid("symbol must not contain ':'"));
    }
    Ok(())
}

fn validate_add(order: &OrderRecord) -> EngineResult<()> {
    validate_ids(order)?;
    if order.price <= Decimal::ZERO {
        return Err(invalid("price must be positive"));
    }
    if order.volume <= Decimal::ZERO {
        return Err(invalid("volume must be positive"));
    }
    Ok(())
}

//! Matching core for a limit order book kept in a shared store.
//!
//! Orders are matched under price-time priority against per-price FIFO queues;
//! every book mutation is a single store operation and every fill or cancel is
//! published on the event bus.

pub mod bus;
pub mod engine;
pub mod settings;
pub mod store;
pub mod telemetry;

pub use bus::{ChannelBus, EventBus, Topics};
pub use engine::{Action, Engine, EngineError, MatchResult, OrderRecord, Outcome, Side, SubmitResult};
pub use store::{BookStore, MemoryStore, SledStore};

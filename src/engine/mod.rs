pub mod book;
pub mod keys;
pub mod locks;
pub mod matcher;
pub mod orchestrator;
pub mod publisher;
pub mod queue;
pub mod types;

pub use book::Book;
pub use orchestrator::Engine;
pub use queue::PriceLevelQueue;
pub use types::*;

//! Event publishing boundary.
//!
//! The engine publishes JSON payloads on two topics: new-order intake (before
//! matching) and match/cancel outcomes. Delivery is at-least-once and the engine
//! never waits on subscribers.

pub mod channel;
pub use channel::ChannelBus;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("event bus closed: {0}")]
    Closed(String),

    #[error("failed to encode event payload: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topics {
    pub intake: String,
    pub matches: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            intake: "doOrder".to_string(),
            matches: "matchOrder".to_string(),
        }
    }
}

/// One published message as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub topic: String,
    pub payload: String,
}

impl Envelope {
    pub fn encode<T: Serialize>(topic: &str, event: &T) -> BusResult<Self> {
        Ok(Self {
            topic: topic.to_string(),
            payload: serde_json::to_string(event)?,
        })
    }

    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> BusResult<T> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, envelope: Envelope) -> BusResult<()>;
}

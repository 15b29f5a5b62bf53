//! Stage-to-stage message transport
//!
//! Delivery is at-least-once: a received message stays owned by the consumer
//! until it is acknowledged, and an unacknowledged message can be delivered
//! again. Ordering holds within a topic only.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::TransportError;

pub use memory::MemoryTransport;
pub use postgres::PgQueueTransport;

/// A received message awaiting acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: i64,
    pub topic: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Next message on `topic`, or `None` when nothing arrived within the
    /// transport's poll window
    async fn receive(&self, topic: &str) -> Result<Option<Delivery>, TransportError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

//! Broker transport contract
//!
//! The pipeline runs on a durable, multi-consumer work-queue service with
//! at-least-once delivery and manual acknowledgment. That service is an
//! external collaborator; this crate owns only the contract the rest of the
//! workspace programs against, plus an in-memory implementation with the same
//! semantics for local runs and tests.
//!
//! Contract rules callers rely on:
//!
//! - Named queues, declared before use; publishing to an undeclared queue is
//!   an error, declaring an existing queue is not.
//! - Each message goes to exactly one of the queue's consumers (competing
//!   consumers), and stays unacknowledged until `ack` or `nack_requeue`.
//! - `nack_requeue` returns the message to the back of its queue with an
//!   incremented redelivery count, so a mismatched message cannot head-block
//!   the queue for other consumers.

pub mod memory;

pub use memory::MemoryBroker;

use async_trait::async_trait;
use thiserror::Error;

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Transport-level failures
///
/// These are connection/protocol errors, never business outcomes; per the
/// pipeline's error policy they are fatal to the owning process.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Queue was never declared (or has been deleted)
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    /// Delivery tag does not match an outstanding unacknowledged message
    #[error("unknown delivery tag: {0}")]
    UnknownDelivery(u64),

    /// Underlying connection failed
    #[error("broker connection lost: {0}")]
    ConnectionLost(String),
}

/// One message handed to a consumer
///
/// Must be settled exactly once via [`Broker::ack`] or
/// [`Broker::nack_requeue`]; an unsettled delivery is redelivered by a real
/// broker once the consumer dies.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-assigned settlement handle
    pub tag: u64,
    /// Queue the message was consumed from
    pub queue: String,
    /// Raw payload (JSON envelopes in this pipeline)
    pub body: Vec<u8>,
    /// How many times this message has been requeued already
    pub redeliveries: u32,
}

/// The work-queue service seam
///
/// Injected everywhere a broker handle is needed; tests and local runs use
/// [`MemoryBroker`], a production deployment would bind a real client behind
/// the same trait.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a durable queue. Idempotent.
    async fn declare_queue(&self, name: &str) -> Result<()>;

    /// Declare a uniquely-named exclusive reply queue and return its name.
    ///
    /// The caller owns the queue and deletes it after its single-shot
    /// request/response completes.
    async fn declare_reply_queue(&self, prefix: &str) -> Result<String>;

    /// Delete a queue, waking any blocked consumers with end-of-stream.
    async fn delete_queue(&self, name: &str) -> Result<()>;

    /// Publish a message to a declared queue.
    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<()>;

    /// Register a consumer on a queue.
    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>>;

    /// Acknowledge a delivery, removing it for good.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Reject a delivery and return it to the back of its queue.
    async fn nack_requeue(&self, delivery: &Delivery) -> Result<()>;
}

/// Pull-style consumer handle
#[async_trait]
pub trait Consumer: Send {
    /// Wait for the next delivery.
    ///
    /// Returns `Ok(None)` when the queue has been deleted and drained, the
    /// consumer's end-of-stream.
    async fn next(&mut self) -> Result<Option<Delivery>>;
}

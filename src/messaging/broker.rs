use async_trait::async_trait;
use std::collections::HashMap;

use crate::utils::IsTransient;

// ============================================================================
// Broker Seam
// ============================================================================
//
// Outbound: `MessageSink::send` writes one message to a routing key.
// Inbound:  `BrokerConnector::connect` opens a `Subscription` for one queue,
//           which is declared, read, and acked/rejected message by message.
//
// Implementations: `redpanda` (rdkafka) and `memory` (in-process).
//
// ============================================================================

pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_EVENT_TYPE: &str = "event-type";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Broker connection lost: {0}")]
    ConnectionLost(String),

    #[error("Failed to declare queue {queue}: {reason}")]
    Declare { queue: String, reason: String },

    #[error("Broker operation failed: {0}")]
    Operation(String),
}

impl IsTransient for BrokerError {
    fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_) | BrokerError::ConnectionLost(_))
    }
}

/// A message on its way to the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub routing_key: String,
    /// Partitioning key; the order id for lifecycle events.
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl OutboundMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A message received from a queue, owned so it can cross await points.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub routing_key: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub redelivered: bool,
}

impl Delivery {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(HEADER_CONTENT_TYPE).map(String::as_str)
    }
}

#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Returns once the broker has accepted the message.
    async fn send(&self, message: OutboundMessage) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open a connection for `queue`. Fails with `Unavailable` when the
    /// broker cannot be reached.
    async fn connect(&self, queue: &str) -> Result<Box<dyn Subscription>, BrokerError>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Create the queue if needed and bind it to `routing_keys`.
    async fn declare(&mut self, routing_keys: &[String]) -> Result<(), BrokerError>;

    /// Wait for the next message. Cancel-safe: dropping the future loses
    /// nothing.
    async fn recv(&mut self) -> Result<Delivery, BrokerError>;

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;

    async fn reject(&mut self, delivery: &Delivery, requeue: bool) -> Result<(), BrokerError>;

    async fn close(&mut self);
}

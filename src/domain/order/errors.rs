use super::events::EventType;
use super::value_objects::{OrderId, OrderStatus};

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("Order id cannot be empty")]
    EmptyOrderId,

    #[error("{event} requires status {expected}, but order is {actual}")]
    PreconditionFailed {
        event: EventType,
        expected: OrderStatus,
        actual: OrderStatus,
    },

    #[error("Order not found: {0}")]
    NotFound(OrderId),
}

// ============================================================================
// Order Store - the persistence seam
// ============================================================================
//
// The relational persistence layer lives outside this crate. Handlers only
// need two operations, and the second one must be an atomic
// compare-and-set so that two concurrent deliveries of the same event cannot
// both win the precondition check.
//
// ============================================================================

mod memory;

use async_trait::async_trait;

use crate::domain::order::{OrderId, OrderStatus};
use crate::utils::IsTransient;

pub use memory::InMemoryOrderStore;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    #[error("Status conflict: expected {expected}, found {actual}")]
    StatusConflict {
        expected: OrderStatus,
        actual: OrderStatus,
    },

    #[error("Order store unavailable: {0}")]
    Unavailable(String),
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Current status, or `None` if the order does not exist.
    async fn get_order_status(&self, order_id: &OrderId) -> Result<Option<OrderStatus>, StoreError>;

    /// Move the order from `expected` to `new` atomically.
    ///
    /// Fails with `StatusConflict` if the stored status is not `expected`
    /// at write time.
    async fn set_order_status(
        &self,
        order_id: &OrderId,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<(), StoreError>;
}

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::domain::order::{Order, OrderId, OrderStatus};
use super::{OrderStore, StoreError};

/// Process-local order table.
///
/// A single mutex guards the whole map, so read-compare-write in
/// `set_order_status` cannot interleave with another writer.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<HashMap<OrderId, Order>>,
    unavailable: AtomicBool,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an order (what the command layer does on create).
    pub async fn insert(&self, order: Order) {
        let mut orders = self.orders.lock().await;
        orders.insert(order.id.clone(), order);
    }

    pub async fn get(&self, order_id: &OrderId) -> Option<Order> {
        let orders = self.orders.lock().await;
        orders.get(order_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.orders.lock().await.len()
    }

    /// Simulate an outage: every call fails with `Unavailable` until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get_order_status(&self, order_id: &OrderId) -> Result<Option<OrderStatus>, StoreError> {
        self.check_available()?;
        let orders = self.orders.lock().await;
        Ok(orders.get(order_id).map(|order| order.status))
    }

    async fn set_order_status(
        &self,
        order_id: &OrderId,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut orders = self.orders.lock().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| StoreError::NotFound(order_id.clone()))?;

        if order.status != expected {
            return Err(StoreError::StatusConflict {
                expected,
                actual: order.status,
            });
        }

        order.status = new;
        order.updated_at = Utc::now();
        Ok(())
    }
}

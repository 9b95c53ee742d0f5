use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;

use super::errors::OrderError;

// ============================================================================
// Order Value Objects
// ============================================================================

/// Identifier of the order an event is about.
///
/// Always non-empty: the constructor trims and rejects blank input, and
/// deserialization goes through the same check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderId(String);

impl OrderId {
    pub fn new(raw: impl Into<String>) -> Result<Self, OrderError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(OrderError::EmptyOrderId);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OrderId {
    type Error = OrderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OrderId> for String {
    fn from(id: OrderId) -> Self {
        id.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderItem {
    #[serde(alias = "item_id")]
    pub product_id: u64,
    pub quantity: u32,
}

/// Lifecycle status of an order, in strict forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    PendingPayment,
    InPreparation,
    ReadyToShip,
    Shipped,
    Delivered,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Created,
        OrderStatus::PendingPayment,
        OrderStatus::InPreparation,
        OrderStatus::ReadyToShip,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ];

    /// The only status reachable from this one, if any.
    pub fn next(self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Created => Some(OrderStatus::PendingPayment),
            OrderStatus::PendingPayment => Some(OrderStatus::InPreparation),
            OrderStatus::InPreparation => Some(OrderStatus::ReadyToShip),
            OrderStatus::ReadyToShip => Some(OrderStatus::Shipped),
            OrderStatus::Shipped => Some(OrderStatus::Delivered),
            OrderStatus::Delivered => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::PendingPayment => "pending_payment",
            OrderStatus::InPreparation => "in_preparation",
            OrderStatus::ReadyToShip => "ready_to_ship",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order record as owned by the persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// A freshly inserted order, before `OrderCreated` has been handled.
    pub fn new(id: OrderId, items: Vec<OrderItem>) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: OrderStatus::Created,
            items,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

use serde_json::Value;

use crate::notify::{Notification, Recipient};
use super::errors::OrderError;
use super::events::{EventType, OrderCreatedPayload, ShippedPayload};
use super::value_objects::{OrderId, OrderStatus};

// ============================================================================
// Order State Machine - Pure transition decisions
// ============================================================================
//
// created -> pending_payment -> in_preparation -> ready_to_ship -> shipped -> delivered
//
// Every lifecycle event maps to exactly one forward step. Nothing here does
// I/O: handlers read the current status, ask `decide`, persist the result and
// then send the notification built by `Transition::notification`.
//
// ============================================================================

/// A single forward step triggered by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub event: EventType,
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// The transition table. Total over `EventType`.
pub fn transition_for(event: EventType) -> Transition {
    let (from, to) = match event {
        EventType::OrderCreated => (OrderStatus::Created, OrderStatus::PendingPayment),
        EventType::OrderPaid => (OrderStatus::PendingPayment, OrderStatus::InPreparation),
        EventType::OrderReadyToShip => (OrderStatus::InPreparation, OrderStatus::ReadyToShip),
        EventType::Shipped => (OrderStatus::ReadyToShip, OrderStatus::Shipped),
        EventType::Delivered => (OrderStatus::Shipped, OrderStatus::Delivered),
    };
    Transition { event, from, to }
}

/// Decide whether `event` may be applied to an order currently in `current`.
///
/// Stale, duplicated and out-of-order events all fail the precondition.
pub fn decide(event: EventType, current: OrderStatus) -> Result<Transition, OrderError> {
    let transition = transition_for(event);
    if transition.from != current {
        return Err(OrderError::PreconditionFailed {
            event,
            expected: transition.from,
            actual: current,
        });
    }
    Ok(transition)
}

impl Transition {
    pub fn recipient(&self) -> Recipient {
        match self.event {
            EventType::OrderCreated | EventType::Shipped | EventType::Delivered => Recipient::Customer,
            EventType::OrderPaid => Recipient::Supplier,
            EventType::OrderReadyToShip => Recipient::Carrier,
        }
    }

    /// Render the side-effect notification for this step. Payload fields that
    /// cannot be read are left out of the message.
    pub fn notification(&self, order_id: &OrderId, payload: &Value) -> Notification {
        let message = match self.event {
            EventType::OrderCreated => match OrderCreatedPayload::from_event(payload).total_price {
                Some(total) => format!("Please pay for order {} with total amount ${:.2}", order_id, total),
                None => format!("Please pay for order {}", order_id),
            },
            EventType::OrderPaid => format!("Prepare the package for order {}", order_id),
            EventType::OrderReadyToShip => format!("Pick up the package for order {}", order_id),
            EventType::Shipped => {
                let shipped = ShippedPayload::from_event(payload);
                match (shipped.carrier, shipped.tracking_number) {
                    (Some(carrier), Some(tracking)) => format!(
                        "Your order {} is on its way with {} (tracking {})",
                        order_id, carrier, tracking
                    ),
                    (Some(carrier), None) => format!("Your order {} is on its way with {}", order_id, carrier),
                    _ => format!("Your order {} is on its way.", order_id),
                }
            }
            EventType::Delivered => format!("Your order {} has been delivered.", order_id),
        };

        Notification {
            order_id: order_id.clone(),
            event_type: self.event,
            recipient: self.recipient(),
            message,
        }
    }
}

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::value_objects::OrderItem;

// ============================================================================
// Order Lifecycle Events
// ============================================================================

/// The closed set of lifecycle events the engine understands.
///
/// The serialized name (`"OrderCreated"`, `"Shipped"`, ...) is the value of
/// the envelope's `event_type` field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    OrderCreated,
    OrderPaid,
    OrderReadyToShip,
    Shipped,
    Delivered,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::OrderCreated,
        EventType::OrderPaid,
        EventType::OrderReadyToShip,
        EventType::Shipped,
        EventType::Delivered,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::OrderCreated => "OrderCreated",
            EventType::OrderPaid => "OrderPaid",
            EventType::OrderReadyToShip => "OrderReadyToShip",
            EventType::Shipped => "Shipped",
            EventType::Delivered => "Delivered",
        }
    }

    /// Routing key (topic name without prefix) this event is published on.
    pub fn routing_key(self) -> &'static str {
        match self {
            EventType::OrderCreated => "orders.created",
            EventType::OrderPaid => "orders.paid",
            EventType::OrderReadyToShip => "orders.ready_to_ship",
            EventType::Shipped => "orders.shipped",
            EventType::Delivered => "orders.delivered",
        }
    }

    /// The event that follows this one in the lifecycle.
    pub fn next(self) -> Option<EventType> {
        match self {
            EventType::OrderCreated => Some(EventType::OrderPaid),
            EventType::OrderPaid => Some(EventType::OrderReadyToShip),
            EventType::OrderReadyToShip => Some(EventType::Shipped),
            EventType::Shipped => Some(EventType::Delivered),
            EventType::Delivered => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload of `OrderCreated`: what the customer is asked to pay.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OrderCreatedPayload {
    #[serde(default)]
    pub total_price: Option<f64>,
    #[serde(default)]
    pub items: Option<Vec<OrderItem>>,
}

impl OrderCreatedPayload {
    /// Read whatever fields are readable. Prices may arrive as numbers or
    /// decimal strings.
    pub fn from_event(payload: &Value) -> Self {
        Self {
            total_price: price_field(payload, "total_price"),
            items: lenient_field(payload, "items"),
        }
    }
}

/// Payload of `Shipped`: who carries the package.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ShippedPayload {
    #[serde(default)]
    pub carrier: Option<String>,
    #[serde(default)]
    pub tracking_number: Option<String>,
}

impl ShippedPayload {
    pub fn from_event(payload: &Value) -> Self {
        Self {
            carrier: lenient_field(payload, "carrier"),
            tracking_number: lenient_field(payload, "tracking_number"),
        }
    }
}

// Unreadable fields are dropped with a warning; they never fail the event.
fn lenient_field<T: DeserializeOwned>(payload: &Value, field: &str) -> Option<T> {
    let value = payload.get(field).filter(|value| !value.is_null())?;
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(field = %field, error = %e, "Ignoring unreadable payload field");
            None
        }
    }
}

fn price_field(payload: &Value, field: &str) -> Option<f64> {
    let parsed = match payload.get(field)? {
        Value::Null => return None,
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    if parsed.is_none() {
        tracing::warn!(field = %field, "Ignoring unreadable price");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_parse() {
        for event in EventType::ALL {
            assert_eq!(event.as_str().parse::<EventType>().unwrap(), event);
        }
        assert_eq!(
            "order.created".parse::<EventType>(),
            Err(UnknownEventType("order.created".to_string()))
        );
    }

    #[test]
    fn test_event_type_serializes_as_name() {
        let json = serde_json::to_string(&EventType::OrderReadyToShip).unwrap();
        assert_eq!(json, "\"OrderReadyToShip\"");
    }

    #[test]
    fn test_routing_keys_are_distinct() {
        let mut keys: Vec<_> = EventType::ALL.iter().map(|e| e.routing_key()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), EventType::ALL.len());
    }

    #[test]
    fn test_lifecycle_chain() {
        let mut event = EventType::OrderCreated;
        let mut count = 1;
        while let Some(next) = event.next() {
            event = next;
            count += 1;
        }
        assert_eq!(event, EventType::Delivered);
        assert_eq!(count, 5);
    }

    #[test]
    fn test_created_payload_reads_loose_shapes() {
        let payload = OrderCreatedPayload::from_event(&json!({"items": null, "total_price": "10.50"}));
        assert_eq!(payload.total_price, Some(10.5));
        assert_eq!(payload.items, None);

        let payload = OrderCreatedPayload::from_event(&json!({"items": [{"item_id": 1, "quantity": 2}]}));
        assert_eq!(payload.items, Some(vec![OrderItem { product_id: 1, quantity: 2 }]));

        let payload = OrderCreatedPayload::from_event(&json!({"total_price": "lots", "items": "none"}));
        assert_eq!(payload, OrderCreatedPayload::default());

        assert_eq!(OrderCreatedPayload::from_event(&Value::Null), OrderCreatedPayload::default());
    }

    #[test]
    fn test_shipped_payload_ignores_bad_fields() {
        let payload = ShippedPayload::from_event(&json!({"carrier": "DHL", "tracking_number": 12}));
        assert_eq!(payload.carrier.as_deref(), Some("DHL"));
        assert_eq!(payload.tracking_number, None);
    }

    #[test]
    fn test_payload_tolerates_missing_fields() {
        let payload: OrderCreatedPayload = serde_json::from_str("{}").unwrap();
        assert_eq!(payload, OrderCreatedPayload::default());

        let payload: ShippedPayload =
            serde_json::from_str(r#"{"carrier":"FedEx","tracking_number":"FX1","extra":1}"#).unwrap();
        assert_eq!(payload.carrier.as_deref(), Some("FedEx"));
    }
}

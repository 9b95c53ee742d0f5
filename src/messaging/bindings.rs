use crate::domain::order::EventType;

// ============================================================================
// Consumer Bindings - which queue receives which events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerBinding {
    pub queue: &'static str,
    pub event_types: &'static [EventType],
}

pub const ORDER_EVENTS: &str = "order-events";
pub const SUPPLIER_EVENTS: &str = "supplier-events";
pub const CARRIER_EVENTS: &str = "carrier-events";

pub static BINDINGS: [ConsumerBinding; 3] = [
    ConsumerBinding {
        queue: ORDER_EVENTS,
        event_types: &[EventType::OrderCreated, EventType::Shipped, EventType::Delivered],
    },
    ConsumerBinding {
        queue: SUPPLIER_EVENTS,
        event_types: &[EventType::OrderPaid],
    },
    ConsumerBinding {
        queue: CARRIER_EVENTS,
        event_types: &[EventType::OrderReadyToShip],
    },
];

impl ConsumerBinding {
    pub fn for_queue(queue: &str) -> Option<&'static ConsumerBinding> {
        BINDINGS.iter().find(|binding| binding.queue == queue)
    }

    /// Routing keys this queue must be bound to, with the topic prefix applied.
    pub fn routing_keys(&self, prefix: &str) -> Vec<String> {
        self.event_types
            .iter()
            .map(|event| routing_key(prefix, *event))
            .collect()
    }
}

pub fn routing_key(prefix: &str, event_type: EventType) -> String {
    with_prefix(prefix, event_type.routing_key())
}

pub fn with_prefix(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}{}", prefix, name)
    }
}

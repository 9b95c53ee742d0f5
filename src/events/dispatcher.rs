use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::domain::order::EventType;
use super::envelope::EventEnvelope;

// ============================================================================
// Event Dispatcher - pure routing from event type to handler
// ============================================================================
//
// The registry is assembled once at startup through `HandlerRegistryBuilder`
// and frozen by `build()`. After that it is only ever read, shared behind an
// `Arc`, so dispatch takes no locks.
//
// ============================================================================

/// What happened to an event, as reported back to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Success,
    /// A dependency was unreachable; redelivery may succeed.
    TransientFailure(String),
    /// The event can never be applied (stale, duplicate, out of order, invalid).
    PermanentFailure(String),
    /// No handler is registered for the event type.
    Unhandled,
}

impl HandlerOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            HandlerOutcome::Success => "success",
            HandlerOutcome::TransientFailure(_) => "transient_failure",
            HandlerOutcome::PermanentFailure(_) => "permanent_failure",
            HandlerOutcome::Unhandled => "unhandled",
        }
    }
}

impl fmt::Display for HandlerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerOutcome::TransientFailure(reason) | HandlerOutcome::PermanentFailure(reason) => {
                write!(f, "{}: {}", self.label(), reason)
            }
            _ => f.write_str(self.label()),
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &EventEnvelope) -> HandlerOutcome;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("A handler is already registered for {0}")]
    DuplicateHandler(EventType),
}

/// Mutable only while being built.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Self, RegistryError> {
        if self.handlers.contains_key(&event_type) {
            return Err(RegistryError::DuplicateHandler(event_type));
        }
        tracing::info!(event_type = %event_type, "Registered handler");
        self.handlers.insert(event_type, handler);
        Ok(self)
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}

/// Frozen `event_type -> handler` table.
pub struct HandlerRegistry {
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    pub fn get(&self, event_type: EventType) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(&event_type)
    }

    pub fn event_types(&self) -> Vec<EventType> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort();
        types
    }
}

#[derive(Clone)]
pub struct EventDispatcher {
    registry: Arc<HandlerRegistry>,
}

impl EventDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Route the envelope to its handler and return the outcome unchanged.
    pub async fn dispatch(&self, envelope: &EventEnvelope) -> HandlerOutcome {
        match self.registry.get(envelope.event_type()) {
            Some(handler) => {
                tracing::debug!(
                    event_id = %envelope.event_id(),
                    event_type = %envelope.event_type(),
                    order_id = %envelope.order_id(),
                    "Dispatching event"
                );
                handler.handle(envelope).await
            }
            None => {
                tracing::warn!(
                    event_type = %envelope.event_type(),
                    order_id = %envelope.order_id(),
                    "No handler registered for event"
                );
                HandlerOutcome::Unhandled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderId;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Fixed {
        outcome: HandlerOutcome,
        calls: AtomicU32,
    }

    impl Fixed {
        fn new(outcome: HandlerOutcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl EventHandler for Fixed {
        async fn handle(&self, _envelope: &EventEnvelope) -> HandlerOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn envelope(event_type: EventType) -> EventEnvelope {
        EventEnvelope::new(event_type, OrderId::new("1").unwrap(), Value::Null)
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let result = HandlerRegistry::builder()
            .register(EventType::OrderPaid, Fixed::new(HandlerOutcome::Success))
            .and_then(|b| b.register(EventType::OrderPaid, Fixed::new(HandlerOutcome::Success)));

        assert_eq!(result.err(), Some(RegistryError::DuplicateHandler(EventType::OrderPaid)));
    }

    #[tokio::test]
    async fn test_dispatch_routes_to_matching_handler() {
        let paid = Fixed::new(HandlerOutcome::Success);
        let shipped = Fixed::new(HandlerOutcome::PermanentFailure("stale".into()));

        let registry = HandlerRegistry::builder()
            .register(EventType::OrderPaid, paid.clone())
            .unwrap()
            .register(EventType::Shipped, shipped.clone())
            .unwrap()
            .build();
        let dispatcher = EventDispatcher::new(Arc::new(registry));

        assert_eq!(dispatcher.dispatch(&envelope(EventType::OrderPaid)).await, HandlerOutcome::Success);
        assert_eq!(
            dispatcher.dispatch(&envelope(EventType::Shipped)).await,
            HandlerOutcome::PermanentFailure("stale".into())
        );
        assert_eq!(paid.calls.load(Ordering::SeqCst), 1);
        assert_eq!(shipped.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_unregistered_is_unhandled() {
        let dispatcher = EventDispatcher::new(Arc::new(HandlerRegistry::builder().build()));
        assert_eq!(
            dispatcher.dispatch(&envelope(EventType::Delivered)).await,
            HandlerOutcome::Unhandled
        );
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(HandlerOutcome::Success.to_string(), "success");
        assert_eq!(
            HandlerOutcome::TransientFailure("db down".into()).to_string(),
            "transient_failure: db down"
        );
    }
}

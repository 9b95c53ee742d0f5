use serde_json::Value;
use std::sync::Arc;

use super::bindings::routing_key;
use super::broker::{BrokerError, MessageSink, OutboundMessage, HEADER_CONTENT_TYPE, HEADER_EVENT_TYPE};
use crate::domain::order::{EventType, OrderId};
use crate::events::{EventEnvelope, CONTENT_TYPE};
use crate::metrics::Metrics;

// ============================================================================
// Event Publisher
// ============================================================================
//
// Builds the envelope, encodes it, and waits until the broker accepted it.
// Either the broker has the message or the caller gets an error; there is no
// partial effect.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(#[from] BrokerError),

    #[error("Failed to serialize event: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct EventPublisher {
    sink: Arc<dyn MessageSink>,
    topic_prefix: String,
    metrics: Arc<Metrics>,
}

impl EventPublisher {
    pub fn new(sink: Arc<dyn MessageSink>, topic_prefix: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            sink,
            topic_prefix: topic_prefix.into(),
            metrics,
        }
    }

    pub async fn publish(
        &self,
        event_type: EventType,
        order_id: OrderId,
        payload: Value,
    ) -> Result<(), PublishError> {
        let envelope = EventEnvelope::new(event_type, order_id, payload);
        self.publish_envelope(&envelope).await
    }

    pub async fn publish_envelope(&self, envelope: &EventEnvelope) -> Result<(), PublishError> {
        let event_type = envelope.event_type();
        let body = envelope.encode()?;

        let message = OutboundMessage {
            routing_key: routing_key(&self.topic_prefix, event_type),
            key: envelope.order_id().to_string(),
            payload: body,
            headers: vec![
                (HEADER_CONTENT_TYPE.to_string(), CONTENT_TYPE.to_string()),
                (HEADER_EVENT_TYPE.to_string(), event_type.to_string()),
            ],
        };

        match self.sink.send(message).await {
            Ok(()) => {
                self.metrics
                    .events_published
                    .with_label_values(&[event_type.as_str()])
                    .inc();
                tracing::info!(
                    event_id = %envelope.event_id(),
                    event_type = %event_type,
                    order_id = %envelope.order_id(),
                    "Published event"
                );
                Ok(())
            }
            Err(e) => {
                self.metrics
                    .events_publish_failed
                    .with_label_values(&[event_type.as_str()])
                    .inc();
                tracing::error!(
                    event_type = %event_type,
                    order_id = %envelope.order_id(),
                    error = %e,
                    "Failed to publish event"
                );
                Err(PublishError::BrokerUnavailable(e))
            }
        }
    }
}

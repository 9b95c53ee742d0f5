use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

use super::errors::OrderError;
use super::events::EventType;
use super::state_machine::{decide, Transition};
use crate::events::{EventEnvelope, EventHandler, HandlerOutcome, HandlerRegistryBuilder, RegistryError};
use crate::messaging::EventPublisher;
use crate::metrics::Metrics;
use crate::notify::{Notification, Notifier};
use crate::store::{OrderStore, StoreError};
use crate::utils::IsTransient;

// ============================================================================
// Order Lifecycle Handlers
// ============================================================================
//
// One handler per lifecycle event, all sharing the same three steps:
//
//   1. read the current status
//   2. decide (pure, see state_machine)
//   3. compare-and-set the new status
//
// Only after the commit are side effects run: the notification and the
// optional follow-on event. Neither can undo the transition.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Rule(#[from] OrderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IsTransient for HandlerError {
    fn is_transient(&self) -> bool {
        match self {
            HandlerError::Rule(_) => false,
            HandlerError::Store(e) => e.is_transient(),
        }
    }
}

impl From<HandlerError> for HandlerOutcome {
    fn from(error: HandlerError) -> Self {
        if error.is_transient() {
            HandlerOutcome::TransientFailure(error.to_string())
        } else {
            HandlerOutcome::PermanentFailure(error.to_string())
        }
    }
}

/// Publishes the next lifecycle event for the configured event types.
#[derive(Clone)]
pub struct AutoAdvance {
    publisher: EventPublisher,
    events: HashSet<EventType>,
}

impl AutoAdvance {
    pub fn new(publisher: EventPublisher, events: impl IntoIterator<Item = EventType>) -> Self {
        Self {
            publisher,
            events: events.into_iter().collect(),
        }
    }
}

/// Collaborators every handler needs.
#[derive(Clone)]
pub struct HandlerContext {
    pub store: Arc<dyn OrderStore>,
    pub notifier: Arc<dyn Notifier>,
    pub metrics: Arc<Metrics>,
    pub auto_advance: Option<AutoAdvance>,
}

pub struct OrderTransitionHandler {
    event: EventType,
    ctx: HandlerContext,
}

impl OrderTransitionHandler {
    pub fn new(event: EventType, ctx: HandlerContext) -> Self {
        Self { event, ctx }
    }

    async fn apply(&self, envelope: &EventEnvelope) -> Result<(Transition, Notification), HandlerError> {
        let order_id = envelope.order_id();

        let current = self
            .ctx
            .store
            .get_order_status(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_id.clone()))?;

        let transition = decide(self.event, current)?;

        let notification = transition.notification(order_id, envelope.payload());

        self.ctx
            .store
            .set_order_status(order_id, transition.from, transition.to)
            .await?;

        Ok((transition, notification))
    }

    async fn notify(&self, notification: &Notification) {
        if let Err(e) = self.ctx.notifier.notify(notification).await {
            self.ctx
                .metrics
                .notifications_failed
                .with_label_values(&[notification.recipient.as_str()])
                .inc();
            tracing::warn!(
                order_id = %notification.order_id,
                recipient = %notification.recipient,
                error = %e,
                "Notification failed, transition kept"
            );
        }
    }

    async fn advance(&self, envelope: &EventEnvelope) {
        let Some(auto) = &self.ctx.auto_advance else {
            return;
        };
        if !auto.events.contains(&self.event) {
            return;
        }
        let Some(next) = self.event.next() else {
            return;
        };

        let order_id = envelope.order_id().clone();
        if let Err(e) = auto
            .publisher
            .publish(next, order_id.clone(), Value::Object(Map::new()))
            .await
        {
            tracing::error!(
                order_id = %order_id,
                next_event = %next,
                error = %e,
                "Failed to publish follow-on event"
            );
        }
    }
}

#[async_trait]
impl EventHandler for OrderTransitionHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> HandlerOutcome {
        match self.apply(envelope).await {
            Ok((transition, notification)) => {
                tracing::info!(
                    order_id = %envelope.order_id(),
                    event_type = %self.event,
                    from = %transition.from,
                    to = %transition.to,
                    "✅ Order status updated"
                );
                self.notify(&notification).await;
                self.advance(envelope).await;
                HandlerOutcome::Success
            }
            Err(e) => {
                tracing::warn!(
                    order_id = %envelope.order_id(),
                    event_type = %self.event,
                    transient = e.is_transient(),
                    error = %e,
                    "Event not applied"
                );
                e.into()
            }
        }
    }
}

/// Register one transition handler per lifecycle event.
pub fn register_order_handlers(
    mut builder: HandlerRegistryBuilder,
    ctx: &HandlerContext,
) -> Result<HandlerRegistryBuilder, RegistryError> {
    for event in EventType::ALL {
        builder = builder.register(event, Arc::new(OrderTransitionHandler::new(event, ctx.clone())))?;
    }
    Ok(builder)
}

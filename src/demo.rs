use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::order::{EventType, Order, OrderId, OrderItem, OrderStatus};
use crate::messaging::EventPublisher;
use crate::store::InMemoryOrderStore;

// ============================================================================
// Demo - walk one order through its whole lifecycle
// ============================================================================
//
// Plays the command layer: inserts the order, then publishes each event once
// the previous one has been applied by the consumers.
//
// ============================================================================

const STEP_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub async fn run_demo(store: &InMemoryOrderStore, publisher: &EventPublisher) -> anyhow::Result<OrderId> {
    let order_id = OrderId::new(Uuid::now_v7().to_string())?;
    let items = vec![
        OrderItem { product_id: 1, quantity: 2 },
        OrderItem { product_id: 7, quantity: 1 },
    ];
    store.insert(Order::new(order_id.clone(), items.clone())).await;
    tracing::info!(order_id = %order_id, "📝 Demo order created");

    for event_type in EventType::ALL {
        let payload = match event_type {
            EventType::OrderCreated => json!({ "total_price": 59.97, "items": items }),
            EventType::Shipped => json!({ "carrier": "DHL", "tracking_number": "JD014600006281" }),
            _ => json!({}),
        };
        publisher.publish(event_type, order_id.clone(), payload).await?;

        let target = crate::domain::order::transition_for(event_type).to;
        wait_for_status(store, &order_id, target).await?;
    }

    tracing::info!(order_id = %order_id, "🎉 Demo order delivered");
    Ok(order_id)
}

async fn wait_for_status(store: &InMemoryOrderStore, order_id: &OrderId, status: OrderStatus) -> anyhow::Result<()> {
    let reached = tokio::time::timeout(STEP_TIMEOUT, async {
        loop {
            if store.get(order_id).await.map(|order| order.status) == Some(status) {
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await;

    reached.map_err(|_| anyhow::anyhow!("order {} did not reach {} in time", order_id, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{ConsumerSettings, ConsumerState, EventConsumer};
    use crate::domain::order::{register_order_handlers, HandlerContext};
    use crate::events::{EventDispatcher, HandlerRegistry};
    use crate::messaging::{InMemoryBroker, BINDINGS};
    use crate::metrics::Metrics;
    use crate::notify::RecordingNotifier;
    use std::sync::Arc;
    use tokio::sync::watch;

    #[tokio::test]
    async fn test_demo_reaches_delivered() {
        let broker = InMemoryBroker::new();
        let store = Arc::new(InMemoryOrderStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let publisher = EventPublisher::new(Arc::new(broker.clone()), "", metrics.clone());

        let ctx = HandlerContext {
            store: store.clone(),
            notifier: notifier.clone(),
            metrics: metrics.clone(),
            auto_advance: None,
        };
        let registry = register_order_handlers(HandlerRegistry::builder(), &ctx).unwrap().build();
        let dispatcher = EventDispatcher::new(Arc::new(registry));

        let (shutdown, _) = watch::channel(false);
        let mut handles = Vec::new();
        for binding in BINDINGS.iter() {
            let consumer = EventConsumer::new(
                ConsumerSettings::for_binding(binding, ""),
                Arc::new(broker.clone()),
                dispatcher.clone(),
                metrics.clone(),
            );
            let mut state = consumer.subscribe_state();
            handles.push(tokio::spawn(consumer.run(shutdown.subscribe())));
            state.wait_for(|s| *s == ConsumerState::Listening).await.unwrap();
        }

        let order_id = run_demo(&store, &publisher).await.unwrap();

        assert_eq!(store.get(&order_id).await.unwrap().status, OrderStatus::Delivered);
        let messages: Vec<String> = notifier.sent().into_iter().map(|n| n.message).collect();
        assert_eq!(messages.len(), 5);
        assert!(messages[0].ends_with("with total amount $59.97"));
        assert!(messages[3].contains("DHL (tracking JD014600006281)"));

        shutdown.send_replace(true);
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
    }
}

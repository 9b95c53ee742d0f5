use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::state::{AckDecision, ConsumerState};
use crate::events::{EventDispatcher, EventEnvelope, HandlerOutcome};
use crate::messaging::{
    BrokerConnector, BrokerError, ConsumerBinding, DeadLetter, DeadLetterReason, DeadLetterSink, Delivery,
    Subscription,
};
use crate::metrics::Metrics;
use crate::utils::{retry_until_shutdown, wait_for_shutdown, IsTransient, RetryConfig, RetryResult};

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// Every attempt failed, or one failed with a permanent error.
    #[error("Queue {queue}: gave up connecting after {attempts} attempt(s): {last_error}")]
    ConnectionExhausted {
        queue: String,
        attempts: u32,
        last_error: BrokerError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerSettings {
    pub queue: String,
    pub routing_keys: Vec<String>,
    /// Connection attempts and the fixed wait between them.
    pub connect_retry: RetryConfig,
    /// Pause before handing a transiently failed message back to the broker.
    pub redelivery_delay: Duration,
}

impl ConsumerSettings {
    pub fn for_binding(binding: &ConsumerBinding, topic_prefix: &str) -> Self {
        Self {
            queue: binding.queue.to_string(),
            routing_keys: binding.routing_keys(topic_prefix),
            connect_retry: RetryConfig::fixed(5, Duration::from_secs(5)),
            redelivery_delay: Duration::from_millis(500),
        }
    }

    pub fn with_connect_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.connect_retry = RetryConfig::fixed(max_attempts, backoff);
        self
    }

    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }
}

enum ListenExit {
    Shutdown,
    ConnectionLost(BrokerError),
}

pub struct EventConsumer {
    settings: ConsumerSettings,
    connector: Arc<dyn BrokerConnector>,
    dispatcher: EventDispatcher,
    dead_letters: Option<DeadLetterSink>,
    metrics: Arc<Metrics>,
    state: watch::Sender<ConsumerState>,
}

impl EventConsumer {
    pub fn new(
        settings: ConsumerSettings,
        connector: Arc<dyn BrokerConnector>,
        dispatcher: EventDispatcher,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Disconnected { attempt: 0 });
        Self {
            settings,
            connector,
            dispatcher,
            dead_letters: None,
            metrics,
            state,
        }
    }

    pub fn with_dead_letters(mut self, sink: DeadLetterSink) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    pub fn queue(&self) -> &str {
        &self.settings.queue
    }

    /// Observe state changes; the receiver stays valid after `run` returns.
    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConsumerState) {
        self.metrics
            .consumer_state
            .with_label_values(&[self.settings.queue.as_str()])
            .set(state.as_gauge());
        tracing::debug!(queue = %self.settings.queue, state = %state, "Consumer state");
        self.state.send_replace(state);
    }

    /// Drive the state machine until shutdown (`Ok`) or until the broker
    /// stays unreachable for every connection attempt (`Err`).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        tracing::info!(
            queue = %self.settings.queue,
            routing_keys = ?self.settings.routing_keys,
            "🎧 Starting consumer"
        );

        loop {
            if *shutdown.borrow() {
                self.set_state(ConsumerState::Stopped);
                return Ok(());
            }

            let (connected, attempts) = self.connect(&mut shutdown).await;
            let mut subscription = match connected {
                RetryResult::Success(subscription) => subscription,
                RetryResult::Cancelled => {
                    self.set_state(ConsumerState::Stopped);
                    tracing::info!(queue = %self.settings.queue, "Consumer stopped while connecting");
                    return Ok(());
                }
                RetryResult::Failed(last_error) => {
                    self.set_state(ConsumerState::Failed);
                    tracing::error!(
                        queue = %self.settings.queue,
                        attempts = attempts,
                        transient = last_error.is_transient(),
                        error = %last_error,
                        "❌ Could not connect to broker, consumer failed"
                    );
                    return Err(ConsumerError::ConnectionExhausted {
                        queue: self.settings.queue.clone(),
                        attempts,
                        last_error,
                    });
                }
            };

            self.set_state(ConsumerState::Listening);
            tracing::info!(queue = %self.settings.queue, "Consumer listening");

            match self.listen(subscription.as_mut(), &mut shutdown).await {
                ListenExit::Shutdown => {
                    subscription.close().await;
                    self.set_state(ConsumerState::Stopped);
                    tracing::info!(queue = %self.settings.queue, "Consumer stopped");
                    return Ok(());
                }
                ListenExit::ConnectionLost(e) => {
                    tracing::warn!(queue = %self.settings.queue, error = %e, "Connection lost, reconnecting");
                    subscription.close().await;
                    self.set_state(ConsumerState::Disconnected { attempt: 0 });
                }
            }
        }
    }

    /// Returns the retry result and the number of attempts made.
    async fn connect(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> (RetryResult<Box<dyn Subscription>, BrokerError>, u32) {
        let mut attempts = 0;
        let made = &mut attempts;
        let result = retry_until_shutdown(&self.settings.connect_retry, shutdown, move |attempt| {
            *made = attempt;
            self.try_connect(attempt)
        })
        .await;
        (result, attempts)
    }

    async fn try_connect(&self, attempt: u32) -> Result<Box<dyn Subscription>, BrokerError> {
        let queue = self.settings.queue.as_str();
        self.set_state(ConsumerState::Disconnected { attempt });
        self.metrics.broker_connect_attempts.with_label_values(&[queue]).inc();
        tracing::info!(queue = %queue, attempt = attempt, "Connecting to broker");

        let mut subscription = self.connector.connect(queue).await?;
        self.set_state(ConsumerState::Connected);

        if let Err(e) = subscription.declare(&self.settings.routing_keys).await {
            subscription.close().await;
            return Err(e);
        }
        Ok(subscription)
    }

    async fn listen(
        &self,
        subscription: &mut dyn Subscription,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ListenExit {
        loop {
            let received = tokio::select! {
                biased;

                _ = wait_for_shutdown(shutdown) => return ListenExit::Shutdown,
                received = subscription.recv() => received,
            };

            let delivery = match received {
                Ok(delivery) => delivery,
                Err(e) => return ListenExit::ConnectionLost(e),
            };

            if let Err(e) = self.process(subscription, &delivery, shutdown).await {
                return ListenExit::ConnectionLost(e);
            }
        }
    }

    /// Decode, dispatch and settle one message. An error means the broker
    /// connection can no longer be used.
    async fn process(
        &self,
        subscription: &mut dyn Subscription,
        delivery: &Delivery,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), BrokerError> {
        let queue = self.settings.queue.as_str();

        let envelope = match EventEnvelope::decode(&delivery.payload, delivery.content_type()) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.metrics.events_decode_failed.with_label_values(&[queue]).inc();
                tracing::warn!(
                    queue = %queue,
                    routing_key = %delivery.routing_key,
                    offset = delivery.offset,
                    error = %e,
                    "⚠️  Dropping undecodable message"
                );
                self.settle(subscription, delivery, AckDecision::Discard, shutdown).await?;
                self.dead_letter(delivery, DeadLetterReason::DecodeFailed, e.to_string()).await;
                return Ok(());
            }
        };

        let event_type = envelope.event_type().as_str();
        tracing::debug!(
            queue = %queue,
            event_id = %envelope.event_id(),
            event_type = %event_type,
            order_id = %envelope.order_id(),
            published_at = %envelope.timestamp(),
            redelivered = delivery.redelivered,
            "Dispatching event"
        );
        let timer = self
            .metrics
            .event_handling_duration
            .with_label_values(&[queue, event_type])
            .start_timer();
        let outcome = self.dispatcher.dispatch(&envelope).await;
        timer.observe_duration();

        self.metrics
            .events_consumed
            .with_label_values(&[queue, event_type, outcome.label()])
            .inc();

        let decision = AckDecision::for_outcome(&outcome);
        if decision == AckDecision::Requeue {
            tracing::warn!(
                queue = %queue,
                event_id = %envelope.event_id(),
                order_id = %envelope.order_id(),
                redelivered = delivery.redelivered,
                outcome = %outcome,
                "Transient failure, requeueing"
            );
        }
        self.settle(subscription, delivery, decision, shutdown).await?;

        match &outcome {
            HandlerOutcome::PermanentFailure(reason) => {
                tracing::warn!(
                    queue = %queue,
                    event_id = %envelope.event_id(),
                    event_type = %event_type,
                    order_id = %envelope.order_id(),
                    reason = %reason,
                    "Event rejected permanently, acknowledged and dropped"
                );
                self.dead_letter(delivery, DeadLetterReason::Rejected, reason.clone()).await;
            }
            HandlerOutcome::Unhandled => {
                self.dead_letter(delivery, DeadLetterReason::Unhandled, "no handler registered".into())
                    .await;
            }
            _ => {}
        }

        Ok(())
    }

    async fn settle(
        &self,
        subscription: &mut dyn Subscription,
        delivery: &Delivery,
        decision: AckDecision,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), BrokerError> {
        match decision {
            AckDecision::Ack => subscription.ack(delivery).await,
            AckDecision::Requeue => {
                // Cut short by shutdown; the message goes back either way.
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.redelivery_delay) => {}
                    _ = wait_for_shutdown(shutdown) => {}
                }
                subscription.reject(delivery, true).await
            }
            AckDecision::Discard => subscription.reject(delivery, false).await,
        }
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: DeadLetterReason, error: String) {
        if let Some(sink) = &self.dead_letters {
            sink.record(DeadLetter::new(
                self.settings.queue.as_str(),
                delivery.routing_key.as_str(),
                reason,
                error,
                &delivery.payload,
            ))
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{register_order_handlers, EventType, HandlerContext, Order, OrderId, OrderStatus};
    use crate::events::HandlerRegistry;
    use crate::messaging::bindings::{routing_key, CARRIER_EVENTS, ORDER_EVENTS, SUPPLIER_EVENTS};
    use crate::messaging::{EventPublisher, InMemoryBroker};
    use crate::notify::RecordingNotifier;
    use crate::store::{InMemoryOrderStore, OrderStore};
    use crate::domain::order::OrderTransitionHandler;
    use crate::events::EventHandler;
    use async_trait::async_trait;
    use prometheus::IntCounter;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Notify;
    use tokio::task::JoinHandle;

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        broker: InMemoryBroker,
        store: Arc<InMemoryOrderStore>,
        notifier: Arc<RecordingNotifier>,
        metrics: Arc<Metrics>,
        publisher: EventPublisher,
        dispatcher: EventDispatcher,
        shutdown: watch::Sender<bool>,
    }

    impl Harness {
        fn new() -> Self {
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
            let (shutdown, _) = watch::channel(false);

            Self {
                broker,
                store,
                notifier,
                metrics,
                publisher,
                dispatcher: EventDispatcher::new(Arc::new(registry)),
                shutdown,
            }
        }

        fn settings(&self, queue: &str) -> ConsumerSettings {
            let binding = ConsumerBinding::for_queue(queue).unwrap();
            ConsumerSettings::for_binding(binding, "").with_redelivery_delay(Duration::from_millis(10))
        }

        fn consumer(&self, settings: ConsumerSettings) -> EventConsumer {
            EventConsumer::new(
                settings,
                Arc::new(self.broker.clone()),
                self.dispatcher.clone(),
                self.metrics.clone(),
            )
        }

        /// Spawn a consumer and wait until it is listening.
        async fn start(&self, queue: &str) -> JoinHandle<Result<(), ConsumerError>> {
            let consumer = self.consumer(self.settings(queue));
            let mut state = consumer.subscribe_state();
            let handle = tokio::spawn(consumer.run(self.shutdown.subscribe()));
            tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConsumerState::Listening))
                .await
                .expect("consumer should start listening")
                .unwrap();
            handle
        }

        async fn seed(&self, raw: &str) -> OrderId {
            let order_id = OrderId::new(raw).unwrap();
            self.store.insert(Order::new(order_id.clone(), vec![])).await;
            order_id
        }

        async fn publish(&self, event_type: EventType, order_id: &OrderId) {
            self.publisher
                .publish(event_type, order_id.clone(), json!({}))
                .await
                .unwrap();
        }

        async fn wait_for_status(&self, order_id: &OrderId, status: OrderStatus) {
            let reached = tokio::time::timeout(WAIT, async {
                loop {
                    if self.store.get(order_id).await.map(|o| o.status) == Some(status) {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await;
            assert!(reached.is_ok(), "order {} never reached {}", order_id, status);
        }

        fn consumed(&self, queue: &str, event_type: EventType, outcome: &str) -> IntCounter {
            self.metrics
                .events_consumed
                .with_label_values(&[queue, event_type.as_str(), outcome])
        }

        async fn stop(&self, handles: Vec<JoinHandle<Result<(), ConsumerError>>>) {
            self.shutdown.send_replace(true);
            for handle in handles {
                let result = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
                assert!(result.is_ok());
            }
        }
    }

    async fn wait_for_count(counter: &IntCounter, at_least: u64) {
        let reached = tokio::time::timeout(WAIT, async {
            while counter.get() < at_least {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "counter stayed at {}", counter.get());
    }

    #[tokio::test]
    async fn test_end_to_end_order_42() {
        let h = Harness::new();
        let handles = vec![h.start(ORDER_EVENTS).await, h.start(SUPPLIER_EVENTS).await];
        let order_id = h.seed("42").await;

        h.publish(EventType::OrderCreated, &order_id).await;
        h.wait_for_status(&order_id, OrderStatus::PendingPayment).await;

        h.publish(EventType::OrderPaid, &order_id).await;
        h.wait_for_status(&order_id, OrderStatus::InPreparation).await;

        h.publish(EventType::OrderCreated, &order_id).await;
        wait_for_count(&h.consumed(ORDER_EVENTS, EventType::OrderCreated, "permanent_failure"), 1).await;

        assert_eq!(h.store.get(&order_id).await.unwrap().status, OrderStatus::InPreparation);
        assert_eq!(h.notifier.count_for(&order_id), 2);
        assert_eq!(h.broker.unacked_count(ORDER_EVENTS), 0);
        assert_eq!(h.broker.ready_count(ORDER_EVENTS), 0);

        h.stop(handles).await;
    }

    #[tokio::test]
    async fn test_full_lifecycle_across_queues() {
        let h = Harness::new();
        let handles = vec![
            h.start(ORDER_EVENTS).await,
            h.start(SUPPLIER_EVENTS).await,
            h.start(CARRIER_EVENTS).await,
        ];
        let order_id = h.seed("7").await;

        let steps = [
            (EventType::OrderCreated, OrderStatus::PendingPayment),
            (EventType::OrderPaid, OrderStatus::InPreparation),
            (EventType::OrderReadyToShip, OrderStatus::ReadyToShip),
            (EventType::Shipped, OrderStatus::Shipped),
            (EventType::Delivered, OrderStatus::Delivered),
        ];
        for (event_type, status) in steps {
            h.publish(event_type, &order_id).await;
            h.wait_for_status(&order_id, status).await;
        }

        assert_eq!(h.notifier.count_for(&order_id), 5);
        h.stop(handles).await;
    }

    #[tokio::test]
    async fn test_decode_failure_does_not_block_queue() {
        let h = Harness::new();
        let dead_letters = DeadLetterSink::new(Arc::new(h.broker.clone()), "orders.dead_letter", h.metrics.clone());
        let consumer = h.consumer(h.settings(SUPPLIER_EVENTS)).with_dead_letters(dead_letters);
        let mut state = consumer.subscribe_state();
        let handle = tokio::spawn(consumer.run(h.shutdown.subscribe()));
        state.wait_for(|s| *s == ConsumerState::Listening).await.unwrap();

        let order_id = h.seed("9").await;
        h.store
            .set_order_status(&order_id, OrderStatus::Created, OrderStatus::PendingPayment)
            .await
            .unwrap();

        h.broker.inject(&routing_key("", EventType::OrderPaid), b"{not json");
        h.publish(EventType::OrderPaid, &order_id).await;

        h.wait_for_status(&order_id, OrderStatus::InPreparation).await;
        assert_eq!(h.metrics.events_decode_failed.with_label_values(&[SUPPLIER_EVENTS]).get(), 1);
        assert_eq!(h.broker.sent_to("orders.dead_letter").len(), 1);
        assert_eq!(h.broker.unacked_count(SUPPLIER_EVENTS), 0);

        h.stop(vec![handle]).await;
    }

    #[tokio::test]
    async fn test_transient_failure_is_redelivered() {
        let h = Harness::new();
        let handles = vec![h.start(ORDER_EVENTS).await];
        let order_id = h.seed("11").await;
        h.store.set_unavailable(true);

        h.publish(EventType::OrderCreated, &order_id).await;
        wait_for_count(&h.consumed(ORDER_EVENTS, EventType::OrderCreated, "transient_failure"), 2).await;
        assert_eq!(h.notifier.count_for(&order_id), 0);

        h.store.set_unavailable(false);
        h.wait_for_status(&order_id, OrderStatus::PendingPayment).await;
        assert_eq!(h.notifier.count_for(&order_id), 1);

        h.stop(handles).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_five_attempts() {
        let h = Harness::new();
        h.broker.set_available(false);
        let consumer = h.consumer(h.settings(ORDER_EVENTS));
        let state = consumer.subscribe_state();

        let started = tokio::time::Instant::now();
        let result = consumer.run(h.shutdown.subscribe()).await;
        let elapsed = started.elapsed();

        match result {
            Err(ConsumerError::ConnectionExhausted { queue, attempts, last_error }) => {
                assert_eq!(queue, ORDER_EVENTS);
                assert_eq!(attempts, 5);
                assert!(matches!(last_error, BrokerError::Unavailable(_)));
            }
            other => panic!("expected ConnectionExhausted, got {:?}", other),
        }
        assert_eq!(h.broker.connect_attempts(ORDER_EVENTS), 5);
        assert!(elapsed >= Duration::from_secs(20) && elapsed < Duration::from_secs(21));
        assert_eq!(*state.borrow(), ConsumerState::Failed);
        assert_eq!(h.metrics.broker_connect_attempts.with_label_values(&[ORDER_EVENTS]).get(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_when_broker_returns_during_backoff() {
        let h = Harness::new();
        h.broker.set_available(false);
        let consumer = h.consumer(h.settings(ORDER_EVENTS));
        let mut state = consumer.subscribe_state();
        let handle = tokio::spawn(consumer.run(h.shutdown.subscribe()));

        state.wait_for(|s| *s == ConsumerState::Disconnected { attempt: 3 }).await.unwrap();
        h.broker.set_available(true);
        state.wait_for(|s| *s == ConsumerState::Listening).await.unwrap();

        assert_eq!(h.broker.connect_attempts(ORDER_EVENTS), 4);
        h.stop(vec![handle]).await;
    }

    #[tokio::test]
    async fn test_reconnects_after_connection_loss() {
        let h = Harness::new();
        let consumer = h.consumer(h.settings(ORDER_EVENTS));
        let mut state = consumer.subscribe_state();
        let handle = tokio::spawn(consumer.run(h.shutdown.subscribe()));
        state.wait_for(|s| *s == ConsumerState::Listening).await.unwrap();

        h.broker.disconnect_all();
        let reconnected = tokio::time::timeout(WAIT, async {
            while h.broker.connect_attempts(ORDER_EVENTS) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(reconnected.is_ok());
        state.wait_for(|s| *s == ConsumerState::Listening).await.unwrap();

        let order_id = h.seed("12").await;
        h.publish(EventType::OrderCreated, &order_id).await;
        h.wait_for_status(&order_id, OrderStatus::PendingPayment).await;

        h.stop(vec![handle]).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let h = Harness::new();
        h.broker.set_available(false);
        let consumer = h.consumer(h.settings(ORDER_EVENTS));
        let mut state = consumer.subscribe_state();
        let handle = tokio::spawn(consumer.run(h.shutdown.subscribe()));

        state.wait_for(|s| *s == ConsumerState::Disconnected { attempt: 1 }).await.unwrap();
        h.stop(vec![handle]).await;

        assert_eq!(*state.borrow(), ConsumerState::Stopped);
        assert!(h.broker.connect_attempts(ORDER_EVENTS) < 5);
    }

    #[tokio::test]
    async fn test_graceful_shutdown_while_listening() {
        let h = Harness::new();
        let consumer = h.consumer(h.settings(CARRIER_EVENTS));
        let state = consumer.subscribe_state();
        let handle = tokio::spawn(consumer.run(h.shutdown.subscribe()));
        let mut waiting = state.clone();
        waiting.wait_for(|s| *s == ConsumerState::Listening).await.unwrap();

        h.stop(vec![handle]).await;
        assert_eq!(*state.borrow(), ConsumerState::Stopped);
    }

    #[tokio::test]
    async fn test_unhandled_event_is_acked() {
        let h = Harness::new();
        let empty = EventDispatcher::new(Arc::new(HandlerRegistry::builder().build()));
        let consumer = EventConsumer::new(
            h.settings(SUPPLIER_EVENTS),
            Arc::new(h.broker.clone()),
            empty,
            h.metrics.clone(),
        );
        let mut state = consumer.subscribe_state();
        let handle = tokio::spawn(consumer.run(h.shutdown.subscribe()));
        state.wait_for(|s| *s == ConsumerState::Listening).await.unwrap();

        h.publish(EventType::OrderPaid, &OrderId::new("13").unwrap()).await;
        wait_for_count(&h.consumed(SUPPLIER_EVENTS, EventType::OrderPaid, "unhandled"), 1).await;

        assert_eq!(h.broker.ready_count(SUPPLIER_EVENTS), 0);
        h.stop(vec![handle]).await;
    }

    /// Refuses every connection with a non-retryable declare error.
    struct DeniedTopics {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl BrokerConnector for DeniedTopics {
        async fn connect(&self, queue: &str) -> Result<Box<dyn Subscription>, BrokerError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(BrokerError::Declare {
                queue: queue.to_string(),
                reason: "topic authorization failed".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_connect_error_is_not_retried() {
        let h = Harness::new();
        let connector = Arc::new(DeniedTopics { attempts: AtomicU32::new(0) });
        let consumer = EventConsumer::new(
            h.settings(ORDER_EVENTS),
            connector.clone(),
            h.dispatcher.clone(),
            h.metrics.clone(),
        );
        let state = consumer.subscribe_state();

        let started = tokio::time::Instant::now();
        let result = consumer.run(h.shutdown.subscribe()).await;

        match result {
            Err(ConsumerError::ConnectionExhausted { attempts, last_error, .. }) => {
                assert_eq!(attempts, 1);
                assert!(matches!(last_error, BrokerError::Declare { .. }));
            }
            other => panic!("expected ConnectionExhausted, got {:?}", other),
        }
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(*state.borrow(), ConsumerState::Failed);
    }

    /// Signals when it starts, then takes its time before applying the event.
    struct SlowHandler {
        inner: OrderTransitionHandler,
        started: Arc<Notify>,
        delay: Duration,
    }

    #[async_trait]
    impl EventHandler for SlowHandler {
        async fn handle(&self, envelope: &EventEnvelope) -> HandlerOutcome {
            self.started.notify_one();
            tokio::time::sleep(self.delay).await;
            self.inner.handle(envelope).await
        }
    }

    #[tokio::test]
    async fn test_shutdown_lets_in_flight_message_finish() {
        let h = Harness::new();
        let started = Arc::new(Notify::new());
        let ctx = HandlerContext {
            store: h.store.clone(),
            notifier: h.notifier.clone(),
            metrics: h.metrics.clone(),
            auto_advance: None,
        };
        let slow = SlowHandler {
            inner: OrderTransitionHandler::new(EventType::OrderCreated, ctx),
            started: started.clone(),
            delay: Duration::from_millis(200),
        };
        let registry = HandlerRegistry::builder()
            .register(EventType::OrderCreated, Arc::new(slow))
            .unwrap()
            .build();
        let consumer = EventConsumer::new(
            h.settings(ORDER_EVENTS),
            Arc::new(h.broker.clone()),
            EventDispatcher::new(Arc::new(registry)),
            h.metrics.clone(),
        );
        let mut state = consumer.subscribe_state();
        let handle = tokio::spawn(consumer.run(h.shutdown.subscribe()));
        state.wait_for(|s| *s == ConsumerState::Listening).await.unwrap();

        let order_id = h.seed("14").await;
        h.publish(EventType::OrderCreated, &order_id).await;
        tokio::time::timeout(WAIT, started.notified())
            .await
            .expect("handler should start");

        h.stop(vec![handle]).await;

        assert_eq!(h.store.get(&order_id).await.unwrap().status, OrderStatus::PendingPayment);
        assert_eq!(h.broker.unacked_count(ORDER_EVENTS), 0);
        assert_eq!(h.broker.ready_count(ORDER_EVENTS), 0);
        assert_eq!(*state.borrow(), ConsumerState::Stopped);
        assert_eq!(h.notifier.count_for(&order_id), 1);
    }
}

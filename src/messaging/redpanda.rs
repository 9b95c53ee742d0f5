use async_trait::async_trait;
use rdkafka::{
    admin::{AdminClient, AdminOptions, NewTopic, TopicReplication},
    client::DefaultClientContext,
    config::ClientConfig,
    consumer::{CommitMode, Consumer, StreamConsumer},
    error::{KafkaError, RDKafkaErrorCode},
    message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
    Offset, TopicPartitionList,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::broker::{BrokerConnector, BrokerError, Delivery, MessageSink, OutboundMessage, Subscription};
use crate::config::BrokerConfig;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

// ============================================================================
// Redpanda / Kafka Adapter
// ============================================================================
//
// Queue semantics on a log-based broker:
// - queue            -> consumer group (group.id = queue name)
// - routing key      -> topic (created on declare when missing)
// - ack              -> commit offset + 1
// - reject(requeue)  -> seek the partition back to the message offset
// - reject(drop)     -> commit, same as ack
//
// ============================================================================

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

fn client_config(config: &BrokerConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.brokers)
        .set("client.id", &config.client_id);
    client
}

fn is_connection_error(error: &KafkaError) -> bool {
    matches!(
        error.rdkafka_error_code(),
        Some(RDKafkaErrorCode::AllBrokersDown)
            | Some(RDKafkaErrorCode::BrokerTransportFailure)
    )
}

// ============================================================================
// Producer
// ============================================================================

pub struct RedpandaSink {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
    send_timeout: Duration,
}

impl RedpandaSink {
    pub fn new(config: &BrokerConfig, breaker: CircuitBreakerConfig) -> Result<Self, BrokerError> {
        let producer: FutureProducer = client_config(config)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| BrokerError::Unavailable(format!("failed to create producer: {}", e)))?;

        tracing::info!(brokers = %config.brokers, "Redpanda producer initialized");

        Ok(Self {
            producer,
            circuit_breaker: CircuitBreaker::new("redpanda-producer", breaker),
            send_timeout: Duration::from_millis(config.message_timeout_ms),
        })
    }

    /// Attach a hook observing circuit state changes.
    pub fn with_breaker_hook(
        mut self,
        hook: impl Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    ) -> Self {
        self.circuit_breaker = self.circuit_breaker.with_transition_hook(hook);
        self
    }
}

#[async_trait]
impl MessageSink for RedpandaSink {
    async fn send(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        let result = self
            .circuit_breaker
            .call(async {
                let mut headers = OwnedHeaders::new();
                for (key, value) in &message.headers {
                    headers = headers.insert(Header {
                        key: key.as_str(),
                        value: Some(value.as_str()),
                    });
                }

                let record = FutureRecord::to(&message.routing_key)
                    .key(message.key.as_str())
                    .payload(&message.payload)
                    .headers(headers);

                self.producer
                    .send(record, self.send_timeout)
                    .await
                    .map(|_| ())
                    .map_err(|(e, _)| e)
            })
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(
                    topic = %message.routing_key,
                    key = %message.key,
                    "Published to Redpanda"
                );
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(topic = %message.routing_key, "Circuit breaker open - Redpanda unavailable");
                Err(BrokerError::Unavailable("circuit breaker open".into()))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(error = %e, topic = %message.routing_key, "Failed to publish to Redpanda");
                Err(BrokerError::Unavailable(e.to_string()))
            }
        }
    }
}

// ============================================================================
// Consumer
// ============================================================================

#[derive(Clone)]
pub struct KafkaConnector {
    config: BrokerConfig,
}

impl KafkaConnector {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrokerConnector for KafkaConnector {
    async fn connect(&self, queue: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let consumer: StreamConsumer = client_config(&self.config)
            .set("group.id", queue)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.config.auto_offset_reset)
            .create()
            .map_err(|e| BrokerError::Unavailable(format!("failed to create consumer: {}", e)))?;
        let consumer = Arc::new(consumer);

        // Creating a client never fails on an unreachable broker; a metadata
        // round trip does.
        let probe = consumer.clone();
        tokio::task::spawn_blocking(move || probe.fetch_metadata(None, METADATA_TIMEOUT).map(|_| ()))
            .await
            .map_err(|e| BrokerError::Operation(e.to_string()))?
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        let admin: AdminClient<DefaultClientContext> = client_config(&self.config)
            .create()
            .map_err(|e| BrokerError::Unavailable(format!("failed to create admin client: {}", e)))?;

        tracing::info!(brokers = %self.config.brokers, group_id = %queue, "Kafka consumer connected");

        Ok(Box::new(KafkaSubscription {
            queue: queue.to_string(),
            consumer,
            admin,
            partitions: self.config.topic_partitions,
            replication: self.config.replication_factor,
        }))
    }
}

pub struct KafkaSubscription {
    queue: String,
    consumer: Arc<StreamConsumer>,
    admin: AdminClient<DefaultClientContext>,
    partitions: i32,
    replication: i32,
}

impl KafkaSubscription {
    fn commit(&self, delivery: &Delivery, offset: i64) -> Result<(), BrokerError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&delivery.routing_key, delivery.partition, Offset::Offset(offset))
            .map_err(|e| BrokerError::Operation(e.to_string()))?;
        self.consumer.commit(&tpl, CommitMode::Async).map_err(|e| self.map_error(e))
    }

    fn map_error(&self, error: KafkaError) -> BrokerError {
        if is_connection_error(&error) {
            BrokerError::ConnectionLost(error.to_string())
        } else {
            BrokerError::Operation(error.to_string())
        }
    }
}

fn delivery_from_borrowed(message: &BorrowedMessage<'_>) -> Delivery {
    let key = message
        .key()
        .and_then(|k| std::str::from_utf8(k).ok())
        .map(String::from);

    let mut headers = HashMap::new();
    if let Some(raw) = message.headers() {
        for idx in 0..raw.count() {
            let header = raw.get(idx);
            if let Some(value) = header.value.and_then(|v| std::str::from_utf8(v).ok()) {
                headers.insert(header.key.to_string(), value.to_string());
            }
        }
    }

    Delivery {
        routing_key: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key,
        payload: message.payload().map(|p| p.to_vec()).unwrap_or_default(),
        headers,
        redelivered: false,
    }
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn declare(&mut self, routing_keys: &[String]) -> Result<(), BrokerError> {
        let topics: Vec<NewTopic<'_>> = routing_keys
            .iter()
            .map(|topic| NewTopic::new(topic, self.partitions, TopicReplication::Fixed(self.replication)))
            .collect();

        let results = self
            .admin
            .create_topics(&topics, &AdminOptions::new())
            .await
            .map_err(|e| {
                if is_connection_error(&e) {
                    BrokerError::ConnectionLost(e.to_string())
                } else {
                    BrokerError::Declare {
                        queue: self.queue.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        for result in results {
            match result {
                Ok(topic) => tracing::info!(topic = %topic, "Created topic"),
                Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((topic, code)) => {
                    return Err(BrokerError::Declare {
                        queue: self.queue.clone(),
                        reason: format!("{}: {}", topic, code),
                    });
                }
            }
        }

        let names: Vec<&str> = routing_keys.iter().map(String::as_str).collect();
        self.consumer.subscribe(&names).map_err(|e| BrokerError::Declare {
            queue: self.queue.clone(),
            reason: e.to_string(),
        })?;

        tracing::info!(queue = %self.queue, topics = ?names, "Subscribed to topics");
        Ok(())
    }

    async fn recv(&mut self) -> Result<Delivery, BrokerError> {
        loop {
            match self.consumer.recv().await {
                Ok(message) => return Ok(delivery_from_borrowed(&message)),
                Err(e) if is_connection_error(&e) => {
                    return Err(BrokerError::ConnectionLost(e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(queue = %self.queue, error = %e, "Error receiving from Kafka");
                }
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.commit(delivery, delivery.offset + 1)
    }

    async fn reject(&mut self, delivery: &Delivery, requeue: bool) -> Result<(), BrokerError> {
        if !requeue {
            return self.commit(delivery, delivery.offset + 1);
        }
        self.consumer
            .seek(
                &delivery.routing_key,
                delivery.partition,
                Offset::Offset(delivery.offset),
                METADATA_TIMEOUT,
            )
            .map_err(|e| self.map_error(e))
    }

    async fn close(&mut self) {
        self.consumer.unsubscribe();
        tracing::info!(queue = %self.queue, "Kafka consumer closed");
    }
}

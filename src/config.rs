use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use config::builder::DefaultState;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::consumer::ConsumerSettings;
use crate::domain::order::EventType;
use crate::messaging::ConsumerBinding;
use crate::messaging::bindings::{with_prefix, CARRIER_EVENTS, ORDER_EVENTS, SUPPLIER_EVENTS};

// ============================================================================
// Application Configuration
// ============================================================================
//
// Sources, later ones override earlier ones:
//   1. built-in defaults
//   2. config/default.toml, then config/{ORDERS_ENV}.toml (both optional)
//   3. environment, ORDERS_ prefix and `__` between levels:
//        ORDERS_BROKER__BROKERS=redpanda:9092
//        ORDERS_CONSUMER__QUEUES=order-events,carrier-events
//
// ============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub brokers: String,
    pub client_id: String,
    /// Prepended to every routing key (topic).
    pub topic_prefix: String,
    pub message_timeout_ms: u64,
    pub auto_offset_reset: String,
    pub topic_partitions: i32,
    pub replication_factor: i32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            brokers: "127.0.0.1:9092".to_string(),
            client_id: "order-events".to_string(),
            topic_prefix: String::new(),
            message_timeout_ms: 5000,
            auto_offset_reset: "earliest".to_string(),
            topic_partitions: 3,
            replication_factor: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Queues to consume in this process.
    pub queues: Vec<String>,
    pub max_connect_attempts: u32,
    pub connect_backoff_secs: u64,
    pub redelivery_delay_ms: u64,
    /// Routing key for permanently failed messages; unset drops them.
    pub dead_letter_topic: Option<String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            queues: vec![
                ORDER_EVENTS.to_string(),
                SUPPLIER_EVENTS.to_string(),
                CARRIER_EVENTS.to_string(),
            ],
            max_connect_attempts: 5,
            connect_backoff_secs: 5,
            redelivery_delay_ms: 500,
            dead_letter_topic: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct HandlersConfig {
    /// Events whose handler immediately publishes the next lifecycle event.
    pub auto_advance: Vec<EventType>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `pretty` or `json`
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DemoConfig {
    /// Seed an order and publish its whole lifecycle on startup.
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub consumer: ConsumerConfig,
    pub handlers: HandlersConfig,
    pub metrics: MetricsConfig,
    pub observability: ObservabilityConfig,
    pub demo: DemoConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("ORDERS_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false))
            .add_source(
                Environment::with_prefix("ORDERS")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("consumer.queues")
                    .with_list_parse_key("handlers.auto_advance")
                    .try_parsing(true),
            );

        Self::build(builder)
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        Self::build(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for queue in &self.consumer.queues {
            if ConsumerBinding::for_queue(queue).is_none() {
                return Err(ConfigError::Message(format!("unknown queue: {}", queue)));
            }
        }
        if self.broker.brokers.trim().is_empty() {
            return Err(ConfigError::Message("broker.brokers must not be empty".into()));
        }
        if self.consumer.max_connect_attempts == 0 {
            return Err(ConfigError::Message("consumer.max_connect_attempts must be at least 1".into()));
        }
        if !matches!(self.observability.log_format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Message(format!(
                "observability.log_format must be pretty or json, got {}",
                self.observability.log_format
            )));
        }
        Ok(())
    }

    /// Consumer settings for every configured queue.
    pub fn consumer_settings(&self) -> Vec<ConsumerSettings> {
        self.consumer
            .queues
            .iter()
            .filter_map(|queue| ConsumerBinding::for_queue(queue))
            .map(|binding| {
                ConsumerSettings::for_binding(binding, &self.broker.topic_prefix)
                    .with_connect_retry(
                        self.consumer.max_connect_attempts,
                        Duration::from_secs(self.consumer.connect_backoff_secs),
                    )
                    .with_redelivery_delay(Duration::from_millis(self.consumer.redelivery_delay_ms))
            })
            .collect()
    }

    pub fn dead_letter_routing_key(&self) -> Option<String> {
        self.consumer
            .dead_letter_topic
            .as_deref()
            .map(|topic| with_prefix(&self.broker.topic_prefix, topic))
    }
}

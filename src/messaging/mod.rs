pub mod bindings;
pub mod broker;
pub mod dead_letter;
pub mod memory;
pub mod publisher;
pub mod redpanda;

pub use bindings::{ConsumerBinding, BINDINGS};
pub use broker::{BrokerConnector, BrokerError, Delivery, MessageSink, OutboundMessage, Subscription};
pub use dead_letter::{DeadLetter, DeadLetterReason, DeadLetterSink};
pub use memory::InMemoryBroker;
pub use publisher::{EventPublisher, PublishError};
pub use redpanda::{KafkaConnector, RedpandaSink};

// ============================================================================
// Order Events - event-driven order lifecycle engine
// ============================================================================
//
// Layers, leaves first:
// - domain     order value objects, lifecycle events, state machine, handlers
// - events     envelope (wire format) and dispatcher (routing)
// - messaging  broker seam, Redpanda/Kafka and in-memory brokers, publisher
// - consumer   per-queue connection state machine and ack decisions
// - store      OrderStore seam and in-memory implementation
// - notify     Notifier seam (customer, supplier, carrier)
//
// Ambient: config, metrics (Prometheus + actix-web), health, utils.
//
// ============================================================================

pub mod config;
pub mod consumer;
pub mod demo;
pub mod domain;
pub mod events;
pub mod health;
pub mod messaging;
pub mod metrics;
pub mod notify;
pub mod store;
pub mod utils;

// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers:
// - Consumption per queue and event type (outcome, latency)
// - Publishing (success and failure per event type)
// - Broker connection attempts and consumer state
// - Notification failures and dead letters
// - Producer circuit breaker state
//
// All metrics live in one registry, scraped via /metrics
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Consumer Metrics
    pub events_consumed: IntCounterVec,
    pub events_decode_failed: IntCounterVec,
    pub event_handling_duration: HistogramVec,
    pub broker_connect_attempts: IntCounterVec,
    pub consumer_state: IntGaugeVec,

    // Publisher Metrics
    pub events_published: IntCounterVec,
    pub events_publish_failed: IntCounterVec,

    // Side-effect Metrics
    pub notifications_failed: IntCounterVec,
    pub dead_letters: IntCounterVec,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGauge,
    pub circuit_breaker_transitions: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Consumer Metrics
        let events_consumed = IntCounterVec::new(
            Opts::new("events_consumed_total", "Events consumed, by handler outcome"),
            &["queue", "event_type", "outcome"],
        )?;
        registry.register(Box::new(events_consumed.clone()))?;

        let events_decode_failed = IntCounterVec::new(
            Opts::new("events_decode_failed_total", "Messages that could not be decoded"),
            &["queue"],
        )?;
        registry.register(Box::new(events_decode_failed.clone()))?;

        let event_handling_duration = HistogramVec::new(
            HistogramOpts::new("event_handling_duration_seconds", "Dispatch duration per event")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["queue", "event_type"],
        )?;
        registry.register(Box::new(event_handling_duration.clone()))?;

        let broker_connect_attempts = IntCounterVec::new(
            Opts::new("broker_connect_attempts_total", "Broker connection attempts"),
            &["queue"],
        )?;
        registry.register(Box::new(broker_connect_attempts.clone()))?;

        let consumer_state = IntGaugeVec::new(
            Opts::new(
                "consumer_state",
                "Consumer state (0=Disconnected, 1=Connected, 2=Listening, 3=Failed, 4=Stopped)",
            ),
            &["queue"],
        )?;
        registry.register(Box::new(consumer_state.clone()))?;

        // Publisher Metrics
        let events_published = IntCounterVec::new(
            Opts::new("events_published_total", "Events accepted by the broker"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let events_publish_failed = IntCounterVec::new(
            Opts::new("events_publish_failed_total", "Events the broker did not accept"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_publish_failed.clone()))?;

        // Side-effect Metrics
        let notifications_failed = IntCounterVec::new(
            Opts::new("notifications_failed_total", "Notifications that could not be delivered"),
            &["recipient"],
        )?;
        registry.register(Box::new(notifications_failed.clone()))?;

        let dead_letters = IntCounterVec::new(
            Opts::new("dead_letters_total", "Messages dropped as permanently failed"),
            &["queue", "reason"],
        )?;
        registry.register(Box::new(dead_letters.clone()))?;

        // Circuit Breaker Metrics
        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Producer circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_transitions = IntCounterVec::new(
            Opts::new("circuit_breaker_transitions_total", "Circuit breaker state transitions"),
            &["from_state", "to_state"],
        )?;
        registry.register(Box::new(circuit_breaker_transitions.clone()))?;

        Ok(Self {
            registry,
            events_consumed,
            events_decode_failed,
            event_handling_duration,
            broker_connect_attempts,
            consumer_state,
            events_published,
            events_publish_failed,
            notifications_failed,
            dead_letters,
            circuit_breaker_state,
            circuit_breaker_transitions,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Encoder;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();

        metrics.events_consumed.with_label_values(&["order-events", "OrderCreated", "success"]).inc();
        metrics.consumer_state.with_label_values(&["order-events"]).set(2);

        let mut buffer = Vec::new();
        prometheus::TextEncoder::new()
            .encode(&metrics.registry().gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("events_consumed_total"));
        assert!(text.contains("consumer_state{queue=\"order-events\"} 2"));
    }

    #[test]
    fn test_independent_registries() {
        // Each instance owns its registry, so tests can build many.
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.events_published.with_label_values(&["OrderPaid"]).inc();
        assert_eq!(b.events_published.with_label_values(&["OrderPaid"]).get(), 0);
    }
}

use serde::Serialize;
use tokio::sync::watch;

use crate::consumer::ConsumerState;

// ============================================================================
// Health - aggregated from consumer states
// ============================================================================
//
//   every consumer listening           -> healthy
//   any consumer (re)connecting/stopped -> degraded
//   any consumer failed                 -> unhealthy
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded(_) => "degraded",
            HealthStatus::Unhealthy(_) => "unhealthy",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumerReport {
    pub queue: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    #[serde(flatten)]
    pub status: HealthStatus,
    pub consumers: Vec<ConsumerReport>,
}

#[derive(Clone, Default)]
pub struct ConsumerHealth {
    consumers: Vec<(String, watch::Receiver<ConsumerState>)>,
}

impl ConsumerHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, queue: impl Into<String>, state: watch::Receiver<ConsumerState>) {
        self.consumers.push((queue.into(), state));
    }

    pub fn report(&self) -> HealthReport {
        let mut failed = Vec::new();
        let mut not_listening = Vec::new();
        let mut consumers = Vec::with_capacity(self.consumers.len());

        for (queue, state) in &self.consumers {
            let state = *state.borrow();
            match state {
                ConsumerState::Listening => {}
                ConsumerState::Failed => failed.push(queue.clone()),
                _ => not_listening.push(queue.clone()),
            }
            consumers.push(ConsumerReport {
                queue: queue.clone(),
                state: state.to_string(),
            });
        }

        let status = if !failed.is_empty() {
            HealthStatus::Unhealthy(format!("consumers failed: {}", failed.join(", ")))
        } else if !not_listening.is_empty() {
            HealthStatus::Degraded(format!("consumers not listening: {}", not_listening.join(", ")))
        } else {
            HealthStatus::Healthy
        };

        HealthReport { status, consumers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_aggregation() {
        let (a_tx, a_rx) = watch::channel(ConsumerState::Listening);
        let (b_tx, b_rx) = watch::channel(ConsumerState::Listening);
        let mut health = ConsumerHealth::new();
        health.register("order-events", a_rx);
        health.register("carrier-events", b_rx);

        assert!(health.report().status.is_healthy());

        b_tx.send_replace(ConsumerState::Disconnected { attempt: 2 });
        assert_eq!(
            health.report().status,
            HealthStatus::Degraded("consumers not listening: carrier-events".to_string())
        );

        a_tx.send_replace(ConsumerState::Failed);
        let report = health.report();
        assert!(report.status.is_unhealthy());
        assert_eq!(report.consumers[0].state, "failed");
    }

    #[test]
    fn test_report_serialization() {
        let (_tx, rx) = watch::channel(ConsumerState::Failed);
        let mut health = ConsumerHealth::new();
        health.register("supplier-events", rx);

        let json = serde_json::to_value(health.report()).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["reason"], "consumers failed: supplier-events");
        assert_eq!(json["consumers"][0]["queue"], "supplier-events");
    }

    #[test]
    fn test_no_consumers_is_healthy() {
        assert!(ConsumerHealth::new().report().status.is_healthy());
    }
}

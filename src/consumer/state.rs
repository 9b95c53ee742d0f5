use std::fmt;

use crate::events::HandlerOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected { attempt: u32 },
    Connected,
    Listening,
    Failed,
    Stopped,
}

impl ConsumerState {
    /// Gauge value: 0=Disconnected, 1=Connected, 2=Listening, 3=Failed, 4=Stopped
    pub fn as_gauge(self) -> i64 {
        match self {
            ConsumerState::Disconnected { .. } => 0,
            ConsumerState::Connected => 1,
            ConsumerState::Listening => 2,
            ConsumerState::Failed => 3,
            ConsumerState::Stopped => 4,
        }
    }
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumerState::Disconnected { attempt } => write!(f, "disconnected (attempt {})", attempt),
            ConsumerState::Connected => f.write_str("connected"),
            ConsumerState::Listening => f.write_str("listening"),
            ConsumerState::Failed => f.write_str("failed"),
            ConsumerState::Stopped => f.write_str("stopped"),
        }
    }
}

/// What to tell the broker about a processed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    /// Reject and let the broker redeliver.
    Requeue,
    /// Reject without redelivery.
    Discard,
}

impl AckDecision {
    pub fn for_outcome(outcome: &HandlerOutcome) -> Self {
        match outcome {
            HandlerOutcome::Success => AckDecision::Ack,
            HandlerOutcome::TransientFailure(_) => AckDecision::Requeue,
            // Permanent failures are acked: redelivery would fail the same way.
            HandlerOutcome::PermanentFailure(_) | HandlerOutcome::Unhandled => AckDecision::Ack,
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::broker::{MessageSink, OutboundMessage, HEADER_CONTENT_TYPE};
use crate::events::CONTENT_TYPE;
use crate::metrics::Metrics;
use crate::utils::{retry_with_backoff, RetryConfig, RetryResult};

// ============================================================================
// Dead Letters
// ============================================================================
//
// Messages dropped as permanently failed (undecodable, unhandled, rejected
// by the state machine) can be copied to a dead-letter routing key for
// manual inspection. Writing a dead letter is best effort: a failure is
// logged and never affects the ack of the original message.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    DecodeFailed,
    Unhandled,
    Rejected,
}

impl DeadLetterReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DeadLetterReason::DecodeFailed => "decode_failed",
            DeadLetterReason::Unhandled => "unhandled",
            DeadLetterReason::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub queue: String,
    pub source_routing_key: String,
    pub reason: DeadLetterReason,
    pub error: String,
    /// Original body, lossily decoded as UTF-8.
    pub payload: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        queue: impl Into<String>,
        source_routing_key: impl Into<String>,
        reason: DeadLetterReason,
        error: impl Into<String>,
        payload: &[u8],
    ) -> Self {
        Self {
            queue: queue.into(),
            source_routing_key: source_routing_key.into(),
            reason,
            error: error.into(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            failed_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct DeadLetterSink {
    sink: Arc<dyn MessageSink>,
    routing_key: String,
    metrics: Arc<Metrics>,
    retry: RetryConfig,
}

impl DeadLetterSink {
    pub fn new(sink: Arc<dyn MessageSink>, routing_key: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            sink,
            routing_key: routing_key.into(),
            metrics,
            retry: RetryConfig::conservative(),
        }
    }

    pub async fn record(&self, letter: DeadLetter) {
        self.metrics
            .dead_letters
            .with_label_values(&[letter.queue.as_str(), letter.reason.as_str()])
            .inc();

        tracing::error!(
            queue = %letter.queue,
            reason = letter.reason.as_str(),
            error = %letter.error,
            "💀 Sending message to dead letters"
        );

        let payload = match serde_json::to_vec(&letter) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize dead letter");
                return;
            }
        };

        let result = retry_with_backoff(&self.retry, |_attempt| {
            let message = OutboundMessage {
                routing_key: self.routing_key.clone(),
                key: letter.queue.clone(),
                payload: payload.clone(),
                headers: vec![(HEADER_CONTENT_TYPE.to_string(), CONTENT_TYPE.to_string())],
            };
            let sink = self.sink.clone();
            async move { sink.send(message).await }
        })
        .await;

        match result {
            RetryResult::Success(()) => {}
            RetryResult::Failed(e) => {
                tracing::error!(queue = %letter.queue, error = %e, "Failed to write dead letter");
            }
            RetryResult::Cancelled => {}
        }
    }
}

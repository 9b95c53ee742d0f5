use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::domain::order::{EventType, OrderId};

// ============================================================================
// Event Envelope - the unit that crosses the broker
// ============================================================================
//
// Wire format (JSON, content-type application/json):
//
//   {
//     "event_id":   "5f0c...",            // optional on input
//     "event_type": "OrderPaid",
//     "order_id":   "42",
//     "timestamp":  "2024-05-01T10:00:00Z",
//     "payload":    { ... }               // optional on input
//   }
//
// Fields are private: once built, an envelope cannot be changed.
//
// ============================================================================

pub const CONTENT_TYPE: &str = "application/json";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventEnvelope {
    #[serde(default = "Uuid::new_v4")]
    event_id: Uuid,
    event_type: EventType,
    order_id: OrderId,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl EventEnvelope {
    pub fn new(event_type: EventType, order_id: OrderId, payload: Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            order_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a raw broker body. A missing content type is accepted.
    pub fn decode(body: &[u8], content_type: Option<&str>) -> Result<Self, DecodeError> {
        if let Some(content_type) = content_type {
            let mime = content_type.split(';').next().unwrap_or_default().trim();
            if !mime.eq_ignore_ascii_case(CONTENT_TYPE) {
                return Err(DecodeError::UnsupportedContentType(content_type.to_string()));
            }
        }
        Ok(serde_json::from_slice(body)?)
    }
}

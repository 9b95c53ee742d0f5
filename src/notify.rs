use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::domain::order::{EventType, OrderId};

// ============================================================================
// Notifications - fire-and-forget side effects of a transition
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recipient {
    Customer,
    Supplier,
    Carrier,
}

impl Recipient {
    pub fn as_str(self) -> &'static str {
        match self {
            Recipient::Customer => "customer",
            Recipient::Supplier => "supplier",
            Recipient::Carrier => "carrier",
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub order_id: OrderId,
    pub event_type: EventType,
    pub recipient: Recipient,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to notify {recipient}: {reason}")]
pub struct NotifyError {
    pub recipient: Recipient,
    pub reason: String,
}

/// Outbound integration towards customers, suppliers and carriers.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes every notification to the log.
#[derive(Debug, Default, Clone)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            order_id = %notification.order_id,
            event_type = %notification.event_type,
            recipient = %notification.recipient,
            "📨 {}",
            notification.message
        );
        Ok(())
    }
}

/// Keeps every notification in memory; optionally fails every call.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count_for(&self, order_id: &OrderId) -> usize {
        self.sent().iter().filter(|n| &n.order_id == order_id).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError {
                recipient: notification.recipient,
                reason: "notification service unreachable".to_string(),
            });
        }
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notification.clone()),
            Err(poisoned) => poisoned.into_inner().push(notification.clone()),
        }
        Ok(())
    }
}

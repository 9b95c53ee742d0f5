use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

use super::broker::{BrokerConnector, BrokerError, Delivery, MessageSink, OutboundMessage, Subscription};

// ============================================================================
// In-Memory Broker
// ============================================================================
//
// Queue semantics for local runs and tests:
// - a routing key is bound to zero or more queues; messages sent to a key
//   with no bound queue are dropped
// - a received message is unacked until ack/reject; reject(requeue) puts it
//   back at the head of its queue marked `redelivered`
// - `disconnect_all()` drops every live subscription and requeues its
//   unacked messages, as a broker restart would
// - `set_available(false)` makes connects and sends fail
//
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<BrokerState>,
    notify: Notify,
}

struct BrokerState {
    available: bool,
    epoch: u64,
    next_offset: i64,
    connect_attempts: HashMap<String, u32>,
    bindings: HashMap<String, HashSet<String>>,
    queues: HashMap<String, QueueState>,
    sent: Vec<OutboundMessage>,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            available: true,
            epoch: 0,
            next_offset: 0,
            connect_attempts: HashMap::new(),
            bindings: HashMap::new(),
            queues: HashMap::new(),
            sent: Vec::new(),
        }
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Delivery>,
    unacked: HashMap<i64, Delivery>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // A poisoned lock only means a test panicked while holding it.
        self.inner.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create `queue` and bind it to `routing_keys` without a subscription.
    pub fn declare(&self, queue: &str, routing_keys: &[String]) {
        let mut state = self.lock();
        state.queues.entry(queue.to_string()).or_default();
        for key in routing_keys {
            state
                .bindings
                .entry(key.clone())
                .or_default()
                .insert(queue.to_string());
        }
    }

    pub fn set_available(&self, available: bool) {
        let mut state = self.lock();
        state.available = available;
        if !available {
            Self::drop_connections(&mut state);
        }
        drop(state);
        self.inner.notify.notify_waiters();
    }

    /// Simulate a broker restart: live subscriptions see `ConnectionLost`.
    pub fn disconnect_all(&self) {
        let mut state = self.lock();
        Self::drop_connections(&mut state);
        drop(state);
        self.inner.notify.notify_waiters();
    }

    fn drop_connections(state: &mut BrokerState) {
        state.epoch += 1;
        for queue in state.queues.values_mut() {
            let mut unacked: Vec<Delivery> = queue.unacked.drain().map(|(_, d)| d).collect();
            unacked.sort_by_key(|d| std::cmp::Reverse(d.offset));
            for mut delivery in unacked {
                delivery.redelivered = true;
                queue.ready.push_front(delivery);
            }
        }
    }

    pub fn connect_attempts(&self, queue: &str) -> u32 {
        self.lock().connect_attempts.get(queue).copied().unwrap_or(0)
    }

    /// Messages waiting in `queue`, not counting unacked ones.
    pub fn ready_count(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map(|q| q.ready.len()).unwrap_or(0)
    }

    pub fn unacked_count(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map(|q| q.unacked.len()).unwrap_or(0)
    }

    /// Every message accepted by `send`, in order.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.lock().sent.clone()
    }

    pub fn sent_to(&self, routing_key: &str) -> Vec<OutboundMessage> {
        self.lock()
            .sent
            .iter()
            .filter(|message| message.routing_key == routing_key)
            .cloned()
            .collect()
    }

    /// Put raw bytes on a routing key, bypassing the envelope codec.
    pub fn inject(&self, routing_key: &str, payload: &[u8]) {
        let message = OutboundMessage {
            routing_key: routing_key.to_string(),
            key: String::new(),
            payload: payload.to_vec(),
            headers: Vec::new(),
        };
        let mut state = self.lock();
        Self::route(&mut state, &message);
        drop(state);
        self.inner.notify.notify_waiters();
    }

    fn route(state: &mut BrokerState, message: &OutboundMessage) {
        let queues: Vec<String> = state
            .bindings
            .get(&message.routing_key)
            .map(|queues| queues.iter().cloned().collect())
            .unwrap_or_default();

        if queues.is_empty() {
            tracing::debug!(routing_key = %message.routing_key, "No queue bound, message dropped");
        }

        for queue in queues {
            state.next_offset += 1;
            let delivery = Delivery {
                routing_key: message.routing_key.clone(),
                partition: 0,
                offset: state.next_offset,
                key: Some(message.key.clone()).filter(|key| !key.is_empty()),
                payload: message.payload.clone(),
                headers: message.headers.iter().cloned().collect(),
                redelivered: false,
            };
            state.queues.entry(queue).or_default().ready.push_back(delivery);
        }
    }
}

#[async_trait]
impl MessageSink for InMemoryBroker {
    async fn send(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        let mut state = self.lock();
        if !state.available {
            return Err(BrokerError::Unavailable("in-memory broker is down".into()));
        }
        Self::route(&mut state, &message);
        state.sent.push(message);
        drop(state);
        self.inner.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect(&self, queue: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let mut state = self.lock();
        *state.connect_attempts.entry(queue.to_string()).or_default() += 1;
        if !state.available {
            return Err(BrokerError::Unavailable("in-memory broker is down".into()));
        }
        Ok(Box::new(InMemorySubscription {
            broker: self.clone(),
            queue: queue.to_string(),
            epoch: state.epoch,
            closed: false,
        }))
    }
}

pub struct InMemorySubscription {
    broker: InMemoryBroker,
    queue: String,
    epoch: u64,
    closed: bool,
}

impl InMemorySubscription {
    fn check_live(&self, state: &BrokerState) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Operation("subscription closed".into()));
        }
        if state.epoch != self.epoch {
            return Err(BrokerError::ConnectionLost(format!("queue {} disconnected", self.queue)));
        }
        Ok(())
    }

    fn try_take(&self) -> Result<Option<Delivery>, BrokerError> {
        let mut state = self.broker.lock();
        self.check_live(&state)?;
        let Some(queue) = state.queues.get_mut(&self.queue) else {
            return Ok(None);
        };
        let Some(delivery) = queue.ready.pop_front() else {
            return Ok(None);
        };
        queue.unacked.insert(delivery.offset, delivery.clone());
        Ok(Some(delivery))
    }

    fn settle(&self, delivery: &Delivery) -> Result<(BrokerStateGuard<'_>, Delivery), BrokerError> {
        let mut state = self.broker.lock();
        self.check_live(&state)?;
        let taken = state
            .queues
            .get_mut(&self.queue)
            .and_then(|queue| queue.unacked.remove(&delivery.offset))
            .ok_or_else(|| BrokerError::Operation(format!("unknown delivery {}", delivery.offset)))?;
        Ok((state, taken))
    }
}

type BrokerStateGuard<'a> = MutexGuard<'a, BrokerState>;

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn declare(&mut self, routing_keys: &[String]) -> Result<(), BrokerError> {
        self.check_live(&self.broker.lock())?;
        self.broker.declare(&self.queue, routing_keys);
        tracing::debug!(queue = %self.queue, routing_keys = ?routing_keys, "Queue declared");
        Ok(())
    }

    async fn recv(&mut self) -> Result<Delivery, BrokerError> {
        loop {
            let notified = self.broker.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_take()? {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.settle(delivery).map(|_| ())
    }

    async fn reject(&mut self, delivery: &Delivery, requeue: bool) -> Result<(), BrokerError> {
        let (mut state, mut taken) = self.settle(delivery)?;
        if requeue {
            taken.redelivered = true;
            state.queues.entry(self.queue.clone()).or_default().ready.push_front(taken);
            drop(state);
            self.broker.inner.notify.notify_waiters();
        }
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.broker.lock();
        if state.epoch == self.epoch {
            if let Some(queue) = state.queues.get_mut(&self.queue) {
                let mut unacked: Vec<Delivery> = queue.unacked.drain().map(|(_, d)| d).collect();
                unacked.sort_by_key(|d| std::cmp::Reverse(d.offset));
                for mut delivery in unacked {
                    delivery.redelivered = true;
                    queue.ready.push_front(delivery);
                }
            }
        }
    }
}

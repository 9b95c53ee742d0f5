// ============================================================================
// Event Infrastructure
// ============================================================================
//
// Envelope (wire format) and dispatcher (routing). Knows nothing about brokers
// or about what handlers do with an event.
//
// ============================================================================

mod dispatcher;
mod envelope;

pub use dispatcher::{
    EventDispatcher, EventHandler, HandlerOutcome, HandlerRegistry, HandlerRegistryBuilder, RegistryError,
};
pub use envelope::{DecodeError, EventEnvelope, CONTENT_TYPE};

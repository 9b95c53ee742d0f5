// ============================================================================
// Order Domain - Business Logic for the Order Lifecycle
// ============================================================================
//
// This module contains ALL Order-specific code:
// - Value objects (OrderId, OrderItem, OrderStatus, Order)
// - Events (EventType and typed payloads)
// - Errors (OrderError enum)
// - State machine (pure transition decisions)
// - Handlers (store + notification + follow-on per event)
//
// The event infrastructure (envelope, dispatcher) knows nothing about orders.
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod errors;
pub mod state_machine;
pub mod handlers;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use errors::*;
pub use state_machine::{decide, transition_for, Transition};
pub use handlers::{register_order_handlers, AutoAdvance, HandlerContext, HandlerError, OrderTransitionHandler};

// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Each aggregate has its own subdirectory with value objects, events,
// errors, rules and the handlers that apply events to it.
//
// ============================================================================

pub mod order;

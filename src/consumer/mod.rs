// ============================================================================
// Event Consumer - one queue, one task
// ============================================================================
//
//   Disconnected{attempt} --connect+declare ok--> Connected --> Listening
//          |   ^                                                    |
//          |   +----------------- connection lost ------------------+
//          |
//          +-- attempts exhausted --> Failed        (run returns Err)
//
//   any state --shutdown--> Stopped                 (run returns Ok)
//
// Messages are processed one at a time: decode, dispatch, ack/reject, and
// only then receive the next one.
//
// ============================================================================

mod event_consumer;
mod state;

pub use event_consumer::{ConsumerError, ConsumerSettings, EventConsumer};
pub use state::{AckDecision, ConsumerState};

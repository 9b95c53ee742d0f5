pub mod circuit_breaker;
pub mod retry;
pub mod shutdown;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use retry::{retry_until_shutdown, retry_with_backoff, IsTransient, RetryConfig, RetryResult};
pub use shutdown::wait_for_shutdown;

pub mod circuit;
pub mod error;
pub mod retry;

pub use circuit::{CircuitBreakerConfig, CircuitBreakerRegistry};
pub use error::ResilienceError;
pub use retry::{execute, RetryConfig, RetryStrategy};

//! Composes the retry loop and the circuit breaker around a single cloud
//! call, the way every handler needs to invoke `hostbroker-cloud`: critical
//! mutating calls (`run_instances`, `create_fleet`, ...) go through both;
//! read-only/standard calls go through retry alone.

use std::future::Future;
use std::sync::Arc;

use hostbroker_domain::DomainError;
use hostbroker_resilience::{execute, CircuitBreakerRegistry, RetryStrategy};

use crate::error::ProviderError;

/// Bundles the circuit breaker registry every handler shares so a failure
/// against `ec2.run_instances` and `ec2.create_fleet` trip independent
/// breakers, keyed per `{service, operation}`.
#[derive(Clone)]
pub struct ResilienceContext {
    pub breakers: Arc<CircuitBreakerRegistry>,
}

impl ResilienceContext {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        ResilienceContext { breakers }
    }

    /// Run `op` under `strategy` for `{service, operation}`. `Critical`
    /// operations (and any operation name in the auto-upgrade set) run
    /// through the circuit breaker as well as the retry loop; `Standard`
    /// and `ReadOnly` skip the breaker.
    pub async fn call<F, Fut, T>(
        &self,
        strategy: RetryStrategy,
        service: &str,
        operation: &str,
        op: F,
    ) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        let effective = RetryStrategy::for_operation(strategy, operation);
        if effective == RetryStrategy::Critical {
            let result = self
                .breakers
                .call(service, operation, || execute(effective, service, operation, &op))
                .await;
            result.map_err(|e| ProviderError::Domain(DomainError::from(e)))
        } else {
            execute(effective, service, operation, op).await.map_err(ProviderError::Domain)
        }
    }
}

impl From<hostbroker_resilience::ResilienceError> for DomainError {
    fn from(err: hostbroker_resilience::ResilienceError) -> Self {
        match err {
            hostbroker_resilience::ResilienceError::CircuitOpen { service, operation } => {
                DomainError::CircuitOpen { service, operation }
            }
            hostbroker_resilience::ResilienceError::RetriesExhausted { source, .. } => source,
            hostbroker_resilience::ResilienceError::Domain(e) => e,
        }
    }
}

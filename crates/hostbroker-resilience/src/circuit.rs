use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::Utc;
use hostbroker_domain::{CircuitBreakerSnapshot, CircuitState, DomainError};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::ResilienceError;

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_timeout: Duration::from_secs(30),
            half_open_max_calls: 10,
        }
    }
}

#[derive(Debug, Clone)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    half_open_started_at: Option<Instant>,
    half_open_calls: u32,
}

impl Default for BreakerState {
    fn default() -> Self {
        BreakerState {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            opened_at: None,
            half_open_started_at: None,
            half_open_calls: 0,
        }
    }
}

/// Per-`{service, operation}` circuit breaker registry. A call through a
/// breaker that has tripped open fails fast with [`ResilienceError::CircuitOpen`]
/// instead of hitting AWS again; after `reset_timeout` the breaker allows a
/// bounded number of half-open probe calls before fully closing or re-opening.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<(String, String), BreakerState>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreakerRegistry { config, breakers: Mutex::new(HashMap::new()) }
    }

    /// Decide whether a call is allowed right now, transitioning Open ->
    /// HalfOpen if the reset timeout has elapsed and HalfOpen -> Open if the
    /// probe budget for this half-open window is exhausted.
    async fn admit(&self, service: &str, operation: &str) -> Result<(), ResilienceError> {
        let mut guard = self.breakers.lock().await;
        let key = (service.to_string(), operation.to_string());
        let entry = guard.entry(key).or_default();

        match entry.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = entry.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.reset_timeout {
                    entry.state = CircuitState::HalfOpen;
                    entry.half_open_started_at = Some(Instant::now());
                    entry.half_open_calls = 1;
                    info!(service, operation, "circuit half-open, admitting probe call");
                    Ok(())
                } else {
                    Err(ResilienceError::CircuitOpen {
                        service: service.to_string(),
                        operation: operation.to_string(),
                    })
                }
            }
            CircuitState::HalfOpen => {
                let elapsed = entry.half_open_started_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.half_open_timeout {
                    // Probe window expired without a verdict; re-open.
                    entry.state = CircuitState::Open;
                    entry.opened_at = Some(Instant::now());
                    Err(ResilienceError::CircuitOpen {
                        service: service.to_string(),
                        operation: operation.to_string(),
                    })
                } else if entry.half_open_calls >= self.config.half_open_max_calls {
                    Err(ResilienceError::CircuitOpen {
                        service: service.to_string(),
                        operation: operation.to_string(),
                    })
                } else {
                    entry.half_open_calls += 1;
                    Ok(())
                }
            }
        }
    }

    async fn on_success(&self, service: &str, operation: &str) {
        let mut guard = self.breakers.lock().await;
        let key = (service.to_string(), operation.to_string());
        let entry = guard.entry(key).or_default();
        if entry.state != CircuitState::Closed {
            info!(service, operation, "circuit closing after successful probe");
        }
        *entry = BreakerState::default();
    }

    async fn on_failure(&self, service: &str, operation: &str) {
        let mut guard = self.breakers.lock().await;
        let key = (service.to_string(), operation.to_string());
        let entry = guard.entry(key).or_default();
        entry.failure_count += 1;
        entry.last_failure_at = Some(Instant::now());
        match entry.state {
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.opened_at = Some(Instant::now());
                warn!(service, operation, "probe call failed, circuit re-opened");
            }
            CircuitState::Closed if entry.failure_count >= self.config.failure_threshold => {
                entry.state = CircuitState::Open;
                entry.opened_at = Some(Instant::now());
                warn!(
                    service,
                    operation,
                    failure_count = entry.failure_count,
                    "failure threshold reached, circuit opened"
                );
            }
            _ => {}
        }
    }

    /// Run `f` through the breaker for `{service, operation}`. Returns
    /// `CircuitOpen` without invoking `f` at all when the circuit has
    /// tripped and the reset/half-open windows have not yet permitted it.
    pub async fn call<F, Fut, T>(
        &self,
        service: &str,
        operation: &str,
        f: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        self.admit(service, operation).await?;
        match f().await {
            Ok(v) => {
                self.on_success(service, operation).await;
                Ok(v)
            }
            Err(err) => {
                self.on_failure(service, operation).await;
                Err(ResilienceError::Domain(err))
            }
        }
    }

    pub async fn snapshot(&self, service: &str, operation: &str) -> CircuitBreakerSnapshot {
        let guard = self.breakers.lock().await;
        let key = (service.to_string(), operation.to_string());
        let entry = guard.get(&key).cloned().unwrap_or_default();
        CircuitBreakerSnapshot {
            service: service.to_string(),
            operation: operation.to_string(),
            state: entry.state,
            failure_count: entry.failure_count,
            last_failure_at: entry.last_failure_at.map(|_| Utc::now()),
        }
    }

    pub async fn snapshot_all(&self) -> Vec<CircuitBreakerSnapshot> {
        let guard = self.breakers.lock().await;
        guard
            .iter()
            .map(|((service, operation), entry)| CircuitBreakerSnapshot {
                service: service.clone(),
                operation: operation.clone(),
                state: entry.state,
                failure_count: entry.failure_count,
                last_failure_at: entry.last_failure_at.map(|_| Utc::now()),
            })
            .collect()
    }
}

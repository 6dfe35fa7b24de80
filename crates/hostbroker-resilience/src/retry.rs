use std::future::Future;
use std::time::Duration;

use hostbroker_domain::DomainError;
use rand::Rng;
use tracing::{debug, warn};

/// Named retry strategies, mirroring the three operation tiers AWS handlers
/// are classified into: critical provisioning calls get a circuit breaker
/// and jittered backoff, read-only status checks get a short, un-jittered
/// retry, everything else gets standard exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    Critical,
    Standard,
    ReadOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryStrategy {
    pub fn config(self) -> RetryConfig {
        match self {
            RetryStrategy::Critical => RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                jitter: true,
            },
            RetryStrategy::Standard => RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                jitter: false,
            },
            RetryStrategy::ReadOnly => RetryConfig {
                max_attempts: 2,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(10),
                jitter: false,
            },
        }
    }

    /// Operations that always upgrade to `Critical`, regardless of what the
    /// caller asked for, because a failure here can leave a provider-side
    /// resource (fleet, ASG) orphaned without a matching request record.
    const CRITICAL_OPERATIONS: &'static [&'static str] = &[
        "create_fleet",
        "request_spot_fleet",
        "create_auto_scaling_group",
        "run_instances",
        "modify_fleet",
        "delete_fleets",
        "cancel_spot_fleet_requests",
        "update_auto_scaling_group",
        "delete_auto_scaling_group",
    ];

    pub fn for_operation(requested: RetryStrategy, operation_name: &str) -> RetryStrategy {
        if requested == RetryStrategy::Standard
            && Self::CRITICAL_OPERATIONS.contains(&operation_name)
        {
            RetryStrategy::Critical
        } else {
            requested
        }
    }
}

fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config.base_delay.as_secs_f64() * 2f64.powi(attempt as i32 - 1);
    let capped = exp.min(config.max_delay.as_secs_f64());
    let secs = if config.jitter {
        capped * rand::thread_rng().gen_range(0.5..1.5)
    } else {
        capped
    };
    Duration::from_secs_f64(secs.max(0.0))
}

/// Execute `op` under `strategy`, retrying on retryable [`DomainError`]s with
/// exponential backoff until `max_attempts` is reached. Non-retryable errors
/// return immediately without sleeping.
pub async fn execute<F, Fut, T>(
    strategy: RetryStrategy,
    service: &str,
    operation: &str,
    mut op: F,
) -> Result<T, DomainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DomainError>>,
{
    let strategy = RetryStrategy::for_operation(strategy, operation);
    let config = strategy.config();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                let exhausted = attempt >= config.max_attempts;
                if !err.is_retryable() || exhausted {
                    if exhausted && err.is_retryable() {
                        warn!(service, operation, attempt, "retries exhausted");
                    }
                    return Err(err);
                }
                let delay = backoff_delay(&config, attempt);
                debug!(
                    service,
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn standard_operations_upgrade_to_critical_by_name() {
        assert_eq!(
            RetryStrategy::for_operation(RetryStrategy::Standard, "create_fleet"),
            RetryStrategy::Critical
        );
        assert_eq!(
            RetryStrategy::for_operation(RetryStrategy::Standard, "describe_instances"),
            RetryStrategy::Standard
        );
        assert_eq!(
            RetryStrategy::for_operation(RetryStrategy::ReadOnly, "create_fleet"),
            RetryStrategy::ReadOnly
        );
    }

    #[test]
    fn backoff_delay_grows_and_respects_cap() {
        let config = RetryStrategy::Standard.config();
        let d1 = backoff_delay(&config, 1);
        let d2 = backoff_delay(&config, 2);
        let d3 = backoff_delay(&config, 10);
        assert!(d1 <= d2);
        assert!(d3 <= config.max_delay);
    }

    #[tokio::test]
    async fn execute_retries_retryable_errors_until_success() {
        let attempts = AtomicU32::new(0);
        let result = execute(RetryStrategy::ReadOnly, "ec2", "describe_instances", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(DomainError::Network("timeout".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn execute_does_not_retry_non_retryable_errors() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), DomainError> =
            execute(RetryStrategy::Standard, "ec2", "run_instances", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err(DomainError::Validation("bad template".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn execute_stops_at_max_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), DomainError> =
            execute(RetryStrategy::ReadOnly, "ec2", "describe_instances", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err(DomainError::RateLimit("slow down".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), RetryStrategy::ReadOnly.config().max_attempts);
    }
}

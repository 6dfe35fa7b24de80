use thiserror::Error;

/// Errors raised by provider handlers and the provider strategy. Every
/// public handler entry converts a [`hostbroker_domain::DomainError`] or a
/// [`hostbroker_resilience::ResilienceError`] into one of these at its
/// boundary so the application layer never inspects a cloud-specific error
/// again.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Domain(#[from] hostbroker_domain::DomainError),

    #[error(transparent)]
    Resilience(#[from] hostbroker_resilience::ResilienceError),

    #[error(transparent)]
    Cloud(#[from] hostbroker_cloud::CloudError),

    #[error("no handler registered for provider api {0}")]
    NoHandler(String),

    #[error("provisioning adapter unavailable for operation {0}")]
    AdapterUnavailable(String),
}

impl From<ProviderError> for hostbroker_domain::DomainError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Domain(e) => e,
            ProviderError::Resilience(hostbroker_resilience::ResilienceError::CircuitOpen {
                service,
                operation,
            }) => hostbroker_domain::DomainError::CircuitOpen { service, operation },
            ProviderError::Resilience(hostbroker_resilience::ResilienceError::RetriesExhausted {
                source,
                ..
            }) => source,
            ProviderError::Resilience(hostbroker_resilience::ResilienceError::Domain(e)) => e,
            ProviderError::Cloud(hostbroker_cloud::CloudError::Domain(e)) => e,
            ProviderError::Cloud(e) => hostbroker_domain::DomainError::Infra(e.to_string()),
            ProviderError::NoHandler(m) => hostbroker_domain::DomainError::ConfigurationError(m),
            ProviderError::AdapterUnavailable(m) => {
                hostbroker_domain::DomainError::ConfigurationError(m)
            }
        }
    }
}

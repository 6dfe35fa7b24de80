use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ResilienceError {
    #[error("circuit open for {service}.{operation}")]
    CircuitOpen { service: String, operation: String },

    #[error("operation failed after {attempts} attempt(s): {source}")]
    RetriesExhausted { attempts: u32, source: hostbroker_domain::DomainError },

    #[error(transparent)]
    Domain(#[from] hostbroker_domain::DomainError),
}

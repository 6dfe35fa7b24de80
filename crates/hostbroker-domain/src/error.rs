use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Domain error taxonomy. Every handler converts raw cloud SDK errors into
/// one of these kinds at the boundary; upstream code never inspects a raw
/// AWS error code again.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authorization denied: {0}")]
    Authorization(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("resource in use: {0}")]
    ResourceInUse(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("infrastructure error: {0}")]
    Infra(String),

    #[error("circuit open for {service}.{operation}")]
    CircuitOpen { service: String, operation: String },

    #[error("invalid request state transition: {0}")]
    InvalidState(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

impl DomainError {
    /// Whether the resilience layer should retry an operation that failed
    /// with this error kind.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::RateLimit(_) | DomainError::Network(_) | DomainError::Infra(_))
    }
}

/// Map a raw AWS error code/message pair to a domain error kind.
///
/// The single translation point every provider handler and the cloud client
/// façade call through, rather than inspecting AWS error codes directly.
pub fn from_aws_code(code: &str, message: &str) -> DomainError {
    match code {
        "ValidationError" | "InvalidParameterValue" | "InvalidParameterCombination" => {
            DomainError::Validation(message.to_string())
        }
        "LimitExceeded" | "InstanceLimitExceeded" | "MaxSpotInstanceCountExceeded" => {
            DomainError::Quota(message.to_string())
        }
        "ResourceInUse" | "IncorrectState" => DomainError::ResourceInUse(message.to_string()),
        "UnauthorizedOperation" | "AccessDenied" | "AuthFailure" => {
            DomainError::Authorization(message.to_string())
        }
        "RequestLimitExceeded" | "Throttling" => DomainError::RateLimit(message.to_string()),
        "ResourceNotFound" | "InvalidInstanceID.NotFound" | "InvalidFleetId.NotFound" => {
            DomainError::NotFound(message.to_string())
        }
        "RequestTimeout" | "ServiceUnavailable" | "RequestExpired" => {
            DomainError::Network(message.to_string())
        }
        other => DomainError::Infra(format!("{}: {}", other, message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_match_table() {
        assert!(DomainError::RateLimit("x".into()).is_retryable());
        assert!(DomainError::Network("x".into()).is_retryable());
        assert!(DomainError::Infra("x".into()).is_retryable());
        assert!(!DomainError::Validation("x".into()).is_retryable());
        assert!(!DomainError::NotFound("x".into()).is_retryable());
        assert!(!DomainError::Quota("x".into()).is_retryable());
    }

    #[test]
    fn aws_code_translation_matches_table() {
        assert_eq!(
            from_aws_code("InvalidParameterValue", "bad"),
            DomainError::Validation("bad".into())
        );
        assert_eq!(
            from_aws_code("RequestLimitExceeded", "slow down"),
            DomainError::RateLimit("slow down".into())
        );
        assert_eq!(
            from_aws_code("InvalidInstanceID.NotFound", "gone"),
            DomainError::NotFound("gone".into())
        );
        assert!(matches!(from_aws_code("SomethingWeird", "?"), DomainError::Infra(_)));
    }
}

use thiserror::Error;

use hostbroker_config::ConfigError;
use hostbroker_domain::DomainError;
use hostbroker_provider::ProviderError;
use hostbroker_store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no enabled provider instance satisfies the request")]
    NoProviderAvailable,

    #[error("provisioning failed: {0}")]
    Provisioning(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<AppError> for DomainError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(m) => DomainError::NotFound(m),
            AppError::Validation(m) => DomainError::Validation(m),
            AppError::NoProviderAvailable => {
                DomainError::ConfigurationError("no enabled provider instance".into())
            }
            AppError::Provisioning(m) => DomainError::Infra(m),
            AppError::Domain(e) => e,
            AppError::Provider(e) => DomainError::from(e),
            AppError::Store(e) => DomainError::Infra(e.to_string()),
            AppError::Config(e) => DomainError::ConfigurationError(e.to_string()),
            AppError::Serde(e) => DomainError::Infra(e.to_string()),
        }
    }
}

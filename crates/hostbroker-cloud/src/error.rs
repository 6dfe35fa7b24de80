use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloudError {
    #[error(transparent)]
    Domain(#[from] hostbroker_domain::DomainError),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("response decode failed: {0}")]
    Decode(String),

    #[error("no credentials available: {0}")]
    NoCredentials(String),
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request not found: {0}")]
    RequestNotFound(String),

    #[error("machine not found: {0}")]
    MachineNotFound(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}

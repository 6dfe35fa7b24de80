use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::BAD_REQUEST, message: msg.into() }
    }

    pub fn unprocessable(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::UNPROCESSABLE_ENTITY, message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::NOT_FOUND, message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, message: msg.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<hostbroker_app::AppError> for ApiError {
    fn from(e: hostbroker_app::AppError) -> Self {
        use hostbroker_app::AppError::*;
        match e {
            NotFound(_) => ApiError::not_found(e.to_string()),
            Validation(_) | NoProviderAvailable => ApiError::unprocessable(e.to_string()),
            Domain(ref d) => match d {
                hostbroker_domain::DomainError::Validation(_)
                | hostbroker_domain::DomainError::InvalidState(_) => ApiError::unprocessable(e.to_string()),
                hostbroker_domain::DomainError::NotFound(_) => ApiError::not_found(e.to_string()),
                _ => ApiError::internal(e.to_string()),
            },
            _ => ApiError::internal(e.to_string()),
        }
    }
}

impl From<hostbroker_store::StoreError> for ApiError {
    fn from(e: hostbroker_store::StoreError) -> Self {
        ApiError::internal(e.to_string())
    }
}

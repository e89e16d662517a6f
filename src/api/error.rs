//! HTTP error mapping.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::model::StoreError;
use crate::predict::PredictError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or incomplete client input.
    #[error("{0}")]
    BadRequest(String),
    /// Models are not loaded; the client may retry later.
    #[error("{0}")]
    ServiceUnavailable(String),
    /// Server misconfiguration, e.g. a model without feature metadata.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Internal(msg) => tracing::error!("Internal error: {}", msg),
            ApiError::ServiceUnavailable(msg) => tracing::warn!("Prediction unavailable: {}", msg),
            ApiError::BadRequest(msg) => tracing::debug!("Rejected request: {}", msg),
        }
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16()
        }));
        (status, body).into_response()
    }
}

impl From<PredictError> for ApiError {
    fn from(err: PredictError) -> Self {
        match err {
            PredictError::Encode(e) => ApiError::BadRequest(e.to_string()),
            PredictError::Schema(e) | PredictError::Store(StoreError::Schema(e)) => {
                ApiError::Internal(e.to_string())
            }
            PredictError::Store(StoreError::NotReady) => {
                ApiError::ServiceUnavailable("Models are not loaded".into())
            }
            PredictError::Store(e) => {
                ApiError::ServiceUnavailable(format!("Models are not loaded: {}", e))
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

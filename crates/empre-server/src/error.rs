use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use empre_core::LedgerError;
use empre_store::StoreError;
use serde_json::json;
use tracing::error;

use crate::ingest::IngestError;

/// Request failure rendered as `{"error": message}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(detail) => {
                error!(error = %detail, "request failed");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(format!("{what} not found")),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Malformed(e) => Self::BadRequest(e.to_string()),
            IngestError::Invalid(reason) => Self::BadRequest(reason),
            IngestError::Persist(LedgerError::Invalid(reason)) => Self::BadRequest(reason),
            IngestError::Persist(e) => Self::Internal(format!("persist failed: {e}")),
            IngestError::Encode(e) => Self::Internal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn renders_error_body() {
        let response = ApiError::Forbidden("not a participant".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await, json!({"error": "not a participant"}));
    }

    #[tokio::test]
    async fn internal_detail_is_hidden() {
        let response = ApiError::Internal("disk I/O error at page 7".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await, json!({"error": "internal server error"}));
    }

    #[test]
    fn store_not_found_maps_to_404() {
        let err: ApiError = StoreError::NotFound("message abc".into()).into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        let err: ApiError = StoreError::Database("locked".into()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn ingest_errors_map_by_cause() {
        let err: ApiError = IngestError::Invalid("empty".into()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let err: ApiError = IngestError::Persist(LedgerError::Storage("full".into())).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

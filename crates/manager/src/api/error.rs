use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::pool::PoolError;

/// API error variants, mapped onto status codes and stable kind strings.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("browser not found")]
    BrowserNotFound,
    #[error("no browser available")]
    NoCapacity,
    #[error("browser is not leased")]
    NotLeased,
    #[error("{0}")]
    InvalidRequest(String),
    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BrowserNotFound => "BROWSER_NOT_FOUND",
            Self::NoCapacity => "NO_CAPACITY",
            Self::NotLeased => "NOT_LEASED",
            Self::InvalidRequest(_) => "BAD_REQUEST",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl From<PoolError> for ApiError {
    fn from(error: PoolError) -> Self {
        match error {
            PoolError::UnknownSlot(_) => Self::BrowserNotFound,
            PoolError::NotLeased(_) => Self::NotLeased,
            PoolError::InvalidResolution(resolution) => {
                Self::InvalidRequest(format!("resolution not allowed: {}", resolution))
            }
            PoolError::Busy(name) => {
                Self::InvalidRequest(format!("operation already in flight for {}", name))
            }
            PoolError::Docker(e) => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BrowserNotFound => StatusCode::NOT_FOUND,
            Self::NoCapacity => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotLeased => StatusCode::CONFLICT,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if let Self::Internal(ref detail) = self {
            tracing::error!(error = %detail, "internal error");
        }
        let body = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn assert_error(error: ApiError, expected_status: StatusCode, expected_kind: &str) {
        let response = error.into_response();
        assert_eq!(response.status(), expected_status);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["kind"], expected_kind);
    }

    #[tokio::test]
    async fn test_not_found_mapping() {
        assert_error(
            ApiError::BrowserNotFound,
            StatusCode::NOT_FOUND,
            "BROWSER_NOT_FOUND",
        )
        .await;
    }

    #[tokio::test]
    async fn test_no_capacity_mapping() {
        assert_error(
            ApiError::NoCapacity,
            StatusCode::SERVICE_UNAVAILABLE,
            "NO_CAPACITY",
        )
        .await;
    }

    #[tokio::test]
    async fn test_invalid_request_mapping() {
        assert_error(
            ApiError::InvalidRequest("bad".to_string()),
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
        )
        .await;
    }

    #[tokio::test]
    async fn test_internal_is_sanitized() {
        let response = ApiError::Internal("socket broke".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        // The backend detail stays in the logs, not in the response.
        assert_eq!(json["message"], "internal error");
    }

    #[test]
    fn test_pool_error_conversion() {
        let api: ApiError = PoolError::UnknownSlot("bx-1".to_string()).into();
        assert!(matches!(api, ApiError::BrowserNotFound));
        let api: ApiError = PoolError::InvalidResolution("800x600".to_string()).into();
        assert!(matches!(api, ApiError::InvalidRequest(_)));
        let api: ApiError = PoolError::NotLeased("bx-1".to_string()).into();
        assert!(matches!(api, ApiError::NotLeased));
    }
}

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Json as RespJson, Response},
};
use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("Photo exceeds the maximum allowed size")]
    PayloadTooLarge,
    #[error("Only image files are allowed")]
    UnsupportedMediaType,
    #[error("Profile not found")]
    NotFound,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupted profile metadata: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::UnsupportedMediaType => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Io(_) | ApiError::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => ApiError::NotFound,
            StorageError::Io(e) => ApiError::Io(e),
            StorageError::Corrupt(e) => ApiError::Corrupt(e),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::Validation(format!("Malformed upload: {}", err.body_text()))
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            // Detail stays in the log, callers only get the generic message
            tracing::error!("🚨 Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (
            status,
            RespJson(serde_json::json!({
                "success": false,
                "error": message
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_status_codes() {
        assert_eq!(ApiError::validation("Name is required").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::UnsupportedMediaType.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::PayloadTooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        assert_eq!(ApiError::from(io).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn storage_not_found_becomes_404() {
        let err: ApiError = StorageError::NotFound.into();
        assert!(matches!(err, ApiError::NotFound));
    }

    async fn body_of(err: ApiError) -> (StatusCode, String) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn internal_errors_are_not_leaked() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "/secret/path unreadable");
        let (status, body) = body_of(ApiError::from(io)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "error": "Internal server error"}));
        assert!(!body.contains("secret"));
    }

    #[tokio::test]
    async fn corrupt_metadata_detail_is_not_leaked() {
        let parse = serde_json::from_str::<serde_json::Value>("{\"secret\": ").unwrap_err();
        let (status, body) = body_of(ApiError::from(parse)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "error": "Internal server error"}));
        assert!(!body.contains("EOF"));
    }

    #[tokio::test]
    async fn client_errors_carry_their_message() {
        let (status, body) = body_of(ApiError::NotFound).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "error": "Profile not found"}));
    }
}

pub(crate) mod chat;
pub(crate) mod documents;

use almacen_core::{SourceError, StoreError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// JSON error body `{status: "error", error}` with an HTTP status.
#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match e {
            StoreError::SystemOwned(_) => StatusCode::FORBIDDEN,
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Storage(_) | StoreError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<SourceError> for ApiError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Store(inner) => inner.into(),
            other => Self {
                status: StatusCode::BAD_GATEWAY,
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(target: "almacen::gateway", status = self.status.as_u16(), "{}", self.message);
        }
        (
            self.status,
            axum::Json(serde_json::json!({ "status": "error", "error": self.message })),
        )
            .into_response()
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Db(#[from] rota_db::DbError),

    #[error("proxy {0} not found")]
    ProxyNotFound(i32),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Db(rota_db::DbError::ProxyNotFound(_)) | ApiError::ProxyNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ApiError::InvalidSettings(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

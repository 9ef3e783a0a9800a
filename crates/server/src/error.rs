use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use cloudpilot_core::errors::InterfaceError;

pub struct ApiError(pub InterfaceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
        };
        warn!(
            event_name = "http.request_rejected",
            correlation_id = %self.0.correlation_id(),
            error = %self.0,
            "request rejected"
        );
        let body = json!({
            "error": self.0.user_message(),
            "correlation_id": self.0.correlation_id(),
        });
        (status, Json(body)).into_response()
    }
}

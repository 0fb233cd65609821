pub mod results;
pub mod subtest;

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::policy::SEC_WEBSOCKET_PROTOCOL;

// ─── Unified error type ──────────────────────────────────────────

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

/// The client must offer the measurement sub-protocol among its
/// `Sec-WebSocket-Protocol` values.
pub fn require_protocol(headers: &HeaderMap) -> Result<(), AppError> {
    let offered = headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|p| p.trim() == SEC_WEBSOCKET_PROTOCOL);
    if offered {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "missing Sec-WebSocket-Protocol: {SEC_WEBSOCKET_PROTOCOL}"
        )))
    }
}

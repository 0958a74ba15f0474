use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub enum HttpError {
    /// No live executor socket; surfaced immediately, never queued.
    NoExecutor,
    /// No event arrived within the wait window before headers.
    GatewayTimeout(String),
    /// The executor reported a failed fetch; status and message pass through
    /// verbatim.
    Upstream(u16, String),
    /// Uncategorized local failure.
    Internal(String),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        match self {
            HttpError::NoExecutor => (
                StatusCode::SERVICE_UNAVAILABLE,
                "no executor connection available".to_string(),
            )
                .into_response(),
            HttpError::GatewayTimeout(m) => (StatusCode::GATEWAY_TIMEOUT, m).into_response(),
            HttpError::Upstream(status, m) => (
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                m,
            )
                .into_response(),
            HttpError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("relay error: {m}"),
            )
                .into_response(),
        }
    }
}

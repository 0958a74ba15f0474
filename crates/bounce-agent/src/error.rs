use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum Error {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::error::Error),

    #[error("header value error: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    #[error("header name error: {0}")]
    InvalidHeaderName(#[from] reqwest::header::InvalidHeaderName),

    #[error("failed to parse relay frame: {0}")]
    ParseFailed(#[from] serde_json::Error),

    #[error("http client error: {0}")]
    HttpClientFailed(#[from] reqwest::Error),

    #[error("invalid HTTP method: {0}")]
    InvalidMethod(#[from] tungstenite::http::method::InvalidMethod),

    #[error("request body is not valid base64: {0}")]
    InvalidBody(#[from] base64::DecodeError),

    /// The operation's cancellation token fired; benign, never reported
    /// upstream as a user-facing error.
    #[error("operation aborted")]
    Aborted,
}

use axum::{
    extract::Request,
    http::{HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

const ALLOWED_METHODS: &str = "GET, POST, OPTIONS, PUT, PATCH, DELETE";

/// Upload-related headers the browser must be able to read back, on top of
/// the usual response metadata.
const EXPOSED_HEADERS: &str = "x-goog-upload-url, x-goog-upload-status, \
x-goog-upload-chunk-granularity, x-goog-upload-control-url, x-goog-upload-command, \
x-goog-upload-content-type, x-goog-upload-protocol, x-goog-upload-file-name, \
x-goog-upload-offset, date, content-type, content-length";

/// Reflective, fully permissive CORS: origin `*`, the client's requested
/// headers echoed back (or `*`), and upload headers exposed. `OPTIONS`
/// preflights short-circuit to 200 without touching the relay core.
pub async fn reflect(request: Request, next: Next) -> Response {
    let requested_headers = request
        .headers()
        .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned();

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        requested_headers.unwrap_or(HeaderValue::from_static("*")),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSED_HEADERS),
    );
    response
}

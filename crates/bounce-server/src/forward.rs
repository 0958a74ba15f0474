//! Request Forwarder: turns an inbound HTTP request into a job for an
//! executor and drives the executor's Wire Event stream back to the HTTP
//! client.
//!
//! Per-request lifecycle: no-executor fast fail, buffer the body, correlate
//! by a generated id, await headers (or an error), then stream chunks until
//! the terminal marker. The Message Queue is removed on every exit path.

use std::{collections::HashMap, convert::Infallible, sync::Arc};

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bounce_messages::{JobDescription, ServerControl, UPLOAD_URL_HEADER, WireEvent, is_binary_content_type};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    assets,
    error::HttpError,
    queue::{CHUNK_DEQUEUE_TIMEOUT, DEFAULT_DEQUEUE_TIMEOUT, MessageQueue, QueueError, QueueItem},
    state::AppState,
    util,
};

/// Dropped before copying executor headers onto the HTTP response: the CORS
/// trio would conflict with the relay's own reflective policy, and the length
/// framing no longer holds once the body is re-streamed (keepalives may be
/// injected).
const BLOCKED_RESPONSE_HEADERS: [&str; 5] = [
    "access-control-allow-origin",
    "access-control-allow-methods",
    "access-control-allow-headers",
    "content-length",
    "transfer-encoding",
];

pub async fn fallback_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Response {
    if is_relay_request(&method, &uri) {
        forward_request(state, method, uri, headers, body).await
    } else {
        assets::serve(&state.config.static_dir, uri.path()).await
    }
}

/// API traffic goes over the relay; plain GETs without a query string fall
/// through to static assets / the SPA index.
fn is_relay_request(method: &Method, uri: &Uri) -> bool {
    uri.path().starts_with("/v1")
        || uri.path().starts_with("/upload")
        || method != Method::GET
        || uri.query().is_some_and(|q| !q.is_empty())
}

async fn forward_request(
    state: Arc<AppState>,
    method: Method,
    uri: Uri,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Response {
    if !state.registry.has_active_connections().await {
        return HttpError::NoExecutor.into_response();
    }

    let request_id = util::generate_request_id();
    tracing::info!("🖥 relay request ({request_id}): {method} {uri}");

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| uri.path().to_string());

    let job = JobDescription {
        request_id: request_id.clone(),
        method: method.to_string(),
        path: uri.path().to_string(),
        url: Some(path_and_query),
        headers: util::into_hashmap(&headers),
        query_params: util::query_map(uri.query()),
        body_b64: (!body.is_empty()).then(|| BASE64.encode(&body)),
    };

    // Queue before send, so response events can never race queue creation.
    let queue = state.registry.create_message_queue(&request_id).await;
    if !state.registry.send_to_executor(&job).await {
        state.registry.remove_message_queue(&request_id).await;
        return HttpError::NoExecutor.into_response();
    }

    match await_first_event(&queue).await {
        Ok((status, upstream_headers)) => {
            stream_response(state, request_id, queue, status, upstream_headers)
        }
        Err(error) => {
            state.registry.remove_message_queue(&request_id).await;
            error.into_response()
        }
    }
}

async fn await_first_event(
    queue: &MessageQueue,
) -> Result<(u16, HashMap<String, String>), HttpError> {
    match queue.dequeue(DEFAULT_DEQUEUE_TIMEOUT).await {
        Ok(QueueItem::Event(WireEvent::ResponseHeaders {
            status, headers, ..
        })) => Ok((status, headers)),
        Ok(QueueItem::Event(WireEvent::Error {
            status, message, ..
        })) => Err(HttpError::Upstream(status.unwrap_or(500), message)),
        Ok(QueueItem::Event(event)) => Err(HttpError::Internal(format!(
            "unexpected {} event before response headers",
            event.name()
        ))),
        Ok(QueueItem::StreamEnd) => Err(HttpError::Internal(
            "stream closed before response headers".to_string(),
        )),
        Err(QueueError::Timeout) => {
            Err(HttpError::GatewayTimeout("request timed out".to_string()))
        }
        Err(QueueError::Closed) => Err(HttpError::Internal(
            "executor connection lost".to_string(),
        )),
    }
}

fn stream_response(
    state: Arc<AppState>,
    request_id: String,
    queue: Arc<MessageQueue>,
    status: u16,
    upstream_headers: HashMap<String, String>,
) -> Response {
    let origin = state.config.advertised_origin();
    let mut builder =
        Response::builder().status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK));

    let mut content_type = String::new();
    for (name, value) in &upstream_headers {
        let lower = name.to_ascii_lowercase();
        if BLOCKED_RESPONSE_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        if lower == header::CONTENT_TYPE.as_str() {
            content_type = value.clone();
        }
        let value = if lower == UPLOAD_URL_HEADER {
            rewrite_upload_url(value, &origin)
        } else {
            value.clone()
        };
        match (
            HeaderName::try_from(lower.as_str()),
            HeaderValue::try_from(value),
        ) {
            (Ok(name), Ok(value)) => builder = builder.header(name, value),
            _ => tracing::warn!("skipping invalid upstream header: {name}"),
        }
    }

    let sse = content_type.contains("text/event-stream");
    let binary = is_binary_content_type(&content_type);

    let (tx, rx) = mpsc::unbounded_channel::<Result<Bytes, Infallible>>();
    tokio::spawn(drive_stream(state, request_id, queue, sse, binary, tx));

    match builder.body(Body::from_stream(UnboundedReceiverStream::new(rx))) {
        Ok(response) => response,
        Err(err) => HttpError::Internal(err.to_string()).into_response(),
    }
}

/// Pumps chunks from the Message Queue into the HTTP body until the terminal
/// marker, a stall, teardown, or the client going away. Owns the final
/// cleanup: an abnormal end asks the executor to abort its fetch, and the
/// queue is removed unconditionally.
async fn drive_stream(
    state: Arc<AppState>,
    request_id: String,
    queue: Arc<MessageQueue>,
    sse: bool,
    binary: bool,
    tx: mpsc::UnboundedSender<Result<Bytes, Infallible>>,
) {
    let mut completed = false;
    loop {
        match queue.dequeue(CHUNK_DEQUEUE_TIMEOUT).await {
            Ok(QueueItem::StreamEnd) => {
                completed = true;
                break;
            }
            Ok(QueueItem::Event(WireEvent::Chunk { data, .. })) => {
                if tx.send(Ok(decode_chunk(data, binary))).is_err() {
                    break;
                }
            }
            Ok(QueueItem::Event(event)) => {
                tracing::warn!(
                    "unexpected {} event mid-stream for {request_id}",
                    event.name()
                );
                break;
            }
            Err(QueueError::Timeout) => {
                if sse {
                    // Comment line per the SSE protocol; keeps the connection
                    // alive through slow generation without polluting data.
                    if tx.send(Ok(Bytes::from_static(b": keepalive\n\n"))).is_err() {
                        break;
                    }
                } else {
                    tracing::debug!("stream stalled for {request_id}, closing response");
                    break;
                }
            }
            Err(QueueError::Closed) => break,
        }
    }

    if !completed {
        let cancel = ServerControl::CancelRequest {
            request_id: request_id.clone(),
        };
        state.registry.send_to_executor(&cancel).await;
    }
    state.registry.remove_message_queue(&request_id).await;
}

fn decode_chunk(data: String, binary: bool) -> Bytes {
    if binary {
        match BASE64.decode(&data) {
            Ok(bytes) => Bytes::from(bytes),
            Err(_) => Bytes::from(data),
        }
    } else {
        Bytes::from(data)
    }
}

/// Re-roots an upload-continuation URL at the relay's own listener so the
/// client's next upload leg targets the relay, not the upstream host. Path
/// and query (including the override-host parameter added by the executor)
/// are preserved; an unparseable value passes through untouched.
fn rewrite_upload_url(value: &str, origin: &str) -> String {
    match url::Url::parse(value) {
        Ok(parsed) => {
            let query = parsed
                .query()
                .map(|q| format!("?{q}"))
                .unwrap_or_default();
            format!("http://{origin}{}{query}", parsed.path())
        }
        Err(_) => value.to_string(),
    }
}

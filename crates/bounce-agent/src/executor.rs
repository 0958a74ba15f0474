//! Job execution: resolve the real destination, perform the fetch, and hand
//! the response to the stream handler. Every job is independently
//! cancellable by correlation id.

use std::{
    collections::HashMap,
    str::FromStr,
    sync::{Arc, Mutex},
};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bounce_messages::{ExecutorFrame, JobDescription, ServerControl, WireEvent};
use reqwest::{
    Client, Method,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use tokio_util::sync::CancellationToken;

use crate::{connection::Transmitter, error::Error, stream::StreamHandler, target::resolve_target};

const DEFAULT_RELAY_HOST: &str = "127.0.0.1:8889";

/// Transport and fingerprinting headers that must not be forwarded verbatim
/// to the upstream.
const FORBIDDEN_HEADERS: [&str; 5] = ["host", "connection", "content-length", "referer", "user-agent"];

/// In-flight cancellation tokens keyed by correlation id. Cancelling one job
/// never affects the others; a disconnect cancels them all.
#[derive(Default)]
pub struct OperationRegistry {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl OperationRegistry {
    fn register(&self, request_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens
            .lock()
            .expect("operations lock poisoned")
            .insert(request_id.to_string(), token.clone());
        token
    }

    fn unregister(&self, request_id: &str) {
        self.tokens
            .lock()
            .expect("operations lock poisoned")
            .remove(request_id);
    }

    pub fn cancel(&self, request_id: &str) {
        let token = self
            .tokens
            .lock()
            .expect("operations lock poisoned")
            .remove(request_id);
        if let Some(token) = token {
            token.cancel();
            tracing::info!("🛑 cancelled operation {request_id}");
        }
    }

    pub fn cancel_all(&self) {
        let mut tokens = self.tokens.lock().expect("operations lock poisoned");
        if tokens.is_empty() {
            return;
        }
        tracing::warn!("cancelling {} in-flight operation(s)", tokens.len());
        for (_, token) in tokens.drain() {
            token.cancel();
        }
    }
}

struct SystemInner {
    client: Client,
    transmitter: Transmitter,
    streamer: StreamHandler,
    operations: OperationRegistry,
    target_domain: String,
    relay_host: Option<String>,
}

/// The executor side of the relay: consumes job and cancel frames, fans each
/// job out into its own task, and reports outcomes as wire events. Errors
/// travel as events, never as transport failures.
#[derive(Clone)]
pub struct ProxySystem {
    inner: Arc<SystemInner>,
}

impl ProxySystem {
    pub fn new(
        client: Client,
        transmitter: Transmitter,
        target_domain: String,
        relay_host: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(SystemInner {
                client,
                streamer: StreamHandler::new(transmitter.clone()),
                transmitter,
                operations: OperationRegistry::default(),
                target_domain,
                relay_host,
            }),
        }
    }

    pub fn cancel_all(&self) {
        self.inner.operations.cancel_all();
    }

    pub fn handle_frame(&self, raw: &str) {
        match serde_json::from_str::<ExecutorFrame>(raw) {
            Ok(ExecutorFrame::Control(ServerControl::CancelRequest { request_id })) => {
                self.inner.operations.cancel(&request_id);
            }
            Ok(ExecutorFrame::Job(job)) => {
                let system = self.clone();
                tokio::spawn(async move { system.process_job(job).await });
            }
            Err(err) => {
                tracing::warn!("dropping unparseable frame: {err}");
            }
        }
    }

    async fn process_job(&self, job: JobDescription) {
        tracing::info!(
            "📨 job {}: {} {}",
            job.request_id,
            job.method,
            job.url.as_deref().unwrap_or(&job.path)
        );

        let token = self.inner.operations.register(&job.request_id);
        let outcome = tokio::select! {
            _ = token.cancelled() => Err(Error::Aborted),
            result = self.fetch_and_stream(&job) => result,
        };
        self.inner.operations.unregister(&job.request_id);

        match outcome {
            Ok(()) => {}
            Err(Error::Aborted) => {
                tracing::debug!("job {} aborted", job.request_id);
                // Terminal marker regardless, so the consumer side can never
                // be left hanging on a cancelled job.
                self.inner.streamer.transmit_stream_end(&job.request_id);
            }
            Err(err) => {
                tracing::error!("job {} failed: {err}", job.request_id);
                self.send_error(&job.request_id, &err);
            }
        }
    }

    async fn fetch_and_stream(&self, job: &JobDescription) -> Result<(), Error> {
        let target = resolve_target(job, &self.inner.target_domain);
        let response = self.dispatch(job, &target.url).await?;
        let relay_host = self.relay_host(job);
        self.inner
            .streamer
            .process(response, &job.request_id, &relay_host, &target.host)
            .await
    }

    async fn dispatch(&self, job: &JobDescription, url: &str) -> Result<reqwest::Response, Error> {
        let method = Method::from_str(&job.method)?;

        let mut headers = HeaderMap::new();
        for (name, value) in sanitized_headers(&job.headers) {
            headers.insert(name.parse::<HeaderName>()?, value.parse::<HeaderValue>()?);
        }

        let mut request = self.inner.client.request(method.clone(), url).headers(headers);
        if [Method::POST, Method::PUT, Method::PATCH].contains(&method) {
            if let Some(body_b64) = &job.body_b64 {
                request = request.body(BASE64.decode(body_b64)?);
            }
        }

        // 4xx/5xx responses are not errors here: they relay back intact.
        Ok(request.send().await?)
    }

    /// host:port the relay advertises for rewritten URLs: explicit
    /// configuration first, then the request's own host header.
    fn relay_host(&self, job: &JobDescription) -> String {
        self.inner
            .relay_host
            .clone()
            .or_else(|| {
                job.headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case("host"))
                    .map(|(_, value)| value.clone())
            })
            .unwrap_or_else(|| DEFAULT_RELAY_HOST.to_string())
    }

    fn send_error(&self, request_id: &str, error: &Error) {
        self.inner.transmitter.send_event(&WireEvent::Error {
            request_id: request_id.to_string(),
            status: Some(500),
            message: format!("proxy system error: {error}"),
        });
    }
}

fn sanitized_headers(headers: &HashMap<String, String>) -> impl Iterator<Item = (&String, &String)> {
    headers.iter().filter(|(name, _)| {
        let lower = name.to_ascii_lowercase();
        !FORBIDDEN_HEADERS.contains(&lower.as_str()) && !lower.starts_with("sec-fetch-")
    })
}

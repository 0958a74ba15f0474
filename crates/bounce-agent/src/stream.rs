//! Streams an upstream response back over the wire, chunk by chunk.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bounce_messages::{UPLOAD_URL_HEADER, WireEvent, is_binary_content_type};
use futures_util::StreamExt;
use reqwest::header;

use crate::{connection::Transmitter, error::Error, target::rewrite_upstream_header};

pub struct StreamHandler {
    transmitter: Transmitter,
}

impl StreamHandler {
    pub fn new(transmitter: Transmitter) -> Self {
        Self { transmitter }
    }

    /// Relays headers, then the body. Text bodies are decoded incrementally
    /// (multi-byte characters split across reads survive); binary bodies
    /// travel base64. The terminal marker goes out on every path, read errors
    /// included, so the server side is never left waiting.
    pub async fn process(
        &self,
        response: reqwest::Response,
        request_id: &str,
        relay_host: &str,
        target_host: &str,
    ) -> Result<(), Error> {
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let binary = is_binary_content_type(&content_type);
        if binary {
            tracing::debug!("binary response ({content_type}) for {request_id}");
        }

        self.transmit_headers(&response, request_id, relay_host, target_host);

        let mut body = response.bytes_stream();
        let mut decoder = Utf8StreamDecoder::default();
        let result = loop {
            match body.next().await {
                Some(Ok(bytes)) => {
                    let data = if binary {
                        BASE64.encode(&bytes)
                    } else {
                        decoder.decode(&bytes)
                    };
                    if !data.is_empty() {
                        self.transmit_chunk(request_id, data);
                    }
                }
                Some(Err(err)) => break Err(Error::from(err)),
                None => {
                    if !binary {
                        let tail = decoder.finish();
                        if !tail.is_empty() {
                            self.transmit_chunk(request_id, tail);
                        }
                    }
                    break Ok(());
                }
            }
        };

        self.transmit_stream_end(request_id);
        result
    }

    fn transmit_headers(
        &self,
        response: &reqwest::Response,
        request_id: &str,
        relay_host: &str,
        target_host: &str,
    ) {
        let mut headers = HashMap::with_capacity(response.headers().len());
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else {
                continue;
            };
            // HeaderName is already lowercase.
            let lower = name.as_str();
            let value = if lower == "location" || lower == UPLOAD_URL_HEADER {
                rewrite_upstream_header(value, relay_host, target_host)
            } else {
                value.to_string()
            };
            headers.insert(name.to_string(), value);
        }

        self.transmitter.send_event(&WireEvent::ResponseHeaders {
            request_id: request_id.to_string(),
            status: response.status().as_u16(),
            headers,
        });
    }

    fn transmit_chunk(&self, request_id: &str, data: String) {
        self.transmitter.send_event(&WireEvent::Chunk {
            request_id: request_id.to_string(),
            data,
        });
    }

    pub fn transmit_stream_end(&self, request_id: &str) {
        self.transmitter.send_event(&WireEvent::StreamClose {
            request_id: request_id.to_string(),
        });
    }
}

/// Incremental UTF-8 decoding over an arbitrary chunking of a byte stream.
/// A trailing incomplete sequence is held back for the next read; invalid
/// bytes decode to U+FFFD.
#[derive(Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn decode(&mut self, input: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(input);

        let mut out = String::new();
        let mut rest: &[u8] = &buf;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, invalid) = rest.split_at(err.valid_up_to());
                    if let Ok(s) = std::str::from_utf8(valid) {
                        out.push_str(s);
                    }
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &invalid[len..];
                        }
                        None => {
                            // Incomplete trailing sequence; wait for more.
                            self.pending = invalid.to_vec();
                            return out;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flushes at end of stream; a dangling partial sequence becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }
}

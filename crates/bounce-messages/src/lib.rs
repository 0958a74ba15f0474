//! Wire protocol shared by the relay server and the execution agent.
//!
//! Every frame is a JSON text message. Requests travel server → agent as a
//! [`JobDescription`]; response progress travels agent → server as a stream of
//! [`WireEvent`]s correlated by `request_id`. Everything else on the socket is
//! a control frame.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Query parameter carrying the true upstream host through a rewritten URL.
pub const OVERRIDE_HOST_PARAM: &str = "__proxy_host__";

/// Upload-continuation header rewritten on both sides of the relay.
pub const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";

/// Upstream host requests resolve against unless overridden per request.
pub const DEFAULT_TARGET_DOMAIN: &str = "generativelanguage.googleapis.com";

/// One HTTP request, serialized for transport to an executor.
///
/// Created once at ingress and immutable after send. `url` carries the
/// original path + query string; `query_params` is kept alongside for
/// executors that need the parsed form. The body is base64 so binary payloads
/// survive the JSON transport; an empty body is omitted entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescription {
    pub request_id: String,
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_b64: Option<String>,
}

/// Response progress for one request, executor → server.
///
/// For any `request_id` the sequence is `response_headers` (or `error`),
/// zero or more `chunk`s, then exactly one `stream_close` terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum WireEvent {
    ResponseHeaders {
        request_id: String,
        status: u16,
        headers: HashMap<String, String>,
    },
    Chunk {
        request_id: String,
        data: String,
    },
    Error {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        message: String,
    },
    StreamClose {
        request_id: String,
    },
}

impl WireEvent {
    pub fn request_id(&self) -> &str {
        match self {
            WireEvent::ResponseHeaders { request_id, .. }
            | WireEvent::Chunk { request_id, .. }
            | WireEvent::Error { request_id, .. }
            | WireEvent::StreamClose { request_id } => request_id,
        }
    }

    /// The wire-level `event_type` tag, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            WireEvent::ResponseHeaders { .. } => "response_headers",
            WireEvent::Chunk { .. } => "chunk",
            WireEvent::Error { .. } => "error",
            WireEvent::StreamClose { .. } => "stream_close",
        }
    }
}

/// Control frames a peer may send to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PeerControl {
    /// Reclassifies the sending socket from executor to broadcast subscriber.
    /// One-way for the lifetime of the socket.
    #[serde(rename = "REGISTER_SYNC_CLIENT")]
    RegisterSyncClient,
}

/// Anything a peer socket may deliver to the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PeerFrame {
    Control(PeerControl),
    Event(WireEvent),
}

/// Control frames the server may send to an executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerControl {
    /// Abort the in-flight fetch for one correlation id.
    #[serde(rename = "CANCEL_REQUEST")]
    CancelRequest { request_id: String },
}

/// Anything the server may deliver to an executor socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExecutorFrame {
    Control(ServerControl),
    Job(JobDescription),
}

/// Data-sync change notification fanned out to subscriber sockets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncNotification {
    #[serde(rename = "SYNC_EVENT", rename_all = "camelCase")]
    Updated {
        data_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        updated_at: Option<f64>,
    },
    #[serde(rename = "SYNC_DELETE_EVENT", rename_all = "camelCase")]
    Deleted { data_type: String, item_id: String },
}

/// Whether a response body must travel base64-encoded.
///
/// Only explicitly binary media count; anything else (missing content type,
/// `text/event-stream`, `application/grpc`, ...) is treated as text, because
/// the primary payloads are event streams that often arrive with missing or
/// nonstandard content-type metadata.
pub fn is_binary_content_type(content_type: &str) -> bool {
    content_type.contains("image/")
        || content_type.contains("video/")
        || content_type.contains("audio/")
        || content_type.contains("application/octet-stream")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_event_uses_snake_case_tags() {
        let event = WireEvent::ResponseHeaders {
            request_id: "r1".into(),
            status: 200,
            headers: HashMap::new(),
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "response_headers");
        assert_eq!(json["request_id"], "r1");

        let close: WireEvent =
            serde_json::from_str(r#"{"event_type":"stream_close","request_id":"r1"}"#).unwrap();
        assert!(matches!(close, WireEvent::StreamClose { .. }));
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let result = serde_json::from_str::<PeerFrame>(
            r#"{"event_type":"telemetry","request_id":"r1","data":"x"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn registration_frame_parses_as_control() {
        let frame: PeerFrame = serde_json::from_str(r#"{"type":"REGISTER_SYNC_CLIENT"}"#).unwrap();
        assert!(matches!(
            frame,
            PeerFrame::Control(PeerControl::RegisterSyncClient)
        ));
    }

    #[test]
    fn executor_frame_distinguishes_cancel_from_job() {
        let cancel: ExecutorFrame =
            serde_json::from_str(r#"{"type":"CANCEL_REQUEST","request_id":"r1"}"#).unwrap();
        assert!(matches!(
            cancel,
            ExecutorFrame::Control(ServerControl::CancelRequest { .. })
        ));

        let job: ExecutorFrame = serde_json::from_str(
            r#"{"request_id":"r2","method":"GET","path":"/v1beta/models","headers":{}}"#,
        )
        .unwrap();
        match job {
            ExecutorFrame::Job(job) => {
                assert_eq!(job.request_id, "r2");
                assert!(job.url.is_none());
                assert!(job.body_b64.is_none());
            }
            other => panic!("expected job, got {other:?}"),
        }
    }

    #[test]
    fn empty_body_is_omitted_from_the_wire() {
        let job = JobDescription {
            request_id: "r1".into(),
            method: "GET".into(),
            path: "/v1beta/models".into(),
            url: None,
            headers: HashMap::new(),
            query_params: BTreeMap::new(),
            body_b64: None,
        };
        let json = serde_json::to_string(&job).unwrap();
        assert!(!json.contains("body_b64"));
        assert!(!json.contains("\"url\""));
    }

    #[test]
    fn sync_notifications_use_camel_case_fields() {
        let updated = SyncNotification::Updated {
            data_type: "session".into(),
            item_id: Some("abc".into()),
            updated_at: Some(1700000000000.0),
        };
        let json: serde_json::Value = serde_json::to_value(&updated).unwrap();
        assert_eq!(json["type"], "SYNC_EVENT");
        assert_eq!(json["dataType"], "session");
        assert_eq!(json["itemId"], "abc");
        assert!(json["updatedAt"].is_f64());

        let deleted = SyncNotification::Deleted {
            data_type: "session".into(),
            item_id: "abc".into(),
        };
        let json: serde_json::Value = serde_json::to_value(&deleted).unwrap();
        assert_eq!(json["type"], "SYNC_DELETE_EVENT");
    }

    #[test]
    fn binary_classification_is_explicit_only() {
        assert!(is_binary_content_type("image/png"));
        assert!(is_binary_content_type("video/mp4"));
        assert!(is_binary_content_type("audio/wav"));
        assert!(is_binary_content_type("application/octet-stream"));

        assert!(!is_binary_content_type("text/event-stream"));
        assert!(!is_binary_content_type(""));
        assert!(!is_binary_content_type("application/grpc"));
        assert!(!is_binary_content_type("application/json; charset=utf-8"));
    }
}

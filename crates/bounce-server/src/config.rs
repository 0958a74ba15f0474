use std::path::PathBuf;

use crate::util::from_env_or_else;

/// External configuration for the relay. Opaque inputs to the core: ports,
/// bind host, and the directories the glue features read from.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    pub ws_port: u16,
    pub static_dir: PathBuf,
    pub storage_dir: PathBuf,
    /// Cap on a buffered inbound request body, in bytes. Upstream payloads
    /// are bounded API calls and uploads, not arbitrary streams.
    pub max_body_bytes: usize,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: from_env_or_else("BOUNCE_HOST", || "0.0.0.0".to_string()),
            http_port: from_env_or_else("BOUNCE_HTTP_PORT", || 8889),
            ws_port: from_env_or_else("BOUNCE_WS_PORT", || 9998),
            static_dir: from_env_or_else("BOUNCE_STATIC_DIR", || "./dist".to_string()).into(),
            storage_dir: from_env_or_else("BOUNCE_STORAGE_DIR", || "./storage".to_string()).into(),
            max_body_bytes: from_env_or_else("BOUNCE_MAX_BODY_MB", || 50) * 1024 * 1024,
        }
    }

    /// host:port clients reach the HTTP listener on; substituted into
    /// rewritten upload-continuation URLs so continuations target the relay.
    pub fn advertised_origin(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }
}

use axum_server::tls_rustls::RustlsConfig;

use crate::util::from_env_or_else;

pub fn init() {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("cryptoprovider should be installed");
}

/// TLS is opt-in: when the configured cert/key pair is readable, both the
/// HTTP and WebSocket listeners serve it; otherwise they stay plaintext.
pub async fn config() -> Option<RustlsConfig> {
    RustlsConfig::from_pem_file(
        from_env_or_else("BOUNCE_TLS_CERT_FILE", || "./certs/cert.pem".to_string()),
        from_env_or_else("BOUNCE_TLS_KEY_FILE", || "./certs/key.pem".to_string()),
    )
    .await
    .ok()
}

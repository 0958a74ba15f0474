use anyhow::{Context, anyhow};
use rustls::pki_types::pem::PemObject;
use std::{fs, sync::Arc};
use tokio_tungstenite::Connector;

pub fn init() -> anyhow::Result<()> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install default crypto provider"))?;
    Ok(())
}

/// Optional custom trust root for the websocket connection; `None` falls back
/// to the platform verifier.
pub fn connector(ca_cert_path: &Option<String>) -> anyhow::Result<Option<Connector>> {
    let Some(cert_path) = ca_cert_path.as_ref() else {
        return Ok(None);
    };

    let pem_bytes = fs::read(cert_path)
        .with_context(|| format!("failed to read CA certificate at path: {cert_path}"))?;

    let certificate = rustls::pki_types::CertificateDer::from_pem_slice(&pem_bytes)
        .context("CA certificate is not valid PEM")?;

    let mut roots = rustls::RootCertStore::empty();
    roots
        .add(certificate)
        .context("failed to add CA certificate to the trust store")?;

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(Some(Connector::Rustls(Arc::new(config))))
}

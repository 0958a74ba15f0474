#![allow(clippy::collapsible_if)]

use std::time::Duration;

use anyhow::Context;

mod cli;
mod connection;
mod error;
mod executor;
mod stream;
mod target;
mod tls;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    tls::init()?;

    let args = cli::args();

    let http_client = reqwest::Client::builder()
        .use_rustls_tls()
        .build()
        .context("failed to build http client")?;
    let connector = tls::connector(&args.ca_cert)?;

    let ws_proto = if args.insecure { "ws://" } else { "wss://" };
    let endpoint = format!("{ws_proto}{}", args.server);

    let manager = connection::ConnectionManager::new(
        endpoint,
        Duration::from_millis(args.reconnect_delay_ms),
        connector,
    );
    let system = executor::ProxySystem::new(
        http_client,
        manager.transmitter(),
        args.target_domain.clone(),
        args.relay_host.clone(),
    );

    tracing::info!("🛰 bounce agent starting, target domain: {}", args.target_domain);
    manager.run(&system).await;

    Ok(())
}

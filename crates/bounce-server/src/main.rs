#![allow(clippy::collapsible_if)]

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use bounce_server::{config::ServerConfig, state::AppState, http_router, tls, ws_router};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    tls::init();

    let config = ServerConfig::from_env();
    tracing::info!("🛰 bounce relay server starting");

    let state = Arc::new(AppState::new(config.clone()));
    state.sync.init().await?;

    let bind_ip: IpAddr = config
        .host
        .parse()
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let http_addr = SocketAddr::from((bind_ip, config.http_port));
    let ws_addr = SocketAddr::from((bind_ip, config.ws_port));

    let tls_config = tls::config().await;
    let scheme = if tls_config.is_some() { "https" } else { "http" };
    tracing::info!("🚀 http listener on {scheme}://{http_addr}");
    tracing::info!("🚀 websocket listener on {ws_addr}");

    tokio::select! {
        result = serve(http_addr, http_router(state.clone()), tls_config.clone()) => result?,
        result = serve(ws_addr, ws_router(state), tls_config) => result?,
    }

    Ok(())
}

async fn serve(
    addr: SocketAddr,
    router: Router,
    tls_config: Option<RustlsConfig>,
) -> std::io::Result<()> {
    match tls_config {
        Some(tls_config) => {
            axum_server::bind_rustls(addr, tls_config)
                .serve(router.into_make_service())
                .await
        }
        None => axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await,
    }
}

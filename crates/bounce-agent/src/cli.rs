use clap::Parser;

#[derive(Parser, Debug)]
#[command(version)]
pub struct Args {
    #[arg(long, short, env = "BOUNCE_SERVER", default_value = "127.0.0.1:9998")]
    /// The relay server websocket address, e.g: 127.0.0.1:9998 or my.server.com
    pub server: String,

    #[arg(
        long,
        env = "BOUNCE_TARGET_DOMAIN",
        default_value = bounce_messages::DEFAULT_TARGET_DOMAIN
    )]
    /// Upstream host requests are resolved against unless overridden per request
    pub target_domain: String,

    #[arg(long, env = "BOUNCE_RELAY_HOST")]
    /// host:port to substitute into rewritten redirect/upload URLs
    /// (defaults to each request's own host header)
    pub relay_host: Option<String>,

    #[arg(long, env = "BOUNCE_RECONNECT_DELAY_MS", default_value_t = 5000)]
    /// Delay between reconnect attempts in milliseconds
    pub reconnect_delay_ms: u64,

    #[arg(long, short)]
    /// Connect to the relay server without TLS
    pub insecure: bool,

    #[arg(long, short, env = "BOUNCE_CA_CERT")]
    /// Path to CA certificate (PEM encoded)
    pub ca_cert: Option<String>,
}

pub fn args() -> Args {
    Args::parse()
}

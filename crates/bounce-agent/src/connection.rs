//! WebSocket transport lifecycle: connect, serve, reconnect forever.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use bounce_messages::WireEvent;
use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config,
    tungstenite::{Message, client::IntoClientRequest},
};

use crate::executor::ProxySystem;

/// Handle for pushing frames onto whichever connection is currently live.
///
/// Sending while disconnected is a deliberate no-op that reports `false`;
/// frames are never buffered across a reconnect.
#[derive(Clone, Default)]
pub struct Transmitter {
    inner: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
}

impl Transmitter {
    pub fn send_event(&self, event: &WireEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(frame) => self.send(frame),
            Err(err) => {
                tracing::error!("failed to serialize wire event: {err}");
                false
            }
        }
    }

    pub fn send(&self, frame: String) -> bool {
        match self
            .inner
            .lock()
            .expect("transmitter lock poisoned")
            .as_ref()
        {
            Some(tx) => tx.send(frame).is_ok(),
            None => {
                tracing::debug!("not connected, dropping outbound frame");
                false
            }
        }
    }

    fn install(&self, tx: mpsc::UnboundedSender<String>) {
        *self.inner.lock().expect("transmitter lock poisoned") = Some(tx);
    }

    fn clear(&self) {
        *self.inner.lock().expect("transmitter lock poisoned") = None;
    }
}

pub struct ConnectionManager {
    endpoint: String,
    reconnect_delay: Duration,
    connector: Option<Connector>,
    transmitter: Transmitter,
}

impl ConnectionManager {
    pub fn new(endpoint: String, reconnect_delay: Duration, connector: Option<Connector>) -> Self {
        Self {
            endpoint,
            reconnect_delay,
            connector,
            transmitter: Transmitter::default(),
        }
    }

    pub fn transmitter(&self) -> Transmitter {
        self.transmitter.clone()
    }

    /// Connect/serve/reconnect loop. Retries are unbounded with a fixed
    /// delay; a failed attempt is swallowed and rescheduled. Every disconnect
    /// cancels all in-flight executor-side operations; there is no request
    /// replay across a reconnect.
    pub async fn run(&self, system: &ProxySystem) {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match self.connect().await {
                Ok(stream) => {
                    attempt = 0;
                    tracing::info!("✅ connected to {}", self.endpoint);
                    self.serve(stream, system).await;
                    tracing::warn!(
                        "🔌 connection lost, reconnecting in {:?}",
                        self.reconnect_delay
                    );
                }
                Err(err) => {
                    tracing::warn!("connect attempt {attempt} failed: {err}");
                }
            }
            self.transmitter.clear();
            system.cancel_all();
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn connect(
        &self,
    ) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, crate::error::Error> {
        let request = self.endpoint.as_str().into_client_request()?;
        let (stream, _) =
            connect_async_tls_with_config(request, None, false, self.connector.clone()).await?;
        Ok(stream)
    }

    async fn serve(&self, stream: WebSocketStream<MaybeTlsStream<TcpStream>>, system: &ProxySystem) {
        let (mut write, mut read) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.transmitter.install(tx);

        loop {
            tokio::select! {
                outbound = rx.recv() => {
                    match outbound {
                        Some(frame) => {
                            if write.send(Message::Text(frame.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                inbound = read.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => system.handle_frame(text.as_str()),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            tracing::debug!("websocket error: {err}");
                            break;
                        }
                    }
                }
            }
        }
    }
}

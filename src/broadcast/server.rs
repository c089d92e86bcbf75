//! WebSocket relay server.

use crate::broadcast::BroadcastError;
use crate::engine::session::SnapshotSink;
use crate::engine::snapshot::MetricsSnapshot;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

/// Snapshots buffered per client before a slow client starts losing them.
const CLIENT_CHANNEL_CAPACITY: usize = 100;

/// WebSocket relay server for metrics snapshots.
pub struct RelayServer {
    port: u16,
    tx: broadcast::Sender<String>,
}

impl RelayServer {
    /// Create a relay that will listen on the given port once started.
    pub fn new(port: u16) -> Self {
        let (tx, _) = broadcast::channel(CLIENT_CHANNEL_CAPACITY);
        Self { port, tx }
    }

    /// Publishing handle, usable whether or not the server is running.
    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            tx: self.tx.clone(),
        }
    }

    /// Number of currently subscribed clients.
    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Bind the listen port and serve clients in the background.
    pub async fn start(&self) -> Result<(), BroadcastError> {
        let addr = format!("0.0.0.0:{}", self.port);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| BroadcastError::BindFailed(e.to_string()))?;

        tracing::info!("relay server listening on {}", addr);

        let tx = self.tx.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tracing::info!("display client connected: {}", peer);
                        let rx = tx.subscribe();
                        tokio::spawn(async move {
                            if let Err(e) = serve_client(stream, rx).await {
                                tracing::debug!("display client {} closed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!("accept failed: {}", e);
                    }
                }
            }
        });

        Ok(())
    }
}

/// Forward snapshots to one client until it disconnects.
async fn serve_client(
    stream: TcpStream,
    mut rx: broadcast::Receiver<String>,
) -> Result<(), BroadcastError> {
    let websocket = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| BroadcastError::WebSocketError(e.to_string()))?;

    let (mut sink, mut source) = websocket.split();

    loop {
        tokio::select! {
            snapshot = rx.recv() => {
                match snapshot {
                    Ok(json) => {
                        sink.send(Message::Text(json))
                            .await
                            .map_err(|e| BroadcastError::WebSocketError(e.to_string()))?;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // The stream is live, not a durable log; a lagged
                        // client just resumes from the newest snapshot
                        tracing::debug!("display client lagged, skipped {} snapshots", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    // Pings and client chatter are ignored
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(BroadcastError::WebSocketError(e.to_string()));
                    }
                }
            }
        }
    }
}

/// Fire-and-forget publishing handle for the session engine.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: broadcast::Sender<String>,
}

impl SnapshotSink for RelayHandle {
    fn publish(&self, snapshot: MetricsSnapshot) {
        match serde_json::to_string(&snapshot) {
            // A send with no connected clients is not an error worth
            // surfacing; the stream is best-effort
            Ok(json) => {
                let _ = self.tx.send(json);
            }
            Err(e) => tracing::warn!("snapshot serialization failed: {}", e),
        }
    }
}

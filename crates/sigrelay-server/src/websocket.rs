//! Per-socket reader/writer tasks.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use sigrelay_settings::ServerSettings;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::hub::SignalHub;

/// Transport settings for each accepted socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketSettings {
    /// Outbound queue capacity.
    pub max_send_queue: usize,
    /// Keep-alive ping period.
    pub ping_interval: Duration,
}

impl From<&ServerSettings> for SocketSettings {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            max_send_queue: settings.max_send_queue,
            ping_interval: Duration::from_secs(settings.ping_interval_secs),
        }
    }
}

/// Drive an upgraded socket until either side stops, then unregister the
/// peer.
pub async fn serve_socket(socket: WebSocket, hub: Arc<SignalHub>, settings: SocketSettings) {
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(settings.max_send_queue);
    let connection = hub.open(tx);
    let peer_id = connection.id.clone();
    drop(connection);

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: queued frames out, plus periodic ping
    let writer_peer = peer_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(settings.ping_interval);
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(text) = frame else { break };
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                    trace!(peer_id = %writer_peer, "sent ping");
                }
            }
        }
    });

    // Reader: inbound frames to the hub
    let reader_peer = peer_id.clone();
    let reader_hub = Arc::clone(&hub);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => reader_hub.handle_frame(&reader_peer, text.as_str()),
                Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                    Ok(text) => reader_hub.handle_frame(&reader_peer, text),
                    Err(_) => debug!(peer_id = %reader_peer, "dropping non-utf8 binary frame"),
                },
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    let _ = hub.close(&peer_id);
}

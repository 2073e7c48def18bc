//! WebSocket transport for the capsy remote configuration channel.
//!
//! Bridges the core's fire-and-forget [`Transport`] to a WebSocket: a
//! writer task drains queued outbound messages onto the socket, a reader
//! task parses inbound frames into [`Inbound`] events. Malformed frames are
//! logged and dropped; the connection stays up.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use capsy_core::channel::{ChannelError, ChannelResult, Inbound, Outbound, Transport};

/// Transport errors.
#[derive(Error, Debug)]
pub enum WsError {
    #[error("connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Outbound half: queues messages for the writer task.
pub struct WsTransport {
    out_tx: mpsc::UnboundedSender<Outbound>,
}

impl Transport for WsTransport {
    fn send(&self, message: &Outbound) -> ChannelResult<()> {
        self.out_tx
            .send(message.clone())
            .map_err(|_| ChannelError::Closed)
    }
}

/// A live WebSocket connection to the configuration backend.
pub struct WsConnection {
    /// Handed to the session as its transport capability.
    pub transport: Arc<WsTransport>,
    /// Inbound events, to be pumped into the session.
    pub events: mpsc::UnboundedReceiver<Inbound>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl WsConnection {
    /// Tear down both IO tasks.
    pub fn abort(&self) {
        self.writer.abort();
        self.reader.abort();
    }
}

/// Connect to the configuration backend.
pub async fn connect(url: &str) -> Result<WsConnection, WsError> {
    let (socket, _response) = connect_async(url).await?;
    tracing::info!(url = %url, "configuration channel connected");

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Inbound>();

    // Writer task: queued messages → socket
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping unserializable outbound message");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(json)).await.is_err() {
                tracing::warn!("socket write failed, writer stopping");
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    // Reader task: socket frames → inbound events
    let reader = tokio::spawn(async move {
        while let Some(frame) = ws_stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<Inbound>(&text) {
                    Ok(event) => {
                        if in_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping unparseable inbound frame");
                    }
                },
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {} // Ping/Pong handled by tungstenite
            }
        }
        tracing::info!("configuration channel disconnected");
    });

    Ok(WsConnection {
        transport: Arc::new(WsTransport { out_tx }),
        events: in_rx,
        writer,
        reader,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    /// One-connection echo backend: answers every save with a saved event
    /// carrying the same request id, and ignores everything else.
    async fn spawn_backend() -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut sink, mut stream) = socket.split();

            // Exercise the client's tolerance for junk frames
            sink.send(Message::Text("not json {{{".into())).await.unwrap();

            while let Some(Ok(frame)) = stream.next().await {
                let Message::Text(text) = frame else { continue };
                let Ok(message) = serde_json::from_str::<Outbound>(&text) else {
                    continue;
                };
                if let Outbound::SaveConfig {
                    request_id,
                    user_id,
                    patient_id,
                    pillbox_id,
                    compartments,
                } = message
                {
                    let reply = Inbound::ConfigSaved {
                        request_id: Some(request_id),
                        success: true,
                        config: Some(capsy_core::PillboxConfig {
                            user_id,
                            patient_id,
                            pillbox_id,
                            compartments,
                            updated_at: "2024-03-01T10:00:00Z".into(),
                        }),
                        error: None,
                    };
                    let json = serde_json::to_string(&reply).unwrap();
                    if sink.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
            }
        });

        (format!("ws://{addr}"), handle)
    }

    #[tokio::test]
    async fn save_round_trips_through_socket() {
        init_tracing();
        let (url, backend) = spawn_backend().await;

        let mut connection = connect(&url).await.expect("connect failed");

        let save = Outbound::SaveConfig {
            request_id: "req-1".into(),
            user_id: "u1".into(),
            patient_id: "p1".into(),
            pillbox_id: "PB-1".into(),
            compartments: capsy_core::default_rack(),
        };
        connection.transport.send(&save).unwrap();

        let event = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            connection.events.recv(),
        )
        .await
        .expect("timed out waiting for saved event")
        .expect("event stream ended");

        match event {
            Inbound::ConfigSaved {
                request_id,
                success,
                config,
                ..
            } => {
                assert_eq!(request_id.as_deref(), Some("req-1"));
                assert!(success);
                assert_eq!(config.unwrap().pillbox_id, "PB-1");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        connection.abort();
        backend.abort();
    }

    #[tokio::test]
    async fn connect_to_dead_port_fails() {
        init_tracing();
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect(&format!("ws://{addr}")).await;
        assert!(result.is_err());
    }
}

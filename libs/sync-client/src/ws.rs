//! WebSocket push transport

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use tracking_types::ids::OrderCredential;
use tracking_types::message::{PushErrorCode, PushMessage};
use tracking_types::snapshot::Snapshot;

use crate::error::SyncError;
use crate::transport::{PushConnector, PushStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the gateway's `/ws/tracking` endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// `url` is the full push endpoint, e.g. `ws://host:8080/ws/tracking`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(
        &self,
        credential: &OrderCredential,
    ) -> Result<(Box<dyn PushStream>, Snapshot), SyncError> {
        let (mut socket, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| SyncError::Transport(format!("WebSocket connect failed: {e}")))?;

        let request = serde_json::to_string(credential)
            .map_err(|e| SyncError::Protocol(format!("encode subscribe request: {e}")))?;
        socket
            .send(Message::Text(request.into()))
            .await
            .map_err(|e| SyncError::Transport(format!("send subscribe request: {e}")))?;

        // First data frame is either the snapshot or an error
        let mut stream = WsPushStream { socket };
        match stream.next_message().await? {
            Some(PushMessage::Snapshot { data, .. }) => {
                debug!(tracking_number = %credential.tracking_number, "Push handshake complete");
                Ok((Box::new(stream), data))
            }
            Some(PushMessage::Error {
                code: PushErrorCode::Unauthorized,
                ..
            }) => {
                stream.close().await;
                Err(SyncError::Authorization)
            }
            Some(other) => {
                stream.close().await;
                Err(SyncError::Protocol(format!(
                    "expected snapshot during handshake, got {other:?}"
                )))
            }
            None => Err(SyncError::Transport(
                "connection closed during handshake".to_string(),
            )),
        }
    }
}

/// Established WebSocket subscription.
pub struct WsPushStream {
    socket: Socket,
}

#[async_trait]
impl PushStream for WsPushStream {
    async fn next_message(&mut self) -> Result<Option<PushMessage>, SyncError> {
        while let Some(frame) = self.socket.next().await {
            let frame = frame.map_err(|e| SyncError::Transport(e.to_string()))?;
            match frame {
                Message::Text(text) => {
                    let message = serde_json::from_str(text.as_str())
                        .map_err(|e| SyncError::Protocol(e.to_string()))?;
                    return Ok(Some(message));
                }
                Message::Close(Some(close)) if close.code == CloseCode::Policy => {
                    return Err(SyncError::Authorization);
                }
                Message::Close(close) => {
                    debug!(?close, "Push connection closed by server");
                    return Ok(None);
                }
                // Pings are answered by tungstenite itself
                _ => continue,
            }
        }
        Ok(None)
    }

    async fn close(&mut self) {
        let _ = self.socket.close(None).await;
    }
}

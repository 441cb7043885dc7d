//! WebSocket push channel
//!
//! `WsConnector` opens authenticated links with tokio-tungstenite.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::transport::{Connector, InboundEvent, OutboundEvent, PushLink};
use crate::error::{SyncError, SyncResult};
use crate::session::Session;

/// Connects to the push channel over WebSocket
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    handshake_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            handshake_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, session: &Session) -> SyncResult<Box<dyn PushLink>> {
        debug!("Connecting to {}", self.url);

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SyncError::Protocol(format!("Invalid push URL {}: {}", self.url, e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", session.token()))
            .map_err(|_| SyncError::Auth("token contains invalid characters".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _response) =
            match tokio::time::timeout(self.handshake_timeout, connect_async(request)).await {
                Ok(Ok(pair)) => pair,
                Ok(Err(WsError::Http(response)))
                    if matches!(response.status().as_u16(), 401 | 403) =>
                {
                    return Err(SyncError::Auth(format!(
                        "push channel rejected the credential ({})",
                        response.status()
                    )));
                }
                Ok(Err(e)) => {
                    return Err(SyncError::TransientNetwork(format!(
                        "Failed to connect to {}: {}",
                        self.url, e
                    )));
                }
                Err(_) => {
                    return Err(SyncError::TransientNetwork(format!(
                        "Timeout connecting to {}",
                        self.url
                    )));
                }
            };

        Ok(Box::new(WsLink { stream }))
    }
}

/// One open WebSocket connection
pub struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushLink for WsLink {
    async fn next_event(&mut self) -> Option<SyncResult<InboundEvent>> {
        loop {
            let decoded = match self.stream.next().await? {
                Ok(Message::Text(text)) => InboundEvent::decode_text(&text),
                Ok(Message::Binary(bytes)) => InboundEvent::decode_binary(&bytes),
                Ok(Message::Close(frame)) => {
                    debug!("Push channel closed by server: {:?}", frame);
                    return None;
                }
                Ok(_) => continue,
                Err(e) => {
                    return Some(Err(SyncError::TransientNetwork(format!(
                        "WebSocket error: {}",
                        e
                    ))))
                }
            };

            match decoded {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => debug!("Ignoring unknown push event"),
                // One bad frame doesn't end the connection
                Err(e) => warn!("Dropping push frame: {}", e),
            }
        }
    }

    async fn send(&mut self, event: &OutboundEvent) -> SyncResult<()> {
        let text = event.encode()?;
        self.stream.send(Message::Text(text)).await.map_err(|e| {
            SyncError::TransientNetwork(format!("Failed to emit {}: {}", event.name(), e))
        })
    }

    async fn close(&mut self) {
        self.stream.close(None).await.ok();
    }
}

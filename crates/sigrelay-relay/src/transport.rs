//! Outbound relay connection: a thin client over `tokio-tungstenite`.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use sigrelay_core::{ProtocolError, StartupError};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A connected, message-oriented relay link.
#[async_trait]
pub trait RelayTransport: Send {
    /// Send one text message.
    async fn send_text(&mut self, text: String) -> Result<(), ProtocolError>;

    /// Receive the next text message, skipping control frames.
    async fn recv_text(&mut self) -> Result<String, ProtocolError>;

    /// Best-effort close. Never fails.
    async fn close(&mut self);
}

/// Factory for relay transports.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    /// Open a new connection.
    async fn connect(&self) -> Result<Box<dyn RelayTransport>, StartupError>;

    /// Endpoint description for logging.
    fn endpoint(&self) -> &str;
}

/// WebSocket connector.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    close_timeout: Duration,
}

impl WsConnector {
    /// Connector for `url`; `close_timeout` bounds the close handshake.
    pub fn new(url: impl Into<String>, close_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            close_timeout,
        }
    }
}

#[async_trait]
impl RelayConnector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn RelayTransport>, StartupError> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| StartupError::Connect {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;
        info!(url = %self.url, "relay connection established");
        Ok(Box::new(WsTransport {
            ws,
            close_timeout: self.close_timeout,
        }))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

/// WebSocket-backed [`RelayTransport`].
pub struct WsTransport {
    ws: WsStream,
    close_timeout: Duration,
}

#[async_trait]
impl RelayTransport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), ProtocolError> {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(map_ws_error)
    }

    async fn recv_text(&mut self) -> Result<String, ProtocolError> {
        loop {
            let msg = match self.ws.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(map_ws_error(e)),
                None => return Err(ProtocolError::ConnectionClosed),
            };
            match msg {
                Message::Text(text) => return Ok(text.as_str().to_owned()),
                Message::Binary(bytes) => {
                    return String::from_utf8(bytes.to_vec()).map_err(|e| {
                        ProtocolError::Malformed {
                            reason: format!("binary frame is not UTF-8: {e}"),
                            raw: String::new(),
                        }
                    });
                }
                Message::Close(_) => return Err(ProtocolError::ConnectionClosed),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        match tokio::time::timeout(self.close_timeout, self.ws.close(None)).await {
            Ok(Ok(())) => debug!("relay connection closed"),
            Ok(Err(e)) => debug!(error = %e, "relay close handshake failed"),
            Err(_) => debug!(
                timeout_ms = u64::try_from(self.close_timeout.as_millis()).unwrap_or(u64::MAX),
                "relay close handshake timed out"
            ),
        }
    }
}

fn map_ws_error(err: tungstenite::Error) -> ProtocolError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            ProtocolError::ConnectionClosed
        }
        other => ProtocolError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tokio::net::TcpListener;

    use super::*;

    async fn echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _ = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    ws.send(Message::Ping(Vec::new().into())).await.unwrap();
                    ws.send(Message::Text(text)).await.unwrap();
                }
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn send_and_receive_skips_ping() {
        let url = echo_server().await;
        let connector = WsConnector::new(url.clone(), Duration::from_millis(500));
        assert_eq!(connector.endpoint(), url);

        let mut transport = connector.connect().await.unwrap();
        transport.send_text("hello".into()).await.unwrap();
        assert_eq!(transport.recv_text().await.unwrap(), "hello");
        transport.close().await;
    }

    #[tokio::test]
    async fn peer_close_is_connection_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _ = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = ws.close(None).await;
        });

        let connector = WsConnector::new(format!("ws://{addr}"), Duration::from_millis(500));
        let mut transport = connector.connect().await.unwrap();
        let err = transport.recv_text().await.unwrap_err();
        assert_matches!(err, ProtocolError::ConnectionClosed);
    }

    #[tokio::test]
    async fn connect_refused_is_startup_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = WsConnector::new(format!("ws://{addr}"), Duration::from_millis(500));
        let err = connector.connect().await.err().unwrap();
        assert_matches!(err, StartupError::Connect { .. });
    }
}

//! WebSocket connections
//!
//! The manager talks to sockets through [`SocketConnector`] so the state
//! machine can be driven without a network. [`TungsteniteConnector`] is the
//! real implementation.

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use crate::http::error::ClientError;
use crate::subscription::protocol::{CLOSE_ABNORMAL, SUBPROTOCOL};

/// What the read half of a socket reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Text(String),
    Closed { code: u16, reason: String },
}

/// Write half of a socket
#[async_trait]
pub trait SocketSink: Send {
    async fn send(&mut self, text: String) -> Result<(), ClientError>;

    /// Send a close frame; errors are ignored since the socket is going away
    async fn close(&mut self, code: u16, reason: &str);
}

/// An open socket.
///
/// `events` ending without a `Closed` event counts as an abnormal close.
pub struct SocketConnection {
    pub sink: Box<dyn SocketSink>,
    pub events: mpsc::UnboundedReceiver<SocketEvent>,
}

#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<SocketConnection, ClientError>;
}

/// Connector backed by tokio-tungstenite
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TungsteniteSink {
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

impl Drop for TungsteniteSink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl SocketSink for TungsteniteSink {
    async fn send(&mut self, text: String) -> Result<(), ClientError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| ClientError::network(format!("WebSocket send failed: {}", e)))
    }

    async fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        if let Err(e) = self.sink.send(Message::Close(Some(frame))).await {
            debug!(error = %e, "Close frame not delivered");
        }
    }
}

#[async_trait]
impl SocketConnector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> Result<SocketConnection, ClientError> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::network(format!("Invalid WebSocket request: {}", e)))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| ClientError::network(format!("WebSocket connect failed: {}", e)))?;
        debug!(status = %response.status(), "WebSocket connected");

        let (sink, mut source) = stream.split();
        let (tx, events) = mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let event = match message {
                    Ok(Message::Text(text)) => SocketEvent::Text(text),
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((1005, String::new()));
                        let _ = tx.send(SocketEvent::Closed { code, reason });
                        return;
                    }
                    Ok(other) => {
                        trace!(?other, "Ignoring non-text frame");
                        continue;
                    }
                    Err(e) => {
                        let _ = tx.send(SocketEvent::Closed {
                            code: CLOSE_ABNORMAL,
                            reason: e.to_string(),
                        });
                        return;
                    }
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
        });

        Ok(SocketConnection {
            sink: Box::new(TungsteniteSink { sink, reader }),
            events,
        })
    }
}

/// Wait for a connection, bounded by `limit`
pub(crate) async fn connect_with_timeout(
    connector: &dyn SocketConnector,
    url: &Url,
    limit: Duration,
) -> Result<SocketConnection, ClientError> {
    match tokio::time::timeout(limit, connector.connect(url)).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::timeout(limit)),
    }
}

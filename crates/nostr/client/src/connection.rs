//! One WebSocket session to one relay.
//!
//! The socket is split: a reader task owns the stream half and forwards
//! decoded frames over a channel, while sends go through the sink half behind a
//! mutex so any task holding the connection can write to it.

use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, RelayMessage};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use nostr_store::RelayId;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Something the reader task observed.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(RelayMessage),
    /// The session ended; carries the error if it wasn't a clean close.
    Closed(Option<String>),
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

pub struct Connection {
    relay_id: RelayId,
    url: Url,
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    sink: Arc<Mutex<Option<WsSink>>>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Create a connection (does not connect yet).
    pub fn new(relay_id: RelayId, url: &str, config: ConnectionConfig) -> Result<Self> {
        let url = Url::parse(url)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ClientError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                url.scheme()
            )));
        }

        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        Ok(Self {
            relay_id,
            url,
            config,
            state,
            sink: Arc::new(Mutex::new(None)),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            reader: Mutex::new(None),
        })
    }

    pub fn relay_id(&self) -> RelayId {
        self.relay_id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Open the socket. Calling this on an open connection does nothing.
    pub async fn connect(&self) -> Result<()> {
        // Holding the sink lock serializes concurrent connect calls.
        let mut sink = self.sink.lock().await;
        if sink.is_some() && self.is_connected() {
            return Ok(());
        }

        self.state.send_replace(ConnectionState::Connecting);
        debug!(relay = %self.url, "connecting");

        let stream = match timeout(self.config.connect_timeout, connect_async(self.url.as_str())).await
        {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(ClientError::WebSocket(e.to_string()));
            }
            Err(_) => {
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(ClientError::Timeout(format!(
                    "Connection timeout after {:?}",
                    self.config.connect_timeout
                )));
            }
        };

        let (write, read) = stream.split();
        *sink = Some(write);
        drop(sink);

        let handle = tokio::spawn(read_loop(
            read,
            Arc::clone(&self.sink),
            self.inbound_tx.clone(),
            self.url.to_string(),
        ));
        if let Some(old) = self.reader.lock().await.replace(handle) {
            old.abort();
        }

        self.state.send_replace(ConnectionState::Connected);
        info!(relay = %self.url, "connected");
        Ok(())
    }

    /// Wait until the socket is open. Returns false on timeout.
    pub async fn wait_ready(&self, limit: Duration) -> bool {
        let mut rx = self.state.subscribe();
        matches!(
            timeout(limit, rx.wait_for(|s| *s == ConnectionState::Connected)).await,
            Ok(Ok(_))
        )
    }

    /// Send a frame. Returns false if it could not be written, in which case
    /// the caller should treat the connection as lost.
    pub async fn send(&self, message: &ClientMessage) -> bool {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(relay = %self.url, "failed to encode message: {}", e);
                return false;
            }
        };

        let mut sink = self.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            return false;
        };
        trace!(relay = %self.url, "-> {}", json);
        match sink.send(Message::Text(json.into())).await {
            Ok(()) => true,
            Err(e) => {
                warn!(relay = %self.url, "send failed: {}", e);
                false
            }
        }
    }

    /// Next inbound item. `None` only if the connection has been dropped.
    pub async fn recv(&self) -> Option<Inbound> {
        self.inbound_rx.lock().await.recv().await
    }

    /// Close the socket and stop the reader. Whoever is blocked in
    /// [`Connection::recv`] sees `Inbound::Closed`.
    pub async fn close(&self) {
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        if self.state.send_replace(ConnectionState::Disconnected) != ConnectionState::Disconnected {
            debug!(relay = %self.url, "closed");
            let _ = self.inbound_tx.send(Inbound::Closed(None));
        }
    }
}

async fn read_loop(
    mut read: SplitStream<WsStream>,
    sink: Arc<Mutex<Option<WsSink>>>,
    inbound: mpsc::UnboundedSender<Inbound>,
    url: String,
) {
    let reason = loop {
        let frame = match read.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => break Some(e.to_string()),
            None => break None,
        };

        match frame {
            Message::Text(text) => {
                if let Some(message) = decode(text.as_str(), &url)
                    && inbound.send(Inbound::Message(message)).is_err()
                {
                    return;
                }
            }
            Message::Ping(data) => {
                if let Some(sink) = sink.lock().await.as_mut() {
                    let _ = sink.send(Message::Pong(data)).await;
                }
            }
            Message::Close(_) => {
                info!(relay = %url, "relay closed connection");
                break None;
            }
            _ => {}
        }
    };

    let _ = inbound.send(Inbound::Closed(reason));
}

/// Decode and verify one text frame. Anything malformed is logged and dropped.
fn decode(text: &str, url: &str) -> Option<RelayMessage> {
    let message = match RelayMessage::from_json(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(relay = %url, "ignoring frame: {}", e);
            return None;
        }
    };

    if let RelayMessage::Event { ref event, .. } = message
        && let Err(e) = event.verify()
    {
        warn!(relay = %url, id = %event.id, "dropping event that failed verification: {}", e);
        return None;
    }

    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr::{EventTemplate, Keys, Signer};

    #[test]
    fn test_rejects_non_websocket_url() {
        assert!(matches!(
            Connection::new(1, "https://relay.example", ConnectionConfig::default()),
            Err(ClientError::InvalidUrl(_))
        ));
        assert!(matches!(
            Connection::new(1, "not a url", ConnectionConfig::default()),
            Err(ClientError::UrlParse(_))
        ));
    }

    #[test]
    fn test_new_connection_is_disconnected() {
        let conn = Connection::new(7, "wss://relay.example", ConnectionConfig::default()).unwrap();
        assert_eq!(conn.relay_id(), 7);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_without_socket_reports_failure() {
        let conn = Connection::new(1, "ws://127.0.0.1:1", ConnectionConfig::default()).unwrap();
        let sent = conn
            .send(&ClientMessage::Close {
                subscription_id: "x".to_string(),
            })
            .await;
        assert!(!sent);
        assert!(!conn.wait_ready(Duration::from_millis(10)).await);
    }

    #[test]
    fn test_decode_drops_forged_events() {
        let keys = Keys::generate();
        let event = keys.sign(&EventTemplate::new(1, "real")).unwrap();
        let good = serde_json::json!(["EVENT", "s", event]).to_string();
        assert!(decode(&good, "wss://r").is_some());

        let mut forged = event.clone();
        forged.content = "forged".to_string();
        let bad = serde_json::json!(["EVENT", "s", forged]).to_string();
        assert!(decode(&bad, "wss://r").is_none());

        assert!(decode(r#"["WHAT"]"#, "wss://r").is_none());
        assert!(decode("{}", "wss://r").is_none());
        assert_eq!(
            decode(r#"["EOSE","s"]"#, "wss://r"),
            Some(RelayMessage::Eose {
                subscription_id: "s".to_string()
            })
        );
    }
}

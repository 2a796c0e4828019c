//! In-process relay for driving the pool over real sockets.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use nostr_client::Notification;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(5);

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Replies the relay sends for each frame it receives.
pub type Responder = Arc<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

/// `EOSE` for every `REQ`, `OK true` for every `EVENT`.
pub fn default_replies(frame: &Value) -> Vec<Value> {
    match frame[0].as_str() {
        Some("REQ") => vec![json!(["EOSE", frame[1]])],
        Some("EVENT") => vec![json!(["OK", frame[1]["id"], true, ""])],
        _ => Vec::new(),
    }
}

pub struct MockRelay {
    addr: SocketAddr,
    frames: mpsc::UnboundedReceiver<Value>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
    accepted: Arc<AtomicUsize>,
}

impl MockRelay {
    pub async fn start() -> Self {
        Self::with_responder(Arc::new(default_replies)).await
    }

    pub async fn with_responder(responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let current = Arc::new(Mutex::new(None));
        let accepted = Arc::new(AtomicUsize::new(0));

        {
            let current = Arc::clone(&current);
            let accepted = Arc::clone(&accepted);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        stream,
                        Arc::clone(&responder),
                        frames_tx.clone(),
                        Arc::clone(&current),
                    ));
                }
            });
        }

        Self {
            addr,
            frames,
            current,
            accepted,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.addr.port())
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// The most recent connection's outbound channel. The client can see the
    /// handshake complete slightly before the server side registers it.
    async fn latest(&self, take: bool) -> mpsc::UnboundedSender<Message> {
        tokio::time::timeout(WAIT, async {
            loop {
                {
                    let mut current = self.current.lock().unwrap();
                    let found = if take { current.take() } else { current.clone() };
                    if let Some(tx) = found {
                        return tx;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("no client connected")
    }

    /// Push a frame to the most recent connection.
    pub async fn send(&self, frame: Value) {
        let _ = self
            .latest(false)
            .await
            .send(Message::Text(frame.to_string().into()));
    }

    /// Close the most recent connection from the relay side.
    pub async fn disconnect(&self) {
        let _ = self.latest(true).await.send(Message::Close(None));
    }

    /// Next frame the client sent, if one arrives within `wait`.
    pub async fn next_frame(&mut self, wait: Duration) -> Option<Value> {
        tokio::time::timeout(wait, self.frames.recv())
            .await
            .ok()
            .flatten()
    }

    /// Skip frames until one of the given type arrives.
    pub async fn expect(&mut self, kind: &str) -> Value {
        loop {
            let frame = self
                .next_frame(WAIT)
                .await
                .unwrap_or_else(|| panic!("no {} frame received", kind));
            if frame[0] == kind {
                return frame;
            }
        }
    }
}

async fn serve(
    stream: TcpStream,
    responder: Responder,
    frames: mpsc::UnboundedSender<Value>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    *current.lock().unwrap() = Some(tx);

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(Message::Close(frame)) => {
                    let _ = write.send(Message::Close(frame)).await;
                    break;
                }
                Some(message) => {
                    if write.send(message).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    for reply in responder(&frame) {
                        if write.send(Message::Text(reply.to_string().into())).await.is_err() {
                            return;
                        }
                    }
                    let _ = frames.send(frame);
                }
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
}

/// Wait for the first notification matching `pred`, skipping others.
pub async fn wait_for(
    rx: &mut broadcast::Receiver<Notification>,
    pred: impl Fn(&Notification) -> bool,
) -> Notification {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(notification) if pred(&notification) => return notification,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("notifier closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for notification")
}

pub async fn connected(rx: &mut broadcast::Receiver<Notification>) -> (i64, String) {
    match wait_for(rx, |n| matches!(n, Notification::RelayConnected { .. })).await {
        Notification::RelayConnected { relay_id, uri } => (relay_id, uri),
        _ => unreachable!(),
    }
}

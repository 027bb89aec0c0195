//! Console transport: a text-frame pipe to the daemon.
//!
//! [`WsConnector`] opens a WebSocket with `tokio-tungstenite` and spawns a
//! pump task that bridges the socket to a pair of channels. The session only
//! ever sees a [`TransportHandle`]:
//!
//! - `send` queues an outbound text frame without waiting,
//! - `recv` yields inbound text frames; `None` means the socket is gone,
//! - dropping the handle closes the socket.
//!
//! The [`Connector`] trait is the seam the session is generic over, so tests
//! can hand it in-memory pipes built with [`TransportHandle::pair`].

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::TransportError;

/// Frames buffered in each direction before backpressure applies.
pub const FRAME_QUEUE: usize = 256;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// The session's end of an open transport.
#[derive(Debug)]
pub struct TransportHandle {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<String>,
}

/// The far end of a [`TransportHandle`]: whatever moves frames to and from
/// the wire (the WebSocket pump, or a test).
#[derive(Debug)]
pub struct PeerEnd {
    /// Frames the session sent.
    pub outbound: mpsc::Receiver<String>,
    /// Frames to deliver to the session. Dropping this signals close.
    pub inbound: mpsc::Sender<String>,
}

impl TransportHandle {
    /// Create a connected handle/peer pair.
    pub fn pair() -> (Self, PeerEnd) {
        let (out_tx, out_rx) = mpsc::channel(FRAME_QUEUE);
        let (in_tx, in_rx) = mpsc::channel(FRAME_QUEUE);
        (
            Self {
                outbound: out_tx,
                inbound: in_rx,
            },
            PeerEnd {
                outbound: out_rx,
                inbound: in_tx,
            },
        )
    }

    /// Queue a text frame. Never waits.
    pub fn send(&self, frame: String) -> Result<(), TransportError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    /// Next inbound text frame, or `None` once the transport has closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }
}

/// Opens console transports.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &str) -> Result<TransportHandle, TransportError>;
}

/// WebSocket connector for the daemon's console endpoint.
pub struct WsConnector {
    origin: Option<String>,
    connect_timeout: Duration,
}

impl WsConnector {
    /// `origin` is sent as the `Origin` header; daemons only accept the
    /// panel's own URL there.
    pub fn new(origin: Option<String>, connect_timeout: Duration) -> Self {
        Self {
            origin,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<TransportHandle, TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
        if let Some(origin) = &self.origin {
            let value = HeaderValue::from_str(origin)
                .map_err(|e| TransportError::InvalidUrl(format!("origin {origin}: {e}")))?;
            request.headers_mut().insert(ORIGIN, value);
        }

        let (ws_stream, _response) = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.connect_timeout.as_secs()))??;

        debug!("console socket connected to {url}");
        let (handle, peer) = TransportHandle::pair();
        tokio::spawn(pump(ws_stream, peer));
        Ok(handle)
    }
}

/// Move frames between the socket and the handle until either side goes away.
async fn pump(ws_stream: WsStream, mut peer: PeerEnd) {
    let (mut ws_sink, mut ws_reader) = ws_stream.split();

    loop {
        tokio::select! {
            msg = ws_reader.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if peer.inbound.send(text.as_str().to_owned()).await.is_err() {
                            // Handle dropped
                            let _ = ws_sink.close().await;
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "console socket closed by daemon");
                        return;
                    }
                    Some(Ok(_)) => {} // Binary/Ping/Pong
                    Some(Err(e)) => {
                        warn!("console socket error: {e}");
                        return;
                    }
                    None => return,
                }
            }
            out = peer.outbound.recv() => {
                match out {
                    Some(text) => {
                        if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
                            warn!("console socket send failed: {e}");
                            return;
                        }
                    }
                    None => {
                        let _ = ws_sink.close().await;
                        return;
                    }
                }
            }
        }
    }
}

//! Tokio-based WebSocket transport for callsig.
//!
//! Concrete implementation of the `Transport`/`TransportFactory` traits
//! over tokio-tungstenite. One instance per connection attempt; the
//! connection core owns reconnect orchestration, this crate only moves
//! frames.

use async_trait::async_trait;
use callsig::transport::{Transport, TransportEvent, TransportFactory, WireMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, trace, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// Synthesized code for a stream that ended without a close frame.
const CODE_ABNORMAL_CLOSURE: u16 = 1006;

pub struct TokioWebSocketTransport {
    ws_sink: Arc<Mutex<Option<WsSink>>>,
}

impl TokioWebSocketTransport {
    fn new(sink: WsSink) -> Self {
        Self {
            ws_sink: Arc::new(Mutex::new(Some(sink))),
        }
    }
}

#[async_trait]
impl Transport for TokioWebSocketTransport {
    async fn send(&self, message: WireMessage) -> bool {
        let mut sink_guard = self.ws_sink.lock().await;
        let Some(sink) = sink_guard.as_mut() else {
            debug!("send on a closed websocket");
            return false;
        };

        let frame = match message {
            WireMessage::Text(text) => {
                trace!("--> sending text frame: {} bytes", text.len());
                Message::text(text)
            }
            WireMessage::Binary(data) => {
                trace!("--> sending binary frame: {} bytes", data.len());
                Message::binary(data)
            }
        };

        match sink.send(frame).await {
            Ok(()) => true,
            Err(err) => {
                warn!("websocket send failed: {err}");
                false
            }
        }
    }

    async fn close(&self, code: u16, reason: &str) {
        let mut sink_guard = self.ws_sink.lock().await;
        if let Some(mut sink) = sink_guard.take() {
            debug!("closing websocket: code {code}, reason: {reason}");
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            };
            if let Err(err) = sink.send(Message::Close(Some(frame))).await {
                debug!("close frame not delivered: {err}");
            }
        }
    }
}

pub struct TokioWebSocketTransportFactory;

impl TokioWebSocketTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TokioWebSocketTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportFactory for TokioWebSocketTransportFactory {
    async fn open(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        debug!("dialing {url}");
        let mut request = url
            .into_client_request()
            .map_err(|e| anyhow::anyhow!("invalid websocket url {url}: {e}"))?;
        for (name, value) in headers {
            request.headers_mut().insert(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(value)?,
            );
        }

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| anyhow::anyhow!("websocket connect failed: {e}"))?;

        let (sink, stream) = stream.split();
        let (event_tx, event_rx) = mpsc::channel(100);

        tokio::spawn(read_pump(stream, event_tx.clone()));
        let _ = event_tx.send(TransportEvent::Opened).await;

        Ok((Arc::new(TokioWebSocketTransport::new(sink)), event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Binary(data))) => {
                trace!("<-- binary frame: {} bytes", data.len());
                if event_tx
                    .send(TransportEvent::Message(WireMessage::Binary(data)))
                    .await
                    .is_err()
                {
                    warn!("event receiver dropped, closing read pump");
                    return;
                }
            }
            Some(Ok(Message::Text(text))) => {
                trace!("<-- text frame: {} bytes", text.len());
                if event_tx
                    .send(TransportEvent::Message(WireMessage::Text(
                        text.as_str().to_owned(),
                    )))
                    .await
                    .is_err()
                {
                    warn!("event receiver dropped, closing read pump");
                    return;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                    .unwrap_or((CODE_ABNORMAL_CLOSURE, String::new()));
                trace!("<-- close frame: code {code}, reason: {reason}");
                let _ = event_tx.send(TransportEvent::Closed { code, reason }).await;
                return;
            }
            // Pings are answered by tungstenite itself on the next flush.
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                error!("error reading from websocket: {err}");
                let _ = event_tx
                    .send(TransportEvent::Error(anyhow::anyhow!(err)))
                    .await;
                return;
            }
            None => {
                trace!("websocket stream ended");
                let _ = event_tx
                    .send(TransportEvent::Closed {
                        code: CODE_ABNORMAL_CLOSURE,
                        reason: String::new(),
                    })
                    .await;
                return;
            }
        }
    }
}

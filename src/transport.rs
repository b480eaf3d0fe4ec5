use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Normal closure requested by this client.
pub const CODE_CLOSE_BY_CLIENT: u16 = 1000;

/// Abrupt closure used when the local network dropped: a reason-coded
/// close the server treats as "gone, may resume" instead of a deliberate
/// leave.
pub const CODE_CLOSE_NETWORK_LOST: u16 = 4002;

/// One wire message. Which flavor a channel speaks is the codec's
/// business; the transport moves both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Bytes),
}

/// An event produced by the transport layer.
#[derive(Debug)]
pub enum TransportEvent {
    /// The transport finished its handshake and is open.
    Opened,
    /// A message arrived from the server.
    Message(WireMessage),
    /// The connection failed. Terminal for this transport instance.
    Error(anyhow::Error),
    /// The peer closed the connection.
    Closed { code: u16, reason: String },
}

/// Represents an active network connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one message. Returns false when the transport is already
    /// closed or the underlying send fails; never panics.
    async fn send(&self, message: WireMessage) -> bool;

    /// Closes the connection with a reason code.
    async fn close(&self, code: u16, reason: &str);
}

/// A factory responsible for creating new transport instances, one per
/// connection attempt.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Opens a transport and returns it along with its event stream.
    async fn open(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

/// Scriptable in-memory transport for tests: records what the core sends
/// and lets the test push inbound events.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    pub struct MockTransport {
        pub sent: Mutex<Vec<WireMessage>>,
        pub closed: Mutex<Option<(u16, String)>>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                closed: Mutex::new(None),
            }
        }

        pub fn sent_messages(&self) -> Vec<WireMessage> {
            self.sent.lock().unwrap().clone()
        }

        pub fn close_code(&self) -> Option<u16> {
            self.closed.lock().unwrap().as_ref().map(|(code, _)| *code)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, message: WireMessage) -> bool {
            if self.closed.lock().unwrap().is_some() {
                return false;
            }
            self.sent.lock().unwrap().push(message);
            true
        }

        async fn close(&self, code: u16, reason: &str) {
            self.closed
                .lock()
                .unwrap()
                .get_or_insert_with(|| (code, reason.to_string()));
        }
    }

    /// One opened transport together with the handle the test uses to
    /// push inbound events through it.
    pub struct MockSession {
        pub url: String,
        pub transport: Arc<MockTransport>,
        pub events: mpsc::Sender<TransportEvent>,
    }

    impl MockSession {
        pub async fn push(&self, event: TransportEvent) {
            let _ = self.events.send(event).await;
        }
    }

    /// Factory that hands out [`MockSession`]s and keeps every session it
    /// ever opened, so tests can inspect reconnects.
    #[derive(Default)]
    pub struct MockTransportFactory {
        sessions: Mutex<Vec<Arc<MockSession>>>,
        fail_opens: Mutex<u32>,
    }

    impl MockTransportFactory {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the next `count` opens fail with a connection error.
        pub fn fail_next_opens(&self, count: u32) {
            *self.fail_opens.lock().unwrap() = count;
        }

        pub fn open_count(&self) -> usize {
            self.sessions.lock().unwrap().len()
        }

        pub fn session(&self, index: usize) -> Arc<MockSession> {
            self.sessions.lock().unwrap()[index].clone()
        }

        pub fn latest_session(&self) -> Arc<MockSession> {
            self.sessions
                .lock()
                .unwrap()
                .last()
                .expect("no transport opened yet")
                .clone()
        }
    }

    #[async_trait]
    impl TransportFactory for MockTransportFactory {
        async fn open(
            &self,
            url: &str,
            _headers: &[(String, String)],
        ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
            {
                let mut fail = self.fail_opens.lock().unwrap();
                if *fail > 0 {
                    *fail -= 1;
                    return Err(anyhow::anyhow!("mock transport refused the connection"));
                }
            }

            let (event_tx, event_rx) = mpsc::channel(64);
            let transport = Arc::new(MockTransport::new());
            let session = Arc::new(MockSession {
                url: url.to_string(),
                transport: transport.clone(),
                events: event_tx,
            });
            self.sessions.lock().unwrap().push(session);
            Ok((transport, event_rx))
        }
    }
}

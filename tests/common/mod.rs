#![allow(dead_code)]

use async_trait::async_trait;
use callsig::codec::{Inbound, WireCodec};
use callsig::config::ConnectionConfig;
use callsig::error::{ErrorCode, NetworkError};
use callsig::policy::{LifecycleHandle, NetworkStateHandle};
use callsig::token::TokenProvider;
use callsig::transport::WireMessage;
use callsig::transport::mock::MockTransportFactory;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// The coordinator handshake event: the server's session confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedEvent {
    pub connection_id: String,
    pub user_id: String,
}

/// JSON wire protocol for the coordinator-channel fixtures.
pub struct JsonCodec;

impl WireCodec for JsonCodec {
    type Event = Value;
    type Handshake = ConnectedEvent;
    type Frame = Value;

    fn decode(&self, message: &WireMessage) -> Result<Inbound<Value, ConnectedEvent>, NetworkError> {
        let text = match message {
            WireMessage::Text(text) => text.as_str(),
            WireMessage::Binary(_) => {
                return Err(NetworkError::from_error_code(ErrorCode::CantParseEvent));
            }
        };
        let value: Value = serde_json::from_str(text)
            .map_err(|_| NetworkError::from_error_code(ErrorCode::CantParseEvent))?;

        match value.get("type").and_then(Value::as_str) {
            Some("connection.ok") => {
                let event: ConnectedEvent = serde_json::from_value(value.clone())
                    .map_err(|_| NetworkError::from_error_code(ErrorCode::CantParseConnectionEvent))?;
                Ok(Inbound::Handshake(event))
            }
            Some("health.check") => Ok(Inbound::HealthCheck),
            Some("connection.error") => Ok(Inbound::ConnectionError(NetworkError::new(
                value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
                value.get("code").and_then(Value::as_i64).unwrap_or(-1) as i32,
                value
                    .get("status_code")
                    .and_then(Value::as_i64)
                    .unwrap_or(-1) as i32,
            ))),
            _ => Ok(Inbound::Event(value)),
        }
    }

    fn encode(&self, frame: &Value) -> WireMessage {
        WireMessage::Text(frame.to_string())
    }

    fn handshake_frame(&self, config: &ConnectionConfig, token: &str) -> Option<Value> {
        if token.is_empty() {
            return None;
        }
        Some(json!({
            "type": "auth",
            "token": token,
            "user_id": config.user_id,
            "api_key": config.api_key,
            "rejoin": config.is_reconnection,
        }))
    }

    fn health_check_frame(&self) -> Option<Value> {
        Some(json!({ "type": "health.check" }))
    }

    fn connection_id(&self, handshake: &ConnectedEvent) -> Option<String> {
        Some(handshake.connection_id.clone())
    }
}

/// The media-channel join confirmation. Carries no session id; the
/// connection generates its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub participant_count: u32,
}

/// JSON wire protocol for the media-channel fixtures. Owns the call's
/// join request.
pub struct JoinCodec {
    pub call_id: String,
}

impl WireCodec for JoinCodec {
    type Event = Value;
    type Handshake = JoinResponse;
    type Frame = Value;

    fn decode(&self, message: &WireMessage) -> Result<Inbound<Value, JoinResponse>, NetworkError> {
        let text = match message {
            WireMessage::Text(text) => text.as_str(),
            WireMessage::Binary(_) => {
                return Err(NetworkError::from_error_code(ErrorCode::CantParseEvent));
            }
        };
        let value: Value = serde_json::from_str(text)
            .map_err(|_| NetworkError::from_error_code(ErrorCode::CantParseEvent))?;

        match value.get("type").and_then(Value::as_str) {
            Some("join.ok") => {
                let event: JoinResponse = serde_json::from_value(value.clone())
                    .map_err(|_| NetworkError::from_error_code(ErrorCode::CantParseConnectionEvent))?;
                Ok(Inbound::Handshake(event))
            }
            Some("health.check") => Ok(Inbound::HealthCheck),
            Some("connection.error") => Ok(Inbound::ConnectionError(NetworkError::new(
                value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
                value.get("code").and_then(Value::as_i64).unwrap_or(-1) as i32,
                value
                    .get("status_code")
                    .and_then(Value::as_i64)
                    .unwrap_or(-1) as i32,
            ))),
            _ => Ok(Inbound::Event(value)),
        }
    }

    fn encode(&self, frame: &Value) -> WireMessage {
        WireMessage::Text(frame.to_string())
    }

    fn handshake_frame(&self, config: &ConnectionConfig, token: &str) -> Option<Value> {
        Some(json!({
            "type": "join",
            "call_id": self.call_id,
            "token": token,
            "rejoin": config.is_reconnection,
        }))
    }

    fn health_check_frame(&self) -> Option<Value> {
        Some(json!({ "type": "health.check" }))
    }
}

/// Token provider that counts loads and can be reconfigured mid-test.
pub struct FakeTokenProvider {
    token: std::sync::Mutex<String>,
    pub loads: AtomicU32,
}

impl FakeTokenProvider {
    pub fn new(token: &str) -> Self {
        Self {
            token: std::sync::Mutex::new(token.to_string()),
            loads: AtomicU32::new(0),
        }
    }

    pub fn set_token(&self, token: &str) {
        *self.token.lock().unwrap() = token.to_string();
    }
}

#[async_trait]
impl TokenProvider for FakeTokenProvider {
    async fn load_token(&self) -> Result<String, anyhow::Error> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.token.lock().unwrap().clone())
    }
}

pub struct CoordinatorHarness {
    pub factory: Arc<MockTransportFactory>,
    pub network: Arc<NetworkStateHandle>,
    pub lifecycle: Arc<LifecycleHandle>,
    pub token_provider: Arc<FakeTokenProvider>,
    pub connection: callsig::CoordinatorConnection<JsonCodec>,
}

pub fn coordinator_harness() -> CoordinatorHarness {
    init_logging();
    let factory = Arc::new(MockTransportFactory::new());
    let network = Arc::new(NetworkStateHandle::new(true));
    let lifecycle = Arc::new(LifecycleHandle::new());
    let token_provider = Arc::new(FakeTokenProvider::new("jwt-initial"));
    let connection = callsig::CoordinatorConnection::new(
        "wss://video.example.com/connect",
        "api-key-1",
        Arc::new(JsonCodec),
        factory.clone(),
        network.clone(),
        lifecycle.clone(),
        token_provider.clone(),
    );
    CoordinatorHarness {
        factory,
        network,
        lifecycle,
        token_provider,
        connection,
    }
}

pub fn connected_json(connection_id: &str, user_id: &str) -> callsig::transport::TransportEvent {
    callsig::transport::TransportEvent::Message(WireMessage::Text(
        json!({
            "type": "connection.ok",
            "connection_id": connection_id,
            "user_id": user_id,
        })
        .to_string(),
    ))
}

pub fn error_json(code: i32, message: &str) -> callsig::transport::TransportEvent {
    callsig::transport::TransportEvent::Message(WireMessage::Text(
        json!({
            "type": "connection.error",
            "code": code,
            "status_code": 401,
            "message": message,
        })
        .to_string(),
    ))
}

pub fn event_json(kind: &str) -> callsig::transport::TransportEvent {
    callsig::transport::TransportEvent::Message(WireMessage::Text(
        json!({ "type": kind }).to_string(),
    ))
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll until `cond` holds, failing the test after two seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met within 2s");
}

/// Decode the auth/join payloads a mock transport captured.
pub fn sent_json(messages: &[WireMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| match message {
            WireMessage::Text(text) => serde_json::from_str(text).expect("sent frame is json"),
            WireMessage::Binary(_) => panic!("unexpected binary frame"),
        })
        .collect()
}

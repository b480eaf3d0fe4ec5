use crate::config::ConnectionConfig;
use crate::error::NetworkError;
use crate::state::Handshake;
use crate::transport::WireMessage;

/// What an inbound message turned out to be once classified. Health-check
/// replies are absorbed by the health monitor and never reach listeners;
/// connection errors run through the error-classification policy; the
/// handshake event drives the state machine.
pub enum Inbound<E, H> {
    Handshake(H),
    HealthCheck,
    ConnectionError(NetworkError),
    Event(E),
}

/// The channel-owned wire protocol: payload schemas belong to the API
/// layer, the connection core only needs to classify inbound messages and
/// to know which payloads to emit at which point of the connection
/// lifecycle.
pub trait WireCodec: Send + Sync + 'static {
    /// Inbound domain event delivered to listeners.
    type Event: Clone + Send + Sync + 'static;
    /// The server event confirming the session (carries the connection or
    /// session identifier where the protocol has one).
    type Handshake: Handshake;
    /// Outbound frame.
    type Frame: Send + Sync + 'static;

    fn decode(
        &self,
        message: &WireMessage,
    ) -> Result<Inbound<Self::Event, Self::Handshake>, NetworkError>;

    fn encode(&self, frame: &Self::Frame) -> WireMessage;

    /// The auth/join payload opening a session. `None` means the channel
    /// cannot authenticate right now (e.g. no token) and the attempt must
    /// be abandoned. Reconnection configs are expected to produce the
    /// protocol's rejoin flavor.
    fn handshake_frame(&self, config: &ConnectionConfig, token: &str) -> Option<Self::Frame>;

    /// Lightweight liveness probe, sent while connected. Channels without
    /// an explicit probe frame return `None`.
    fn health_check_frame(&self) -> Option<Self::Frame> {
        None
    }

    fn connection_id(&self, handshake: &Self::Handshake) -> Option<String> {
        let _ = handshake;
        None
    }
}

use crate::config::ConnectionConfig;
use crate::error::{DisconnectCause, NetworkError};
use crate::fsm::Tagged;

/// Marker bounds for a channel's handshake payload (the server event that
/// confirms the session: connected event for the coordinator channel, join
/// response for the media channel).
pub trait Handshake: Clone + PartialEq + Send + Sync + 'static {}

impl<T: Clone + PartialEq + Send + Sync + 'static> Handshake for T {}

/// How a connect request came about. Automatic retries are second-class:
/// states that were left on purpose (or fatally) ignore them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Initial,
    AutomaticReconnect,
    ForcedReconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    NetworkAvailable,
    LifecycleResume,
}

/// Why a channel is disconnected. Carries the classified error where one
/// exists.
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectReason {
    /// Terminal/initial; no transport exists.
    Stopped,
    /// Explicit disconnect. A forced or initial connect may still revive it.
    ByRequest,
    NetworkUnavailable,
    /// Recoverable failure; the health monitor drives the retry.
    TemporaryFailure(NetworkError),
    /// Unrecoverable failure; only an explicit or forced reconnect recovers.
    PermanentFailure(NetworkError),
    /// The health monitor detected missed heartbeats.
    EventStreamLost,
}

impl DisconnectReason {
    pub fn cause(&self) -> DisconnectCause {
        match self {
            DisconnectReason::Stopped | DisconnectReason::ByRequest => {
                DisconnectCause::ConnectionReleased
            }
            DisconnectReason::NetworkUnavailable => DisconnectCause::NetworkNotAvailable,
            DisconnectReason::TemporaryFailure(err) => DisconnectCause::Error(err.clone()),
            DisconnectReason::PermanentFailure(err) => {
                DisconnectCause::UnrecoverableError(err.clone())
            }
            DisconnectReason::EventStreamLost => DisconnectCause::SocketNotAvailable,
        }
    }
}

/// The single source of truth for one channel's connection.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketState<H: Handshake> {
    /// Transient request to redial with the last known config.
    RestartConnection(RestartReason),
    Connecting {
        config: ConnectionConfig,
        kind: ConnectionKind,
    },
    Connected {
        event: H,
    },
    Disconnected(DisconnectReason),
}

impl<H: Handshake> SocketState<H> {
    pub fn is_connected(&self) -> bool {
        matches!(self, SocketState::Connected { .. })
    }
}

impl<H: Handshake> std::fmt::Display for SocketState<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketState::RestartConnection(reason) => write!(f, "RestartConnection({reason:?})"),
            SocketState::Connecting { config, kind } => {
                write!(f, "Connecting(user: {}, kind: {kind:?})", config.user_id)
            }
            SocketState::Connected { .. } => write!(f, "Connected"),
            SocketState::Disconnected(reason) => match reason {
                DisconnectReason::TemporaryFailure(err) => {
                    write!(f, "Disconnected::TemporaryFailure({err})")
                }
                DisconnectReason::PermanentFailure(err) => {
                    write!(f, "Disconnected::PermanentFailure({err})")
                }
                other => write!(f, "Disconnected::{other:?}"),
            },
        }
    }
}

/// Events the state machine consumes. Every external signal funnels into
/// one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent<H: Handshake> {
    Connect {
        config: ConnectionConfig,
        kind: ConnectionKind,
    },
    ConnectionEstablished(H),
    NetworkAvailable,
    NetworkUnavailable,
    UnrecoverableError(NetworkError),
    NetworkError(NetworkError),
    RequiredDisconnect,
    Stop,
    EventStreamLost,
    Resume,
}

impl<H: Handshake> std::fmt::Display for StateEvent<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::Connect { config, kind } => {
                write!(f, "Connect(user: {}, kind: {kind:?})", config.user_id)
            }
            StateEvent::ConnectionEstablished(_) => write!(f, "ConnectionEstablished"),
            StateEvent::UnrecoverableError(err) => write!(f, "UnrecoverableError({err})"),
            StateEvent::NetworkError(err) => write!(f, "NetworkError({err})"),
            other => write!(f, "{:?}", StateEventTag::from(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketStateTag {
    RestartConnection,
    Connecting,
    Connected,
    Stopped,
    ByRequest,
    NetworkUnavailable,
    TemporaryFailure,
    PermanentFailure,
    EventStreamLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateEventTag {
    Connect,
    ConnectionEstablished,
    NetworkAvailable,
    NetworkUnavailable,
    UnrecoverableError,
    NetworkError,
    RequiredDisconnect,
    Stop,
    EventStreamLost,
    Resume,
}

impl<H: Handshake> Tagged for SocketState<H> {
    type Tag = SocketStateTag;

    fn tag(&self) -> SocketStateTag {
        match self {
            SocketState::RestartConnection(_) => SocketStateTag::RestartConnection,
            SocketState::Connecting { .. } => SocketStateTag::Connecting,
            SocketState::Connected { .. } => SocketStateTag::Connected,
            SocketState::Disconnected(reason) => match reason {
                DisconnectReason::Stopped => SocketStateTag::Stopped,
                DisconnectReason::ByRequest => SocketStateTag::ByRequest,
                DisconnectReason::NetworkUnavailable => SocketStateTag::NetworkUnavailable,
                DisconnectReason::TemporaryFailure(_) => SocketStateTag::TemporaryFailure,
                DisconnectReason::PermanentFailure(_) => SocketStateTag::PermanentFailure,
                DisconnectReason::EventStreamLost => SocketStateTag::EventStreamLost,
            },
        }
    }
}

impl<H: Handshake> Tagged for StateEvent<H> {
    type Tag = StateEventTag;

    fn tag(&self) -> StateEventTag {
        StateEventTag::from(self)
    }
}

impl<H: Handshake> From<&StateEvent<H>> for StateEventTag {
    fn from(event: &StateEvent<H>) -> Self {
        match event {
            StateEvent::Connect { .. } => StateEventTag::Connect,
            StateEvent::ConnectionEstablished(_) => StateEventTag::ConnectionEstablished,
            StateEvent::NetworkAvailable => StateEventTag::NetworkAvailable,
            StateEvent::NetworkUnavailable => StateEventTag::NetworkUnavailable,
            StateEvent::UnrecoverableError(_) => StateEventTag::UnrecoverableError,
            StateEvent::NetworkError(_) => StateEventTag::NetworkError,
            StateEvent::RequiredDisconnect => StateEventTag::RequiredDisconnect,
            StateEvent::Stop => StateEventTag::Stop,
            StateEvent::EventStreamLost => StateEventTag::EventStreamLost,
            StateEvent::Resume => StateEventTag::Resume,
        }
    }
}

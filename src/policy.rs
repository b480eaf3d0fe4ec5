use crate::state::{DisconnectReason, Handshake, SocketState};
use tokio::sync::{broadcast, watch};

const SIGNAL_BUFFER: usize = 16;

/// Reachability edge pushed by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Available,
    Unavailable,
}

/// Push-based network reachability source. The core only consumes the
/// available/unavailable edges plus the synchronous snapshot used right
/// before dialing.
pub trait NetworkStateProvider: Send + Sync {
    fn is_connected(&self) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<NetworkState>;
}

/// In-process [`NetworkStateProvider`] the host feeds from its platform
/// connectivity callbacks.
pub struct NetworkStateHandle {
    connected: std::sync::atomic::AtomicBool,
    tx: broadcast::Sender<NetworkState>,
}

impl NetworkStateHandle {
    pub fn new(initially_connected: bool) -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_BUFFER);
        Self {
            connected: std::sync::atomic::AtomicBool::new(initially_connected),
            tx,
        }
    }

    pub fn notify_available(&self) {
        self.connected
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let _ = self.tx.send(NetworkState::Available);
    }

    pub fn notify_unavailable(&self) {
        self.connected
            .store(false, std::sync::atomic::Ordering::SeqCst);
        let _ = self.tx.send(NetworkState::Unavailable);
    }
}

impl Default for NetworkStateHandle {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkStateProvider for NetworkStateHandle {
    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<NetworkState> {
        self.tx.subscribe()
    }
}

/// App lifecycle edge. The core only reacts to foreground resume and the
/// matching stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Resume,
    Stop,
}

pub trait LifecycleObserver: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent>;
}

/// In-process [`LifecycleObserver`] fed by the host's lifecycle hooks.
pub struct LifecycleHandle {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleHandle {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_BUFFER);
        Self { tx }
    }

    pub fn resume(&self) {
        let _ = self.tx.send(LifecycleEvent::Resume);
    }

    pub fn stop(&self) {
        let _ = self.tx.send(LifecycleEvent::Stop);
    }
}

impl Default for LifecycleHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleObserver for LifecycleHandle {
    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

/// Gate for facade-level connect/disconnect requests.
pub trait ConnectionPolicy: Send + Sync {
    fn should_connect(&self) -> bool;

    fn should_disconnect(&self) -> bool;
}

/// Connect only when the channel is actually down; disconnect only when
/// there is something to tear down (live, dialing, or recovering).
pub struct SocketStateConnectionPolicy<H: Handshake> {
    state: watch::Receiver<SocketState<H>>,
}

impl<H: Handshake> SocketStateConnectionPolicy<H> {
    pub fn new(state: watch::Receiver<SocketState<H>>) -> Self {
        Self { state }
    }
}

impl<H: Handshake> ConnectionPolicy for SocketStateConnectionPolicy<H> {
    fn should_connect(&self) -> bool {
        matches!(*self.state.borrow(), SocketState::Disconnected(_))
    }

    fn should_disconnect(&self) -> bool {
        matches!(
            *self.state.borrow(),
            SocketState::Connected { .. }
                | SocketState::Connecting { .. }
                | SocketState::RestartConnection(_)
                | SocketState::Disconnected(DisconnectReason::TemporaryFailure(_))
        )
    }
}

/// Keeps the coordinator channel alive while a call is active or ringing;
/// never blocks connecting.
pub struct CallAwareConnectionPolicy {
    call_active: watch::Receiver<bool>,
}

impl CallAwareConnectionPolicy {
    pub fn new(call_active: watch::Receiver<bool>) -> Self {
        Self { call_active }
    }
}

impl ConnectionPolicy for CallAwareConnectionPolicy {
    fn should_connect(&self) -> bool {
        true
    }

    fn should_disconnect(&self) -> bool {
        !*self.call_active.borrow()
    }
}

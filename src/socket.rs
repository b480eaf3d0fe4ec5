use crate::codec::{Inbound, WireCodec};
use crate::config::ConnectionConfig;
use crate::error::{ErrorCode, NetworkError, SocketError};
use crate::health::{HealthCallback, HealthMonitor, HealthMonitorConfig};
use crate::listener::{ListenerCall, ListenerId, ListenerRegistry, SocketListener};
use crate::policy::{LifecycleEvent, LifecycleObserver, NetworkState, NetworkStateProvider};
use crate::state::{ConnectionKind, DisconnectReason, SocketState};
use crate::state_service::SocketStateService;
use crate::token::TokenManager;
use crate::transport::{
    CODE_CLOSE_BY_CLIENT, CODE_CLOSE_NETWORK_LOST, Transport, TransportEvent, TransportFactory,
    WireMessage,
};
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

/// When a channel sends its auth/join payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeTiming {
    /// Right after the transport instance is created. The media channel
    /// fires its join request here.
    OnConnecting,
    /// When the transport reports the connection open. The coordinator
    /// channel authenticates here.
    OnTransportOpen,
}

/// Knobs that differ between the coordinator channel and the per-call
/// media channel. Everything else about the connection lifecycle is
/// shared.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Log tag for this channel instance.
    pub tag: &'static str,
    pub health: HealthMonitorConfig,
    pub handshake_timing: HandshakeTiming,
    /// Whether app lifecycle resume/stop edges drive this channel.
    pub follow_lifecycle: bool,
    /// Default timeout for `await_connected`.
    pub connection_timeout: Duration,
    /// Locally generated session id, for protocols whose handshake event
    /// does not carry one.
    pub socket_id: Option<String>,
}

impl ChannelConfig {
    pub fn coordinator() -> Self {
        Self {
            tag: "callsig::coordinator",
            health: HealthMonitorConfig::COORDINATOR,
            handshake_timing: HandshakeTiming::OnTransportOpen,
            follow_lifecycle: true,
            connection_timeout: Duration::from_secs(60),
            socket_id: None,
        }
    }

    pub fn media() -> Self {
        Self {
            tag: "callsig::sfu",
            health: HealthMonitorConfig::MEDIA,
            handshake_timing: HandshakeTiming::OnConnecting,
            follow_lifecycle: false,
            connection_timeout: Duration::from_secs(2),
            socket_id: None,
        }
    }
}

struct TransportSession {
    transport: Arc<dyn Transport>,
    demux_task: Option<JoinHandle<()>>,
}

/// The effectful layer of one signaling channel: owns zero-or-one live
/// transport, reacts to state-service transitions and performs the
/// matching I/O, demultiplexes inbound messages, and classifies errors.
///
/// All side effects run on a single sequential observer task per
/// instance, so transport opens and closes never interleave. Independent
/// channel instances are fully concurrent.
pub struct SocketClient<C: WireCodec> {
    channel: ChannelConfig,
    codec: Arc<C>,
    token_manager: Arc<TokenManager>,
    transport_factory: Arc<dyn TransportFactory>,
    network: Arc<dyn NetworkStateProvider>,
    lifecycle: Arc<dyn LifecycleObserver>,
    state_service: SocketStateService<C::Handshake>,
    listeners: ListenerRegistry<C::Event, C::Handshake>,
    health: HealthMonitor,
    session: Mutex<Option<TransportSession>>,
    connection_conf: Mutex<Option<ConnectionConfig>>,
    connection_id_tx: watch::Sender<Option<String>>,
    policy_tasks: Mutex<Vec<JoinHandle<()>>>,
    state_observer: Mutex<Option<JoinHandle<()>>>,
    weak_self: OnceLock<Weak<SocketClient<C>>>,
}

impl<C: WireCodec> SocketClient<C> {
    pub fn new(
        channel: ChannelConfig,
        codec: Arc<C>,
        token_manager: Arc<TokenManager>,
        transport_factory: Arc<dyn TransportFactory>,
        network: Arc<dyn NetworkStateProvider>,
        lifecycle: Arc<dyn LifecycleObserver>,
    ) -> Arc<Self> {
        let health = HealthMonitor::new(channel.health);
        let client = Arc::new(Self {
            state_service: SocketStateService::new(channel.tag),
            channel,
            codec,
            token_manager,
            transport_factory,
            network,
            lifecycle,
            listeners: ListenerRegistry::new(),
            health,
            session: Mutex::new(None),
            connection_conf: Mutex::new(None),
            connection_id_tx: watch::channel(None).0,
            policy_tasks: Mutex::new(Vec::new()),
            state_observer: Mutex::new(None),
            weak_self: OnceLock::new(),
        });
        let _ = client.weak_self.set(Arc::downgrade(&client));
        let observer = client.spawn_state_observer();
        *client.state_observer.lock().unwrap() = Some(observer);
        client
    }

    fn weak(&self) -> Weak<Self> {
        self.weak_self.get().cloned().expect("set during construction")
    }

    // ---- requests -------------------------------------------------------

    /// Ask for a fresh connection. Returns once the request is enqueued;
    /// observe `subscribe_state` or use `await_connected` for the outcome.
    pub async fn connect(&self, config: ConnectionConfig) {
        self.state_service.on_connect(config).await;
    }

    pub async fn reconnect(&self, config: ConnectionConfig, force: bool) {
        self.state_service.on_reconnect(config, force).await;
    }

    /// Explicit disconnect: drops the cached config so nothing revives
    /// the connection behind the caller's back.
    pub async fn disconnect(&self) {
        *self.connection_conf.lock().unwrap() = None;
        self.state_service.on_required_disconnect().await;
    }

    /// Attempt to send a frame. Returns false when no transport is open
    /// or the underlying send fails; never an error path.
    pub async fn send(&self, frame: &C::Frame) -> bool {
        let message = self.codec.encode(frame);
        self.send_message(message).await
    }

    pub async fn send_raw(&self, data: Bytes) -> bool {
        self.send_message(WireMessage::Binary(data)).await
    }

    async fn send_message(&self, message: WireMessage) -> bool {
        let transport = self
            .session
            .lock()
            .unwrap()
            .as_ref()
            .map(|session| session.transport.clone());
        match transport {
            Some(transport) => transport.send(message).await,
            None => {
                debug!(target: self.channel.tag, "send with no open transport");
                false
            }
        }
    }

    // ---- observation ----------------------------------------------------

    pub fn current_state(&self) -> SocketState<C::Handshake> {
        self.state_service.current_state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SocketState<C::Handshake>> {
        self.state_service.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.current_state().is_connected()
    }

    pub fn connection_id(&self) -> watch::Receiver<Option<String>> {
        self.connection_id_tx.subscribe()
    }

    pub fn connection_id_or_error(&self) -> Result<String, SocketError> {
        self.connection_id_tx
            .borrow()
            .clone()
            .ok_or(SocketError::NoConnectionId)
    }

    /// Suspend until the channel reaches `Connected`, or fail with a
    /// timeout. Losing the race leaves no dangling subscription behind.
    pub async fn await_connected(&self, timeout: Duration) -> Result<(), SocketError> {
        let mut state_rx = self.state_service.subscribe();
        match tokio::time::timeout(timeout, state_rx.wait_for(|state| state.is_connected())).await {
            Err(_) => Err(SocketError::ConnectionTimeout(timeout)),
            Ok(Err(_)) => Err(SocketError::Stopped),
            Ok(Ok(_)) => Ok(()),
        }
    }

    pub fn default_connection_timeout(&self) -> Duration {
        self.channel.connection_timeout
    }

    pub fn add_listener(&self, listener: Arc<dyn SocketListener<C::Event, C::Handshake>>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }

    // ---- state reactions -------------------------------------------------

    fn spawn_state_observer(&self) -> JoinHandle<()> {
        let weak = self.weak();
        let mut state_rx = self.state_service.subscribe();
        // Subscribing happens before any request can reach the service, so
        // marking the initial value seen here cannot swallow a transition.
        state_rx.mark_unchanged();
        tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                let state = state_rx.borrow_and_update().clone();
                let Some(client) = weak.upgrade() else { return };
                client.react(state).await;
            }
        })
    }

    async fn react(self: Arc<Self>, state: SocketState<C::Handshake>) {
        info!(target: self.channel.tag, "[on_state_changed] state: {state}");
        match state {
            SocketState::RestartConnection(_) => {
                let config = self.connection_conf.lock().unwrap().clone();
                match config {
                    Some(config) => self.state_service.on_reconnect(config, false).await,
                    None => {
                        error!(
                            target: self.channel.tag,
                            "restart requested but no connection config is cached"
                        );
                    }
                }
            }

            SocketState::Connecting { config, kind } => {
                self.listeners.broadcast(ListenerCall::Connecting);
                let config = match kind {
                    ConnectionKind::Initial => config,
                    ConnectionKind::AutomaticReconnect | ConnectionKind::ForcedReconnect => {
                        config.as_reconnection()
                    }
                };
                self.open_session(config).await;
            }

            SocketState::Connected { event } => {
                self.health.ack();
                self.health.start(Arc::new(HealthHook { client: self.weak() }));
                let connection_id = self
                    .codec
                    .connection_id(&event)
                    .or_else(|| self.channel.socket_id.clone());
                self.connection_id_tx.send_replace(connection_id);
                self.listeners.broadcast(ListenerCall::Connected(event));
            }

            SocketState::Disconnected(reason) => {
                let cause = reason.cause();
                match &reason {
                    DisconnectReason::Stopped
                    | DisconnectReason::ByRequest
                    | DisconnectReason::PermanentFailure(_) => {
                        self.close_session(CODE_CLOSE_BY_CLIENT, "connection closed by client")
                            .await;
                        self.health.stop();
                        self.stop_policy_observers();
                    }
                    DisconnectReason::NetworkUnavailable => {
                        self.close_session(CODE_CLOSE_NETWORK_LOST, "network unavailable")
                            .await;
                        self.health.stop();
                    }
                    DisconnectReason::TemporaryFailure(_) => {
                        // Keep the monitor alive so it can drive the retry;
                        // start it if this attempt never reached Connected.
                        if !self.health.is_running() {
                            self.health.start(Arc::new(HealthHook { client: self.weak() }));
                        }
                        self.health.on_disconnected();
                    }
                    DisconnectReason::EventStreamLost => {
                        self.close_session(CODE_CLOSE_BY_CLIENT, "event stream lost")
                            .await;
                        let config = self.connection_conf.lock().unwrap().clone();
                        match config {
                            Some(config) => self.state_service.on_reconnect(config, false).await,
                            None => {
                                error!(
                                    target: self.channel.tag,
                                    "event stream lost with no cached connection config"
                                );
                            }
                        }
                    }
                }
                self.connection_id_tx.send_replace(None);
                self.listeners.broadcast(ListenerCall::Disconnected(cause));
            }
        }
    }

    async fn open_session(&self, config: ConnectionConfig) {
        debug!(
            target: self.channel.tag,
            "[open_session] url: {}, is_reconnection: {}", config.url, config.is_reconnection
        );
        self.start_policy_observers();
        *self.connection_conf.lock().unwrap() = Some(config.clone());
        self.close_session(CODE_CLOSE_BY_CLIENT, "superseded by a new connection attempt")
            .await;

        if !self.network.is_connected() {
            self.state_service.on_network_not_available().await;
            return;
        }

        self.token_manager.ensure_token_loaded().await;

        match self.transport_factory.open(&config.url, &[]).await {
            Ok((transport, events)) => {
                self.listeners.broadcast(ListenerCall::Created);
                // The session must be visible before the demuxer runs: the
                // transport may report Opened immediately and the handshake
                // send needs the stored transport.
                *self.session.lock().unwrap() = Some(TransportSession {
                    transport,
                    demux_task: None,
                });
                let demux_task = self.spawn_demux(events);
                if let Some(session) = self.session.lock().unwrap().as_mut() {
                    session.demux_task = Some(demux_task);
                }
                if self.channel.handshake_timing == HandshakeTiming::OnConnecting {
                    self.send_handshake(&config).await;
                }
            }
            Err(err) => {
                warn!(target: self.channel.tag, "transport open failed: {err:#}");
                self.handle_network_error(NetworkError::with_cause(
                    ErrorCode::NetworkFailed,
                    err,
                ))
                .await;
            }
        }
    }

    async fn close_session(&self, code: u16, reason: &str) {
        let session = self.session.lock().unwrap().take();
        if let Some(session) = session {
            if let Some(demux_task) = session.demux_task {
                demux_task.abort();
            }
            session.transport.close(code, reason).await;
        }
    }

    async fn send_handshake(&self, config: &ConnectionConfig) {
        let token = self.token_manager.get_token();
        match self.codec.handshake_frame(config, &token) {
            Some(frame) => {
                if !self.send(&frame).await {
                    warn!(target: self.channel.tag, "failed to send handshake payload");
                }
            }
            None => {
                error!(
                    target: self.channel.tag,
                    "channel cannot authenticate (no handshake payload), disconnecting"
                );
                self.state_service.on_required_disconnect().await;
            }
        }
    }

    // ---- inbound demultiplexing -----------------------------------------

    fn spawn_demux(&self, mut events: mpsc::Receiver<TransportEvent>) -> JoinHandle<()> {
        let weak = self.weak();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(client) = weak.upgrade() else { return };
                client.handle_transport_event(event).await;
            }
        })
    }

    async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                debug!(target: self.channel.tag, "transport open");
                if self.channel.handshake_timing == HandshakeTiming::OnTransportOpen {
                    let config = self.connection_conf.lock().unwrap().clone();
                    if let Some(config) = config {
                        self.send_handshake(&config).await;
                    }
                }
            }

            TransportEvent::Message(message) => {
                // Anything inbound proves the server is alive.
                self.health.ack();
                match self.codec.decode(&message) {
                    Ok(Inbound::HealthCheck) => {}
                    Ok(Inbound::Handshake(handshake)) => {
                        self.state_service.on_connection_established(handshake).await;
                    }
                    Ok(Inbound::ConnectionError(err)) => self.handle_network_error(err).await,
                    Ok(Inbound::Event(event)) => {
                        self.listeners.broadcast(ListenerCall::Event(event));
                    }
                    Err(err) => self.handle_network_error(err).await,
                }
            }

            TransportEvent::Error(err) => {
                self.handle_network_error(NetworkError::with_cause(ErrorCode::SocketFailure, err))
                    .await;
            }

            TransportEvent::Closed { code, reason } => {
                if code == CODE_CLOSE_BY_CLIENT {
                    debug!(target: self.channel.tag, "socket closed by client");
                } else {
                    self.handle_network_error(NetworkError::new(
                        format!("socket closed by server: {reason}"),
                        ErrorCode::SocketClosed.code(),
                        code as i32,
                    ))
                    .await;
                }
            }
        }
    }

    // ---- error classification -------------------------------------------

    async fn handle_network_error(&self, error: NetworkError) {
        error!(target: self.channel.tag, "[handle_network_error] {error}");
        self.listeners.broadcast(ListenerCall::Error(error.clone()));

        if ErrorCode::is_authentication_error(error.server_error_code) {
            self.token_manager.expire_token();
        }

        if error.server_error_code == ErrorCode::TokenExpired.code() {
            let token = self.token_manager.load_sync().await;
            if !token.is_empty() {
                debug!(
                    target: self.channel.tag,
                    "token refreshed inline, swallowing the expiry error"
                );
                return;
            }
        }

        let code = error.server_error_code;
        if code == ErrorCode::UndefinedToken.code()
            || code == ErrorCode::InvalidToken.code()
            || code == ErrorCode::ApiKeyNotFound.code()
            || code == ErrorCode::ValidationError.code()
        {
            debug!(
                target: self.channel.tag,
                "unrecoverable error (code {code}), requires an explicit reconnect"
            );
            self.state_service.on_unrecoverable_error(error).await;
        } else {
            self.state_service.on_network_error(error).await;
        }
    }

    // ---- policy sources --------------------------------------------------

    fn start_policy_observers(&self) {
        let mut tasks = self.policy_tasks.lock().unwrap();
        if !tasks.is_empty() {
            return;
        }

        let weak = self.weak();
        let mut network_rx = self.network.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                match network_rx.recv().await {
                    Ok(edge) => {
                        let Some(client) = weak.upgrade() else { return };
                        match edge {
                            NetworkState::Available => {
                                client.state_service.on_network_available().await;
                            }
                            NetworkState::Unavailable => {
                                client.state_service.on_network_not_available().await;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }));

        if self.channel.follow_lifecycle {
            let weak = self.weak();
            let mut lifecycle_rx = self.lifecycle.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    match lifecycle_rx.recv().await {
                        Ok(edge) => {
                            let Some(client) = weak.upgrade() else { return };
                            match edge {
                                LifecycleEvent::Resume => client.state_service.on_resume().await,
                                LifecycleEvent::Stop => client.state_service.on_stop().await,
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }));
        }
    }

    fn stop_policy_observers(&self) {
        let mut tasks = self.policy_tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl<C: WireCodec> Drop for SocketClient<C> {
    fn drop(&mut self) {
        self.stop_policy_observers();
        if let Some(observer) = self.state_observer.lock().unwrap().take() {
            observer.abort();
        }
        if let Some(session) = self.session.lock().unwrap().take()
            && let Some(demux_task) = session.demux_task
        {
            demux_task.abort();
        }
        self.health.stop();
    }
}

/// Bridges the health monitor back into the channel without keeping it
/// alive: probes while connected, escalates silence into the state
/// machine.
struct HealthHook<C: WireCodec> {
    client: Weak<SocketClient<C>>,
}

#[async_trait]
impl<C: WireCodec> HealthCallback for HealthHook<C> {
    async fn check(&self) {
        let Some(client) = self.client.upgrade() else { return };
        if !client.is_connected() {
            return;
        }
        if let Some(frame) = client.codec.health_check_frame() {
            client.send(&frame).await;
        }
    }

    async fn reconnect(&self) {
        let Some(client) = self.client.upgrade() else { return };
        client.state_service.on_socket_event_lost().await;
    }
}

use crate::codec::WireCodec;
use crate::config::ConnectionConfig;
use crate::error::{NetworkError, SocketError};
use crate::events::{ReplayBroadcast, ReplaySubscription};
use crate::listener::{EventStreamForwarder, ListenerId, SocketListener};
use crate::policy::{LifecycleObserver, NetworkStateProvider, SocketStateConnectionPolicy};
use crate::socket::{ChannelConfig, SocketClient};
use crate::state::SocketState;
use crate::token::{CacheableTokenProvider, TokenManager, TokenProvider};
use crate::transport::TransportFactory;
use bytes::Bytes;
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Public facade for the coordinator channel: the long-lived signaling
/// connection to the call-management backend. One instance per logged-in
/// user; it survives across calls and reconnects itself through network
/// drops, app lifecycle transitions, and server silence.
pub struct CoordinatorConnection<C: WireCodec> {
    url: String,
    api_key: String,
    socket: Arc<SocketClient<C>>,
    token_manager: Arc<TokenManager>,
    events: Arc<ReplayBroadcast<C::Event>>,
    errors: Arc<ReplayBroadcast<NetworkError>>,
}

impl<C: WireCodec> CoordinatorConnection<C> {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        codec: Arc<C>,
        transport_factory: Arc<dyn TransportFactory>,
        network: Arc<dyn NetworkStateProvider>,
        lifecycle: Arc<dyn LifecycleObserver>,
        token_provider: Arc<dyn TokenProvider>,
    ) -> Self {
        let token_manager = Arc::new(TokenManager::new());
        token_manager.set_token_provider(Arc::new(CacheableTokenProvider::new(token_provider)));

        let socket = SocketClient::new(
            ChannelConfig::coordinator(),
            codec,
            token_manager.clone(),
            transport_factory,
            network,
            lifecycle,
        );

        let events = Arc::new(ReplayBroadcast::new());
        let errors = Arc::new(ReplayBroadcast::new());
        socket.add_listener(Arc::new(EventStreamForwarder::new(
            events.clone(),
            errors.clone(),
        )));

        Self {
            url: url.into(),
            api_key: api_key.into(),
            socket,
            token_manager,
            events,
            errors,
        }
    }

    /// Request a connection for `user_id`. Returns once the request is
    /// enqueued; use [`Self::await_connected`] or [`Self::state`] for the
    /// outcome.
    pub async fn connect(&self, user_id: &str) {
        debug!(target: "callsig::coordinator", "[connect] user: {user_id}");
        self.socket
            .connect(ConnectionConfig::new(&self.url, &self.api_key, user_id))
            .await;
    }

    /// Request a reconnection. `force` revives even a channel that was
    /// explicitly disconnected or failed permanently.
    pub async fn reconnect(&self, user_id: &str, force: bool) {
        debug!(target: "callsig::coordinator", "[reconnect] user: {user_id}, force: {force}");
        self.socket
            .reconnect(
                ConnectionConfig::new(&self.url, &self.api_key, user_id),
                force,
            )
            .await;
    }

    pub async fn disconnect(&self) {
        debug!(target: "callsig::coordinator", "[disconnect]");
        self.socket.disconnect().await;
    }

    pub async fn send_event(&self, frame: &C::Frame) -> bool {
        self.socket.send(frame).await
    }

    pub async fn send_raw(&self, data: Bytes) -> bool {
        self.socket.send_raw(data).await
    }

    pub fn state(&self) -> watch::Receiver<SocketState<C::Handshake>> {
        self.socket.subscribe_state()
    }

    pub fn current_state(&self) -> SocketState<C::Handshake> {
        self.socket.current_state()
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_connected()
    }

    /// Inbound events that are not part of the connection protocol,
    /// buffered with a replay cache of one.
    pub fn events(&self) -> ReplaySubscription<C::Event> {
        self.events.subscribe()
    }

    /// Classified errors, recoverable and not.
    pub fn errors(&self) -> ReplaySubscription<NetworkError> {
        self.errors.subscribe()
    }

    pub fn connection_id(&self) -> watch::Receiver<Option<String>> {
        self.socket.connection_id()
    }

    pub fn connection_id_or_error(&self) -> Result<String, SocketError> {
        self.socket.connection_id_or_error()
    }

    /// Wait for `Connected` with the channel's default timeout.
    pub async fn await_connected(&self) -> Result<(), SocketError> {
        self.socket
            .await_connected(self.socket.default_connection_timeout())
            .await
    }

    pub async fn await_connected_for(&self, timeout: Duration) -> Result<(), SocketError> {
        self.socket.await_connected(timeout).await
    }

    /// Policy view over this connection's state, for callers gating
    /// keep-alive decisions (combine with `CallAwareConnectionPolicy` to
    /// keep the channel up while a call is active or ringing).
    pub fn connection_policy(&self) -> SocketStateConnectionPolicy<C::Handshake> {
        SocketStateConnectionPolicy::new(self.socket.subscribe_state())
    }

    /// Push a rotated credential; the next handshake uses it.
    pub fn update_token(&self, token: &str) {
        debug!(target: "callsig::coordinator", "[update_token]");
        self.token_manager.update_token(token);
    }

    pub fn add_listener(
        &self,
        listener: Arc<dyn SocketListener<C::Event, C::Handshake>>,
    ) -> ListenerId {
        self.socket.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.socket.remove_listener(id);
    }
}

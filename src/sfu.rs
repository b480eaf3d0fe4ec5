use crate::codec::WireCodec;
use crate::config::ConnectionConfig;
use crate::error::{NetworkError, SocketError};
use crate::events::{ReplayBroadcast, ReplaySubscription};
use crate::listener::{EventStreamForwarder, ListenerId, SocketListener};
use crate::policy::{LifecycleObserver, NetworkStateProvider};
use crate::socket::{ChannelConfig, SocketClient};
use crate::state::SocketState;
use crate::token::TokenManager;
use crate::transport::TransportFactory;
use bytes::Bytes;
use log::debug;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// The media channel identifies itself to callers, not to the server.
const ANONYMOUS_USER: &str = "anonymous";

/// Public facade for the per-call media-signaling channel to the SFU.
/// One instance per active call; the codec it is built with owns that
/// call's join request, and reconnects replay it with the rejoin flag
/// set.
///
/// Unlike the coordinator channel, mid-session token rotation is a
/// protocol violation here: `update_token` panics instead of silently
/// doing nothing. Tear the connection down and join again with fresh
/// credentials instead.
pub struct SfuConnection<C: WireCodec> {
    url: String,
    api_key: String,
    socket: Arc<SocketClient<C>>,
    events: Arc<ReplayBroadcast<C::Event>>,
    errors: Arc<ReplayBroadcast<NetworkError>>,
    socket_id: String,
}

impl<C: WireCodec> SfuConnection<C> {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        token: impl Into<String>,
        codec: Arc<C>,
        transport_factory: Arc<dyn TransportFactory>,
        network: Arc<dyn NetworkStateProvider>,
        lifecycle: Arc<dyn LifecycleObserver>,
    ) -> Self {
        // The join credential is fixed for the lifetime of the call.
        let token_manager = Arc::new(TokenManager::new());
        token_manager.update_token(token);

        let socket_id = generate_socket_id();
        let mut channel = ChannelConfig::media();
        channel.socket_id = Some(socket_id.clone());

        let socket = SocketClient::new(
            channel,
            codec,
            token_manager,
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
            events,
            errors,
            socket_id,
        }
    }

    /// Dial the SFU and send this call's join request.
    pub async fn connect(&self) {
        debug!(target: "callsig::sfu", "[connect] socket_id: {}", self.socket_id);
        self.socket
            .connect(ConnectionConfig::new(
                &self.url,
                &self.api_key,
                ANONYMOUS_USER,
            ))
            .await;
    }

    /// Rejoin the call over a fresh transport. The manager replays the
    /// cached config with the reconnection flag set, so the codec emits
    /// the protocol's rejoin flavor of the join request.
    pub async fn reconnect(&self, force: bool) {
        debug!(target: "callsig::sfu", "[reconnect] force: {force}");
        self.socket
            .reconnect(
                ConnectionConfig::new(&self.url, &self.api_key, ANONYMOUS_USER),
                force,
            )
            .await;
    }

    pub async fn disconnect(&self) {
        debug!(target: "callsig::sfu", "[disconnect]");
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

    pub fn events(&self) -> ReplaySubscription<C::Event> {
        self.events.subscribe()
    }

    pub fn errors(&self) -> ReplaySubscription<NetworkError> {
        self.errors.subscribe()
    }

    pub fn connection_id(&self) -> watch::Receiver<Option<String>> {
        self.socket.connection_id()
    }

    pub fn connection_id_or_error(&self) -> Result<String, SocketError> {
        self.socket.connection_id_or_error()
    }

    pub async fn await_connected(&self) -> Result<(), SocketError> {
        self.socket
            .await_connected(self.socket.default_connection_timeout())
            .await
    }

    pub async fn await_connected_for(&self, timeout: Duration) -> Result<(), SocketError> {
        self.socket.await_connected(timeout).await
    }

    /// Always panics: the media channel cannot rotate its credential
    /// mid-session. Create a new connection instead.
    pub fn update_token(&self, _token: &str) -> ! {
        panic!("update_token is not supported for the media channel; create a new connection instead");
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

fn generate_socket_id() -> String {
    let mut rng = rand::rng();
    format!("{:08x}{:08x}", rng.random::<u32>(), rng.random::<u32>())
}

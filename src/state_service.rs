use crate::config::ConnectionConfig;
use crate::error::NetworkError;
use crate::fsm::FiniteStateMachine;
use crate::state::{
    ConnectionKind, DisconnectReason, Handshake, RestartReason, SocketState, SocketStateTag,
    StateEvent, StateEventTag,
};
use log::{debug, error, info, warn};
use tokio::sync::watch;

// Transition handlers. Pure functions: no side effects, every one total
// over (state, event) even though the table only wires it to the event it
// matches.

fn connect<H: Handshake>(state: SocketState<H>, event: &StateEvent<H>) -> SocketState<H> {
    match event {
        StateEvent::Connect { config, kind } => SocketState::Connecting {
            config: config.clone(),
            kind: *kind,
        },
        _ => state,
    }
}

/// Connect gate for states that were left deliberately or fatally: an
/// automatic background retry must not resurrect them, only an initial or
/// forced request may.
fn guarded_connect<H: Handshake>(state: SocketState<H>, event: &StateEvent<H>) -> SocketState<H> {
    match event {
        StateEvent::Connect { config, kind } => match kind {
            ConnectionKind::Initial | ConnectionKind::ForcedReconnect => SocketState::Connecting {
                config: config.clone(),
                kind: *kind,
            },
            ConnectionKind::AutomaticReconnect => state,
        },
        _ => state,
    }
}

fn established<H: Handshake>(state: SocketState<H>, event: &StateEvent<H>) -> SocketState<H> {
    match event {
        StateEvent::ConnectionEstablished(handshake) => SocketState::Connected {
            event: handshake.clone(),
        },
        _ => state,
    }
}

fn temporary_failure<H: Handshake>(state: SocketState<H>, event: &StateEvent<H>) -> SocketState<H> {
    match event {
        StateEvent::NetworkError(err) => {
            SocketState::Disconnected(DisconnectReason::TemporaryFailure(err.clone()))
        }
        _ => state,
    }
}

fn permanent_failure<H: Handshake>(state: SocketState<H>, event: &StateEvent<H>) -> SocketState<H> {
    match event {
        StateEvent::UnrecoverableError(err) => {
            SocketState::Disconnected(DisconnectReason::PermanentFailure(err.clone()))
        }
        _ => state,
    }
}

fn by_request<H: Handshake>(_: SocketState<H>, _: &StateEvent<H>) -> SocketState<H> {
    SocketState::Disconnected(DisconnectReason::ByRequest)
}

fn stopped<H: Handshake>(_: SocketState<H>, _: &StateEvent<H>) -> SocketState<H> {
    SocketState::Disconnected(DisconnectReason::Stopped)
}

fn network_unavailable<H: Handshake>(_: SocketState<H>, _: &StateEvent<H>) -> SocketState<H> {
    SocketState::Disconnected(DisconnectReason::NetworkUnavailable)
}

fn event_stream_lost<H: Handshake>(_: SocketState<H>, _: &StateEvent<H>) -> SocketState<H> {
    SocketState::Disconnected(DisconnectReason::EventStreamLost)
}

fn stay<H: Handshake>(state: SocketState<H>, _: &StateEvent<H>) -> SocketState<H> {
    state
}

/// Declares the full transition table for a signaling channel and
/// translates domain intent into state machine events. Both the
/// coordinator channel and the per-call media channel run this exact
/// table; everything channel-specific lives in the side-effect layer.
pub struct SocketStateService<H: Handshake> {
    tag: &'static str,
    fsm: FiniteStateMachine<SocketState<H>, StateEvent<H>>,
}

impl<H: Handshake> SocketStateService<H> {
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            fsm: Self::build_fsm(tag, SocketState::Disconnected(DisconnectReason::Stopped)),
        }
    }

    pub fn with_initial_state(tag: &'static str, initial_state: SocketState<H>) -> Self {
        Self {
            tag,
            fsm: Self::build_fsm(tag, initial_state),
        }
    }

    fn build_fsm(
        tag: &'static str,
        initial_state: SocketState<H>,
    ) -> FiniteStateMachine<SocketState<H>, StateEvent<H>> {
        use SocketStateTag as S;
        use StateEventTag as E;

        let mut builder = FiniteStateMachine::builder(initial_state).default_handler(
            move |state: SocketState<H>, event: &StateEvent<H>| {
                error!(
                    target: "callsig::state",
                    "[{tag}] cannot handle event {event} while being in inappropriate state {state}"
                );
                state
            },
        );

        // The live and in-flight states all classify errors the same way
        // and honor every teardown request.
        for state in [
            S::RestartConnection,
            S::Connecting,
            S::Connected,
            S::NetworkUnavailable,
            S::EventStreamLost,
            S::TemporaryFailure,
        ] {
            builder = builder
                .on(state, E::ConnectionEstablished, established)
                .on(state, E::UnrecoverableError, permanent_failure)
                .on(state, E::NetworkError, temporary_failure)
                .on(state, E::RequiredDisconnect, by_request)
                .on(state, E::Stop, stopped);
        }

        // A fresh connect request with a new config wins over whatever
        // recovery is in flight. Connected is deliberately absent: the
        // handshake result decides there.
        for state in [
            S::RestartConnection,
            S::Connecting,
            S::NetworkUnavailable,
            S::EventStreamLost,
            S::TemporaryFailure,
        ] {
            builder = builder.on(state, E::Connect, connect);
        }

        for state in [
            S::RestartConnection,
            S::Connecting,
            S::Connected,
            S::TemporaryFailure,
        ] {
            builder = builder.on(state, E::EventStreamLost, event_stream_lost);
        }

        for state in [
            S::RestartConnection,
            S::Connecting,
            S::Connected,
            S::EventStreamLost,
            S::TemporaryFailure,
        ] {
            builder = builder.on(state, E::NetworkUnavailable, network_unavailable);
        }

        builder
            .on(S::NetworkUnavailable, E::NetworkAvailable, |_, _| {
                SocketState::RestartConnection(RestartReason::NetworkAvailable)
            })
            .on(S::Stopped, E::RequiredDisconnect, by_request)
            .on(S::Stopped, E::Connect, connect)
            .on(S::Stopped, E::Resume, |_, _| {
                SocketState::RestartConnection(RestartReason::LifecycleResume)
            })
            .on(S::ByRequest, E::RequiredDisconnect, stay)
            .on(S::ByRequest, E::Connect, guarded_connect)
            .on(S::PermanentFailure, E::Connect, guarded_connect)
            .on(S::PermanentFailure, E::RequiredDisconnect, by_request)
            .build()
    }

    /// Require a new connection with the given config.
    pub async fn on_connect(&self, config: ConnectionConfig) {
        debug!(
            target: "callsig::state",
            "[{}] on_connect user: '{}', is_reconnection: {}",
            self.tag, config.user_id, config.is_reconnection
        );
        self.fsm
            .send_event(StateEvent::Connect {
                config,
                kind: ConnectionKind::Initial,
            })
            .await;
    }

    /// Require a reconnection with the given config. A forced reconnection
    /// may revive a channel that was closed on purpose or failed
    /// permanently; an automatic one may not.
    pub async fn on_reconnect(&self, config: ConnectionConfig, force: bool) {
        debug!(
            target: "callsig::state",
            "[{}] on_reconnect user: '{}', is_reconnection: {}, force: {}",
            self.tag, config.user_id, config.is_reconnection, force
        );
        let kind = if force {
            ConnectionKind::ForcedReconnect
        } else {
            ConnectionKind::AutomaticReconnect
        };
        self.fsm.send_event(StateEvent::Connect { config, kind }).await;
    }

    /// Notify that the server confirmed the session.
    pub async fn on_connection_established(&self, event: H) {
        info!(target: "callsig::state", "[{}] on_connection_established", self.tag);
        self.fsm
            .send_event(StateEvent::ConnectionEstablished(event))
            .await;
    }

    pub async fn on_network_available(&self) {
        info!(target: "callsig::state", "[{}] on_network_available", self.tag);
        self.fsm.send_event(StateEvent::NetworkAvailable).await;
    }

    pub async fn on_network_not_available(&self) {
        warn!(target: "callsig::state", "[{}] on_network_not_available", self.tag);
        self.fsm.send_event(StateEvent::NetworkUnavailable).await;
    }

    pub async fn on_unrecoverable_error(&self, err: NetworkError) {
        error!(target: "callsig::state", "[{}] on_unrecoverable_error: {err}", self.tag);
        self.fsm.send_event(StateEvent::UnrecoverableError(err)).await;
    }

    pub async fn on_network_error(&self, err: NetworkError) {
        error!(target: "callsig::state", "[{}] on_network_error: {err}", self.tag);
        self.fsm.send_event(StateEvent::NetworkError(err)).await;
    }

    /// Notify that the caller wants the connection gone.
    pub async fn on_required_disconnect(&self) {
        info!(target: "callsig::state", "[{}] on_required_disconnect", self.tag);
        self.fsm.send_event(StateEvent::RequiredDisconnect).await;
    }

    pub async fn on_stop(&self) {
        info!(target: "callsig::state", "[{}] on_stop", self.tag);
        self.fsm.send_event(StateEvent::Stop).await;
    }

    /// Notify that heartbeats went missing for too long.
    pub async fn on_socket_event_lost(&self) {
        warn!(target: "callsig::state", "[{}] on_socket_event_lost", self.tag);
        self.fsm.send_event(StateEvent::EventStreamLost).await;
    }

    pub async fn on_resume(&self) {
        debug!(target: "callsig::state", "[{}] on_resume", self.tag);
        self.fsm.send_event(StateEvent::Resume).await;
    }

    pub fn current_state(&self) -> SocketState<H> {
        self.fsm.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<SocketState<H>> {
        self.fsm.subscribe()
    }
}

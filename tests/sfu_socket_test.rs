mod common;

use callsig::SfuConnection;
use callsig::policy::{LifecycleHandle, NetworkStateHandle};
use callsig::state::{DisconnectReason, SocketState};
use callsig::transport::TransportEvent;
use callsig::transport::mock::MockTransportFactory;
use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct SfuHarness {
    factory: Arc<MockTransportFactory>,
    network: Arc<NetworkStateHandle>,
    lifecycle: Arc<LifecycleHandle>,
    connection: SfuConnection<JoinCodec>,
}

fn sfu_harness() -> SfuHarness {
    init_logging();
    let factory = Arc::new(MockTransportFactory::new());
    let network = Arc::new(NetworkStateHandle::new(true));
    let lifecycle = Arc::new(LifecycleHandle::new());
    let connection = SfuConnection::new(
        "wss://sfu.example.com/ws",
        "api-key-1",
        "call-token-1",
        Arc::new(JoinCodec {
            call_id: "default:call-42".to_string(),
        }),
        factory.clone(),
        network.clone(),
        lifecycle.clone(),
    );
    SfuHarness {
        factory,
        network,
        lifecycle,
        connection,
    }
}

fn join_ok() -> TransportEvent {
    TransportEvent::Message(callsig::transport::WireMessage::Text(
        json!({ "type": "join.ok", "participant_count": 3 }).to_string(),
    ))
}

#[tokio::test]
async fn join_request_goes_out_as_soon_as_the_transport_exists() {
    let harness = sfu_harness();
    harness.connection.connect().await;

    wait_until(|| harness.factory.open_count() == 1).await;
    let session = harness.factory.latest_session();

    // The media channel does not wait for the open notification.
    wait_until(|| !session.transport.sent_messages().is_empty()).await;
    let sent = sent_json(&session.transport.sent_messages());
    assert_eq!(sent[0]["type"], "join");
    assert_eq!(sent[0]["call_id"], "default:call-42");
    assert_eq!(sent[0]["token"], "call-token-1");
    assert_eq!(sent[0]["rejoin"], false);
}

#[tokio::test]
async fn join_response_connects_and_yields_the_local_socket_id() {
    let harness = sfu_harness();
    harness.connection.connect().await;
    wait_until(|| harness.factory.open_count() == 1).await;
    let session = harness.factory.latest_session();
    session.push(TransportEvent::Opened).await;
    session.push(join_ok()).await;

    harness
        .connection
        .await_connected_for(Duration::from_secs(1))
        .await
        .expect("connected");

    // The join response carries no session id, so the locally generated
    // one is exposed instead.
    let id = harness.connection.connection_id_or_error().unwrap();
    assert_eq!(id.len(), 16);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn forced_rejoin_replays_the_join_with_the_rejoin_flag() {
    let harness = sfu_harness();
    harness.connection.connect().await;
    wait_until(|| harness.factory.open_count() == 1).await;
    let first = harness.factory.latest_session();
    first.push(TransportEvent::Opened).await;
    first.push(join_ok()).await;
    harness
        .connection
        .await_connected_for(Duration::from_secs(1))
        .await
        .unwrap();

    harness.connection.disconnect().await;
    let mut state_rx = harness.connection.state();
    tokio::time::timeout(
        Duration::from_secs(1),
        state_rx.wait_for(|state| {
            matches!(state, SocketState::Disconnected(DisconnectReason::ByRequest))
        }),
    )
    .await
    .expect("disconnected")
    .unwrap();

    // An automatic retry must not revive a deliberately closed call.
    harness.connection.reconnect(false).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.factory.open_count(), 1);

    // A forced rejoin goes through and carries the rejoin flag.
    harness.connection.reconnect(true).await;
    wait_until(|| harness.factory.open_count() == 2).await;
    let second = harness.factory.latest_session();
    wait_until(|| !second.transport.sent_messages().is_empty()).await;

    let sent = sent_json(&second.transport.sent_messages());
    assert_eq!(sent[0]["type"], "join");
    assert_eq!(sent[0]["rejoin"], true);
}

#[tokio::test]
async fn media_channel_ignores_app_lifecycle() {
    let harness = sfu_harness();
    harness.connection.connect().await;
    wait_until(|| harness.factory.open_count() == 1).await;
    let session = harness.factory.latest_session();
    session.push(TransportEvent::Opened).await;
    session.push(join_ok()).await;
    harness
        .connection
        .await_connected_for(Duration::from_secs(1))
        .await
        .unwrap();

    // Backgrounding the app must not stop an active call's channel.
    harness.lifecycle.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.connection.is_connected());
}

#[tokio::test]
async fn media_channel_still_follows_network_edges() {
    let harness = sfu_harness();
    harness.connection.connect().await;
    wait_until(|| harness.factory.open_count() == 1).await;
    let session = harness.factory.latest_session();
    session.push(TransportEvent::Opened).await;
    session.push(join_ok()).await;
    harness
        .connection
        .await_connected_for(Duration::from_secs(1))
        .await
        .unwrap();

    harness.network.notify_unavailable();
    let mut state_rx = harness.connection.state();
    tokio::time::timeout(
        Duration::from_secs(1),
        state_rx.wait_for(|state| {
            matches!(
                state,
                SocketState::Disconnected(DisconnectReason::NetworkUnavailable)
            )
        }),
    )
    .await
    .expect("network-unavailable state")
    .unwrap();
}

#[tokio::test]
#[should_panic(expected = "not supported for the media channel")]
async fn update_token_fails_loudly() {
    let harness = sfu_harness();
    harness.connection.update_token("new-token");
}

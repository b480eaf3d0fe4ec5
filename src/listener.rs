use crate::error::{DisconnectCause, NetworkError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Callbacks for one channel's connection lifecycle and inbound events.
/// Every method has a default empty body; implement what you care about.
#[async_trait]
pub trait SocketListener<E, H>: Send + Sync
where
    E: Clone + Send + Sync + 'static,
    H: Clone + Send + Sync + 'static,
{
    /// A transport instance was created for a new connection attempt.
    async fn on_created(&self) {}

    async fn on_connecting(&self) {}

    async fn on_connected(&self, _event: &H) {}

    /// An inbound event that is neither a health-check reply nor part of
    /// the connection protocol.
    async fn on_event(&self, _event: &E) {}

    async fn on_error(&self, _error: &NetworkError) {}

    async fn on_disconnected(&self, _cause: &DisconnectCause) {}
}

#[derive(Clone)]
pub(crate) enum ListenerCall<E, H> {
    Created,
    Connecting,
    Connected(H),
    Event(E),
    Error(NetworkError),
    Disconnected(DisconnectCause),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Thread-safe listener set. Each listener gets its own queue and
/// dispatch task: deliveries to one listener stay in arrival order, a
/// slow listener only backs up its own queue, and registration while a
/// dispatch is in flight is safe.
pub struct ListenerRegistry<E, H>
where
    E: Clone + Send + Sync + 'static,
    H: Clone + Send + Sync + 'static,
{
    listeners: DashMap<u64, mpsc::UnboundedSender<ListenerCall<E, H>>>,
    next_id: AtomicU64,
}

impl<E, H> ListenerRegistry<E, H>
where
    E: Clone + Send + Sync + 'static,
    H: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn add(&self, listener: Arc<dyn SocketListener<E, H>>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, mut rx) = mpsc::unbounded_channel::<ListenerCall<E, H>>();
        tokio::spawn(async move {
            while let Some(call) = rx.recv().await {
                match call {
                    ListenerCall::Created => listener.on_created().await,
                    ListenerCall::Connecting => listener.on_connecting().await,
                    ListenerCall::Connected(event) => listener.on_connected(&event).await,
                    ListenerCall::Event(event) => listener.on_event(&event).await,
                    ListenerCall::Error(error) => listener.on_error(&error).await,
                    ListenerCall::Disconnected(cause) => listener.on_disconnected(&cause).await,
                }
            }
        });
        self.listeners.insert(id, tx);
        ListenerId(id)
    }

    /// Dropping the queue ends the dispatch task after in-flight calls
    /// drain; nothing is cut mid-delivery.
    pub fn remove(&self, id: ListenerId) {
        self.listeners.remove(&id.0);
    }

    pub fn clear(&self) {
        self.listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub(crate) fn broadcast(&self, call: ListenerCall<E, H>) {
        for entry in self.listeners.iter() {
            let _ = entry.value().send(call.clone());
        }
    }
}

impl<E, H> Default for ListenerRegistry<E, H>
where
    E: Clone + Send + Sync + 'static,
    H: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Facade-internal listener that copies events and errors onto the
/// replaying broadcast streams the public API exposes.
pub(crate) struct EventStreamForwarder<E: Clone, H> {
    pub(crate) events: Arc<crate::events::ReplayBroadcast<E>>,
    pub(crate) errors: Arc<crate::events::ReplayBroadcast<NetworkError>>,
    _handshake: std::marker::PhantomData<fn() -> H>,
}

impl<E: Clone, H> EventStreamForwarder<E, H> {
    pub(crate) fn new(
        events: Arc<crate::events::ReplayBroadcast<E>>,
        errors: Arc<crate::events::ReplayBroadcast<NetworkError>>,
    ) -> Self {
        Self {
            events,
            errors,
            _handshake: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<E, H> SocketListener<E, H> for EventStreamForwarder<E, H>
where
    E: Clone + Send + Sync + 'static,
    H: Clone + Send + Sync + 'static,
{
    async fn on_event(&self, event: &E) {
        self.events.emit(event.clone());
    }

    async fn on_error(&self, error: &NetworkError) {
        self.errors.emit(error.clone());
    }
}

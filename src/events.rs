use log::warn;
use std::sync::RwLock;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 100;

/// Multi-subscriber event stream with a replay cache of one: new
/// subscribers see the latest value first, then live values. Slow
/// subscribers lose the oldest buffered values rather than stalling the
/// emitter.
pub struct ReplayBroadcast<T: Clone> {
    tx: broadcast::Sender<T>,
    latest: RwLock<Option<T>>,
}

impl<T: Clone> ReplayBroadcast<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            latest: RwLock::new(None),
        }
    }

    pub fn emit(&self, value: T) {
        *self.latest.write().unwrap() = Some(value.clone());
        // No subscribers is fine; the replay cache still updates.
        let _ = self.tx.send(value);
    }

    pub fn subscribe(&self) -> ReplaySubscription<T> {
        // Order matters: grab the receiver before reading the cache so a
        // value emitted in between is seen at most twice, never zero times.
        let rx = self.tx.subscribe();
        let replay = self.latest.read().unwrap().clone();
        ReplaySubscription { replay, rx }
    }

    pub fn latest(&self) -> Option<T> {
        self.latest.read().unwrap().clone()
    }
}

impl<T: Clone> Default for ReplayBroadcast<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ReplaySubscription<T: Clone> {
    replay: Option<T>,
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> ReplaySubscription<T> {
    /// Next value, or `None` once the emitter is gone. Lagging skips the
    /// dropped values and keeps going.
    pub async fn recv(&mut self) -> Option<T> {
        if let Some(value) = self.replay.take() {
            return Some(value);
        }
        loop {
            match self.rx.recv().await {
                Ok(value) => return Some(value),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(target: "callsig::events", "subscriber lagged, dropped {missed} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

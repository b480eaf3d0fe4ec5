use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::{Mutex, watch};

/// Maps a closed union to a payload-free tag so transition tables can be
/// keyed by variant instead of by value.
pub trait Tagged {
    type Tag: Copy + Eq + Hash + std::fmt::Debug + Send + Sync + 'static;

    fn tag(&self) -> Self::Tag;
}

pub type Handler<S, E> = Box<dyn Fn(S, &E) -> S + Send + Sync>;
pub type EnterListener<S, E> = Box<dyn Fn(&S, &E) + Send + Sync>;

/// A finite state machine over the closed state union `S` and event union
/// `E`. Transitions are pure `(state, event) -> state` functions looked up
/// by `(state tag, event tag)`; pairs with no registered handler fall back
/// to the default handler. Enter listeners run after a transition actually
/// changed the state (structural comparison).
///
/// `send_event` serializes transitions through an async mutex, and both
/// the watch notification and the enter listeners run after the lock is
/// released, so a listener may feed new events back in without
/// deadlocking.
pub struct FiniteStateMachine<S: Tagged + Clone + PartialEq, E: Tagged> {
    handlers: HashMap<(S::Tag, E::Tag), Handler<S, E>>,
    enter_listeners: HashMap<S::Tag, Vec<EnterListener<S, E>>>,
    default_handler: Handler<S, E>,
    transition_lock: Mutex<()>,
    state_tx: watch::Sender<S>,
}

impl<S: Tagged + Clone + PartialEq, E: Tagged> FiniteStateMachine<S, E> {
    pub fn builder(initial_state: S) -> FsmBuilder<S, E> {
        FsmBuilder {
            initial_state,
            handlers: HashMap::new(),
            enter_listeners: HashMap::new(),
            default_handler: Box::new(|state, _| state),
        }
    }

    /// Synchronous snapshot of the current state.
    pub fn state(&self) -> S {
        self.state_tx.borrow().clone()
    }

    /// Stream of states. New subscribers observe the current value first,
    /// then every subsequent change.
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.state_tx.subscribe()
    }

    /// The entry point to change state. Never fails: unhandled events run
    /// the default handler, which keeps the machine in place.
    pub async fn send_event(&self, event: E) {
        let transition = {
            let _guard = self.transition_lock.lock().await;
            let old_state = self.state_tx.borrow().clone();
            let handler = self
                .handlers
                .get(&(old_state.tag(), event.tag()))
                .unwrap_or(&self.default_handler);
            let new_state = handler(old_state.clone(), &event);
            if new_state != old_state {
                self.state_tx.send_replace(new_state.clone());
                Some(new_state)
            } else {
                None
            }
        };

        if let Some(new_state) = transition
            && let Some(listeners) = self.enter_listeners.get(&new_state.tag())
        {
            for listener in listeners {
                listener(&new_state, &event);
            }
        }
    }
}

/// Explicit table construction: one `on` call per `(state, event)` cell.
pub struct FsmBuilder<S: Tagged + Clone + PartialEq, E: Tagged> {
    initial_state: S,
    handlers: HashMap<(S::Tag, E::Tag), Handler<S, E>>,
    enter_listeners: HashMap<S::Tag, Vec<EnterListener<S, E>>>,
    default_handler: Handler<S, E>,
}

impl<S: Tagged + Clone + PartialEq, E: Tagged> FsmBuilder<S, E> {
    /// Called for `(state, event)` pairs with no registered handler.
    pub fn default_handler(mut self, handler: impl Fn(S, &E) -> S + Send + Sync + 'static) -> Self {
        self.default_handler = Box::new(handler);
        self
    }

    pub fn on(
        mut self,
        state: S::Tag,
        event: E::Tag,
        handler: impl Fn(S, &E) -> S + Send + Sync + 'static,
    ) -> Self {
        if self.handlers.insert((state, event), Box::new(handler)).is_some() {
            panic!("duplicate handler for ({state:?}, {event:?})");
        }
        self
    }

    /// Runs after the machine entered `state` through an actual change,
    /// with the event that caused it.
    pub fn on_enter(mut self, state: S::Tag, listener: impl Fn(&S, &E) + Send + Sync + 'static) -> Self {
        self.enter_listeners
            .entry(state)
            .or_default()
            .push(Box::new(listener));
        self
    }

    pub fn build(self) -> FiniteStateMachine<S, E> {
        let (state_tx, _) = watch::channel(self.initial_state);
        FiniteStateMachine {
            handlers: self.handlers,
            enter_listeners: self.enter_listeners,
            default_handler: self.default_handler,
            transition_lock: Mutex::new(()),
            state_tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    enum DoorState {
        Open,
        Closed { slams: u32 },
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum DoorTag {
        Open,
        Closed,
    }

    impl Tagged for DoorState {
        type Tag = DoorTag;
        fn tag(&self) -> DoorTag {
            match self {
                DoorState::Open => DoorTag::Open,
                DoorState::Closed { .. } => DoorTag::Closed,
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum DoorEvent {
        Push,
        Slam,
    }

    impl Tagged for DoorEvent {
        type Tag = DoorEvent;
        fn tag(&self) -> DoorEvent {
            *self
        }
    }

    fn door_fsm() -> FsmBuilder<DoorState, DoorEvent> {
        FiniteStateMachine::builder(DoorState::Closed { slams: 0 })
            .on(DoorTag::Closed, DoorEvent::Push, |_, _| DoorState::Open)
            .on(DoorTag::Open, DoorEvent::Slam, |_, _| DoorState::Closed { slams: 1 })
    }

    #[tokio::test]
    async fn transitions_follow_the_table() {
        let fsm = door_fsm().build();
        assert_eq!(fsm.state(), DoorState::Closed { slams: 0 });

        fsm.send_event(DoorEvent::Push).await;
        assert_eq!(fsm.state(), DoorState::Open);

        fsm.send_event(DoorEvent::Slam).await;
        assert_eq!(fsm.state(), DoorState::Closed { slams: 1 });
    }

    #[tokio::test]
    async fn unhandled_event_runs_default_handler_and_stays() {
        let hits = Arc::new(AtomicU32::new(0));
        let hits_clone = hits.clone();
        let fsm = door_fsm()
            .default_handler(move |state, _| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
                state
            })
            .build();

        fsm.send_event(DoorEvent::Slam).await;
        assert_eq!(fsm.state(), DoorState::Closed { slams: 0 });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn enter_listeners_fire_only_on_change() {
        let entered = Arc::new(AtomicU32::new(0));
        let entered_clone = entered.clone();
        let fsm = door_fsm()
            .on(DoorTag::Closed, DoorEvent::Slam, |state, _| state)
            .on_enter(DoorTag::Open, move |_, _| {
                entered_clone.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        fsm.send_event(DoorEvent::Slam).await;
        assert_eq!(entered.load(Ordering::SeqCst), 0);

        fsm.send_event(DoorEvent::Push).await;
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscribers_replay_latest_then_follow() {
        let fsm = door_fsm().build();
        let mut rx = fsm.subscribe();
        assert_eq!(*rx.borrow_and_update(), DoorState::Closed { slams: 0 });

        fsm.send_event(DoorEvent::Push).await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), DoorState::Open);
    }
}

use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;

use crossbeam_channel::unbounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use failure::ResultExt;
use humthreads::Builder;
use humthreads::Thread;
use slog::debug;
use slog::error;
use slog::info;
use slog::warn;
use slog::Logger;
use zookeeper::ZkState;

use super::super::metrics::ZOO_LISTENER_PANICS;
use super::super::metrics::ZOO_STATE_EVENTS;
use super::super::ErrorKind;
use super::super::Result;
use super::super::StateEvent;
use super::super::StateListener;
use super::callback;

/// Connectivity as seen through the library state changes.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
enum Phase {
    /// No session was ever connected.
    Initial,
    Connected,
    /// The connection dropped but the session may still be alive.
    Suspended,
    /// The session was closed by the ensemble.
    Lost,
}

/// Translate library states into the domain alphabet.
///
/// Suspensions are tracked so the following connection is reported as a reconnect,
/// but are never forwarded themselves.
#[derive(Debug)]
struct StateTracker {
    generation: u64,
    phase: Phase,
}

impl StateTracker {
    fn new() -> StateTracker {
        StateTracker {
            generation: 0,
            phase: Phase::Initial,
        }
    }

    fn observe(&mut self, generation: u64, state: ZkState) -> Option<StateEvent> {
        // Late events from replaced sessions must not alter the current state.
        if generation != self.generation {
            return None;
        }
        match state {
            ZkState::Connected | ZkState::ConnectedReadOnly => {
                let event = match self.phase {
                    Phase::Initial => Some(StateEvent::Connected),
                    Phase::Connected => None,
                    Phase::Suspended | Phase::Lost => Some(StateEvent::Reconnected),
                };
                self.phase = Phase::Connected;
                event
            }
            ZkState::Closed => match self.phase {
                Phase::Connected | Phase::Suspended => {
                    self.phase = Phase::Lost;
                    Some(StateEvent::Disconnected)
                }
                Phase::Initial | Phase::Lost => None,
            },
            ZkState::AuthFailed => None,
            _ => {
                if self.phase == Phase::Connected {
                    self.phase = Phase::Suspended;
                }
                None
            }
        }
    }
}

/// Fan out connection state events to registered `StateListener`s.
///
/// Events are queued and delivered by a dedicated thread so listeners never
/// block the zookeeper event thread.
pub struct StateFanout {
    listeners: Arc<Mutex<Vec<Arc<dyn StateListener>>>>,
    logger: Logger,
    sender: Mutex<Option<Sender<StateEvent>>>,
    tracker: Mutex<StateTracker>,
    dispatcher: Mutex<Option<Thread<()>>>,
}

impl StateFanout {
    pub fn new(logger: Logger) -> Result<StateFanout> {
        let (sender, receiver) = unbounded();
        let listeners = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = {
            let listeners = Arc::clone(&listeners);
            let logger = logger.clone();
            Builder::new("r:zk:states")
                .full_name("replicore:util:zookeeper:state-dispatcher")
                .spawn(move |scope| {
                    scope.activity("dispatching zookeeper state events");
                    callback::mark_thread();
                    StateFanout::dispatch(&listeners, &logger, receiver);
                })
                .with_context(|_| ErrorKind::SpawnThread("zookeeper state dispatcher"))?
        };
        Ok(StateFanout {
            listeners,
            logger,
            sender: Mutex::new(Some(sender)),
            tracker: Mutex::new(StateTracker::new()),
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// Register a listener, ignoring duplicates.
    pub fn add(&self, listener: Arc<dyn StateListener>) {
        let mut listeners = self.listeners.lock().expect("state listeners lock poisoned");
        if !listeners.iter().any(|known| Arc::ptr_eq(known, &listener)) {
            listeners.push(listener);
        }
    }

    /// Start tracking events for a new session.
    ///
    /// Must be called before the session is created so its first events are not dropped.
    pub fn begin(&self, generation: u64) {
        let mut tracker = self.tracker.lock().expect("state tracker lock poisoned");
        tracker.generation = generation;
    }

    /// Stop dispatching events and wait for queued events to be delivered.
    ///
    /// The wait is skipped when called by a listener.
    pub fn close(&self) {
        drop(self.sender.lock().expect("state sender lock poisoned").take());
        let dispatcher = self
            .dispatcher
            .lock()
            .expect("state dispatcher lock poisoned")
            .take();
        if let Some(dispatcher) = dispatcher {
            if callback::active() {
                return;
            }
            if dispatcher.join().is_err() {
                error!(self.logger, "Zookeeper state dispatcher thread paniced");
            }
        }
    }

    /// Check if the current session is believed to be connected.
    pub fn is_connected(&self) -> bool {
        let tracker = self.tracker.lock().expect("state tracker lock poisoned");
        tracker.phase == Phase::Connected
    }

    /// Process a library state change for the given session generation.
    pub fn observe(&self, generation: u64, state: ZkState) {
        match state {
            ZkState::AuthFailed => error!(self.logger, "Zookeeper authentication error"),
            ZkState::Closed => warn!(self.logger, "Zookeeper session closed"),
            ZkState::Connected => info!(self.logger, "Zookeeper connection successfull"),
            ZkState::ConnectedReadOnly => warn!(self.logger, "Zookeeper connection is read-only"),
            ZkState::Connecting => debug!(self.logger, "Zookeeper session connecting"),
            ref state => debug!(self.logger, "Zookeeper state changed"; "state" => ?state),
        };

        // Send while holding the tracker so events are queued in the order they were decided.
        let mut tracker = self.tracker.lock().expect("state tracker lock poisoned");
        let event = match tracker.observe(generation, state) {
            None => return,
            Some(event) => event,
        };
        let sender = self.sender.lock().expect("state sender lock poisoned");
        match sender.as_ref() {
            None => debug!(self.logger, "Ignoring state event after close"; "event" => %event),
            Some(sender) => {
                if sender.send(event).is_err() {
                    warn!(self.logger, "Zookeeper state dispatcher is gone"; "event" => %event);
                }
            }
        };
    }

    /// Unregister a listener, if it was registered.
    pub fn remove(&self, listener: &Arc<dyn StateListener>) {
        let mut listeners = self.listeners.lock().expect("state listeners lock poisoned");
        listeners.retain(|known| !Arc::ptr_eq(known, listener));
    }
}

impl StateFanout {
    /// Deliver events to a snapshot of the listeners, in registration order.
    fn dispatch(
        listeners: &Mutex<Vec<Arc<dyn StateListener>>>,
        logger: &Logger,
        receiver: Receiver<StateEvent>,
    ) {
        for event in receiver.iter() {
            ZOO_STATE_EVENTS.with_label_values(&[event.name()]).inc();
            let snapshot: Vec<Arc<dyn StateListener>> = listeners
                .lock()
                .expect("state listeners lock poisoned")
                .clone();
            debug!(
                logger, "Dispatching zookeeper state event";
                "event" => %event, "listeners" => snapshot.len(),
            );
            for listener in snapshot {
                let result = catch_unwind(AssertUnwindSafe(|| listener.state_changed(event)));
                if result.is_err() {
                    ZOO_LISTENER_PANICS.inc();
                    error!(logger, "State listener paniced"; "event" => %event);
                }
            }
        }
        debug!(logger, "Zookeeper state dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crossbeam_channel::unbounded;
    use slog::o;
    use zookeeper::ZkState;

    use super::StateFanout;
    use super::StateTracker;
    use crate::StateEvent;
    use crate::StateListener;

    fn logger() -> ::slog::Logger {
        ::slog::Logger::root(::slog::Discard, o!())
    }

    #[test]
    fn first_connection_is_connected() {
        let mut tracker = StateTracker::new();
        assert_eq!(tracker.observe(0, ZkState::Connecting), None);
        assert_eq!(
            tracker.observe(0, ZkState::Connected),
            Some(StateEvent::Connected)
        );
        assert_eq!(tracker.observe(0, ZkState::Connected), None);
    }

    #[test]
    fn suspension_is_not_forwarded() {
        let mut tracker = StateTracker::new();
        tracker.observe(0, ZkState::Connected);
        assert_eq!(tracker.observe(0, ZkState::Connecting), None);
        assert_eq!(
            tracker.observe(0, ZkState::Connected),
            Some(StateEvent::Reconnected)
        );
    }

    #[test]
    fn session_loss_then_new_session() {
        let mut tracker = StateTracker::new();
        tracker.observe(0, ZkState::Connected);
        assert_eq!(
            tracker.observe(0, ZkState::Closed),
            Some(StateEvent::Disconnected)
        );
        assert_eq!(tracker.observe(0, ZkState::Closed), None);
        tracker.generation = 1;
        assert_eq!(
            tracker.observe(1, ZkState::Connected),
            Some(StateEvent::Reconnected)
        );
    }

    #[test]
    fn stale_generations_are_ignored() {
        let mut tracker = StateTracker::new();
        tracker.observe(0, ZkState::Connected);
        tracker.generation = 1;
        assert_eq!(tracker.observe(0, ZkState::Closed), None);
        assert_eq!(tracker.observe(1, ZkState::Connected), None);
    }

    #[test]
    fn closed_before_connecting_is_ignored() {
        let mut tracker = StateTracker::new();
        assert_eq!(tracker.observe(0, ZkState::Closed), None);
        assert_eq!(tracker.observe(0, ZkState::AuthFailed), None);
    }

    #[test]
    fn fanout_in_registration_order_despite_panics() {
        let fanout = StateFanout::new(logger()).unwrap();
        let (sender, receiver) = unbounded();
        let first = sender.clone();
        let failing: Arc<dyn StateListener> = Arc::new(|_: StateEvent| panic!("listener failure"));
        let recorder_one: Arc<dyn StateListener> =
            Arc::new(move |event: StateEvent| first.send((1, event)).unwrap());
        let recorder_two: Arc<dyn StateListener> =
            Arc::new(move |event: StateEvent| sender.send((2, event)).unwrap());
        fanout.add(Arc::clone(&recorder_one));
        fanout.add(failing);
        fanout.add(recorder_two);
        fanout.add(recorder_one);

        fanout.observe(0, ZkState::Connected);
        let timeout = Duration::from_secs(5);
        assert_eq!(
            receiver.recv_timeout(timeout).unwrap(),
            (1, StateEvent::Connected)
        );
        assert_eq!(
            receiver.recv_timeout(timeout).unwrap(),
            (2, StateEvent::Connected)
        );
        fanout.close();
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn removed_listeners_are_skipped() {
        let fanout = StateFanout::new(logger()).unwrap();
        let (sender, receiver) = unbounded();
        let listener: Arc<dyn StateListener> =
            Arc::new(move |event: StateEvent| sender.send(event).unwrap());
        fanout.add(Arc::clone(&listener));
        fanout.remove(&listener);
        fanout.observe(0, ZkState::Connected);
        fanout.close();
        assert!(receiver.try_recv().is_err());
        assert!(fanout.is_connected());
    }
}

use std::fmt;

/// Domain connection state events delivered to `StateListener`s.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum StateEvent {
    /// A session was established for the first time.
    Connected,

    /// The session was lost (expired or closed by the ensemble).
    Disconnected,

    /// Connectivity was restored after a suspension or a session loss.
    Reconnected,
}

impl StateEvent {
    /// Label used for logging and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            StateEvent::Connected => "connected",
            StateEvent::Disconnected => "disconnected",
            StateEvent::Reconnected => "reconnected",
        }
    }
}

impl fmt::Display for StateEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Receive the current list of children whenever the children of a path change.
///
/// Each notification is a full snapshot of the direct children, not a delta.
pub trait ChildListener: Send + Sync {
    fn child_changed(&self, path: &str, children: Vec<String>);
}

impl<F> ChildListener for F
where
    F: Fn(&str, Vec<String>) + Send + Sync,
{
    fn child_changed(&self, path: &str, children: Vec<String>) {
        self(path, children)
    }
}

/// Receive connection state changes for the client session.
pub trait StateListener: Send + Sync {
    fn state_changed(&self, state: StateEvent);
}

impl<F> StateListener for F
where
    F: Fn(StateEvent) + Send + Sync,
{
    fn state_changed(&self, state: StateEvent) {
        self(state)
    }
}

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_channel::Sender;
use zookeeper::KeeperState;
use zookeeper::WatchedEvent;
use zookeeper::WatchedEventType;
use zookeeper::ZkError;
use zookeeper::ZkResult;
use zookeeper::ZkState;

use super::super::backend::ChildWatcher;
use super::super::backend::Keeper;
use super::super::backend::NodeKind;
use super::super::backend::StateCallback;
use super::super::path;
use super::EnsembleInner;
use super::Job;

/// Lifecycle of a mock session.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
enum Status {
    Alive,
    Closed,
    Expired,
}

/// Kind of change that triggers children watches.
#[derive(Clone, Copy, Debug)]
enum Change {
    Children,
    Deleted,
}

struct MockSession {
    states: StateCallback,
    status: Status,
}

struct MockZnode {
    data: Vec<u8>,
    owner: Option<u64>,
    sequence: u64,
}

impl MockZnode {
    fn new(data: Vec<u8>, owner: Option<u64>) -> MockZnode {
        MockZnode {
            data,
            owner,
            sequence: 0,
        }
    }
}

/// A children watch waiting for the next change.
struct PendingWatch {
    path: String,
    session: u64,
    watcher: ChildWatcher,
}

/// Nodes, sessions and watches of a mock ensemble.
pub struct EnsembleState {
    failures: VecDeque<ZkError>,
    next_session: u64,
    nodes: BTreeMap<String, MockZnode>,
    pub refuse_connections: bool,
    sessions: HashMap<u64, MockSession>,
    watches: Vec<PendingWatch>,
}

impl EnsembleState {
    pub fn new() -> EnsembleState {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), MockZnode::new(Vec::new(), None));
        EnsembleState {
            failures: VecDeque::new(),
            next_session: 1,
            nodes,
            refuse_connections: false,
            sessions: HashMap::new(),
            watches: Vec::new(),
        }
    }

    /// Queue a state change for all live sessions.
    pub fn broadcast(&self, events: &Sender<Job>, state: ZkState) {
        for session in self.sessions.values() {
            if session.status != Status::Alive {
                continue;
            }
            let states = Arc::clone(&session.states);
            let state = state.clone();
            let job: Job = Box::new(move || states(state));
            let _ = events.send(job);
        }
    }

    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.nodes.get(path).map(|node| node.data.clone())
    }

    pub fn expire_all(&mut self, events: &Sender<Job>) {
        let alive: Vec<u64> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.status == Status::Alive)
            .map(|(id, _)| *id)
            .collect();
        for id in alive {
            self.end_session(id, Status::Expired, events);
        }
    }

    pub fn fail_next(&mut self, error: ZkError) {
        self.failures.push_back(error);
    }

    pub fn is_ephemeral(&self, path: &str) -> bool {
        self.nodes
            .get(path)
            .map(|node| node.owner.is_some())
            .unwrap_or(false)
    }

    pub fn open_session(&mut self, states: StateCallback) -> u64 {
        let id = self.next_session;
        self.next_session += 1;
        let session = MockSession {
            states,
            status: Status::Alive,
        };
        self.sessions.insert(id, session);
        id
    }
}

impl EnsembleState {
    /// Verify a session can perform operations and apply injected failures.
    fn check(&mut self, session: u64) -> ZkResult<()> {
        if let Some(error) = self.failures.pop_front() {
            return Err(error);
        }
        match self.sessions.get(&session).map(|session| session.status) {
            Some(Status::Alive) => Ok(()),
            Some(Status::Expired) => Err(ZkError::SessionExpired),
            _ => Err(ZkError::ConnectionLoss),
        }
    }

    fn children(&self, path: &str) -> ZkResult<Vec<String>> {
        if !self.nodes.contains_key(path) {
            return Err(ZkError::NoNode);
        }
        let children = self
            .nodes
            .keys()
            .filter(|child| child.as_str() != "/" && path::parent(child) == Some(path))
            .map(|child| path::basename(child).to_string())
            .collect();
        Ok(children)
    }

    fn create(
        &mut self,
        session: u64,
        path: &str,
        data: Vec<u8>,
        kind: NodeKind,
        events: &Sender<Job>,
    ) -> ZkResult<String> {
        let container = match path::parent(path) {
            Some(container) => container.to_string(),
            None if path == "/" => return Err(ZkError::NodeExists),
            None => return Err(ZkError::BadArguments),
        };
        let parent = self.nodes.get_mut(&container).ok_or(ZkError::NoNode)?;
        if parent.owner.is_some() {
            return Err(ZkError::NoChildrenForEphemerals);
        }
        let path = if kind.is_sequential() {
            let sequence = parent.sequence;
            parent.sequence += 1;
            format!("{}{:010}", path, sequence)
        } else {
            path.to_string()
        };
        if self.nodes.contains_key(&path) {
            return Err(ZkError::NodeExists);
        }
        let owner = if kind.is_ephemeral() {
            Some(session)
        } else {
            None
        };
        self.nodes.insert(path.clone(), MockZnode::new(data, owner));
        self.trigger(&container, Change::Children, events);
        Ok(path)
    }

    fn delete(&mut self, path: &str, events: &Sender<Job>) -> ZkResult<()> {
        if !self.nodes.contains_key(path) {
            return Err(ZkError::NoNode);
        }
        if !self.children(path)?.is_empty() {
            return Err(ZkError::NotEmpty);
        }
        self.nodes.remove(path);
        self.trigger(path, Change::Deleted, events);
        if let Some(container) = path::parent(path) {
            self.trigger(container, Change::Children, events);
        }
        Ok(())
    }

    /// Terminate a session, dropping its watches and ephemeral nodes.
    fn end_session(&mut self, id: u64, status: Status, events: &Sender<Job>) {
        let states = match self.sessions.get_mut(&id) {
            Some(session) if session.status == Status::Alive => {
                session.status = status;
                Arc::clone(&session.states)
            }
            _ => return,
        };
        self.watches.retain(|watch| watch.session != id);
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            // Ephemeral nodes have no children so this can't fail.
            let _ = self.delete(&path, events);
        }
        let job: Job = Box::new(move || states(ZkState::Closed));
        let _ = events.send(job);
    }

    /// Queue delivery of all watches on a path.
    fn trigger(&mut self, path: &str, change: Change, events: &Sender<Job>) {
        let (fired, pending): (Vec<PendingWatch>, Vec<PendingWatch>) = self
            .watches
            .drain(..)
            .partition(|watch| watch.path == path);
        self.watches = pending;
        for watch in fired {
            let path = watch.path;
            let watcher = watch.watcher;
            let job: Job = Box::new(move || {
                let event_type = match change {
                    Change::Children => WatchedEventType::NodeChildrenChanged,
                    Change::Deleted => WatchedEventType::NodeDeleted,
                };
                watcher(WatchedEvent {
                    event_type,
                    keeper_state: KeeperState::SyncConnected,
                    path: Some(path),
                });
            });
            let _ = events.send(job);
        }
    }
}

/// `Keeper` for a session on a `MockEnsemble`.
pub struct MockKeeper {
    id: u64,
    inner: Arc<EnsembleInner>,
}

impl MockKeeper {
    pub(super) fn new(id: u64, inner: Arc<EnsembleInner>) -> MockKeeper {
        MockKeeper { id, inner }
    }
}

impl Keeper for MockKeeper {
    fn create(&self, path: &str, data: Vec<u8>, kind: NodeKind) -> ZkResult<String> {
        let mut state = self.inner.lock();
        state.check(self.id)?;
        state.create(self.id, path, data, kind, &self.inner.events)
    }

    fn delete(&self, path: &str) -> ZkResult<()> {
        let mut state = self.inner.lock();
        state.check(self.id)?;
        state.delete(path, &self.inner.events)
    }

    fn exists(&self, path: &str) -> ZkResult<bool> {
        let mut state = self.inner.lock();
        state.check(self.id)?;
        Ok(state.nodes.contains_key(path))
    }

    fn get_data(&self, path: &str) -> ZkResult<Vec<u8>> {
        let mut state = self.inner.lock();
        state.check(self.id)?;
        state.data(path).ok_or(ZkError::NoNode)
    }

    fn set_data(&self, path: &str, data: Vec<u8>) -> ZkResult<()> {
        let mut state = self.inner.lock();
        state.check(self.id)?;
        let node = state.nodes.get_mut(path).ok_or(ZkError::NoNode)?;
        node.data = data;
        Ok(())
    }

    fn get_children(&self, path: &str) -> ZkResult<Vec<String>> {
        let mut state = self.inner.lock();
        state.check(self.id)?;
        state.children(path)
    }

    fn get_children_w(&self, path: &str, watcher: ChildWatcher) -> ZkResult<Vec<String>> {
        let mut state = self.inner.lock();
        state.check(self.id)?;
        let children = state.children(path)?;
        state.watches.push(PendingWatch {
            path: path.to_string(),
            session: self.id,
            watcher,
        });
        Ok(children)
    }

    fn close(&self) -> ZkResult<()> {
        let mut state = self.inner.lock();
        state.end_session(self.id, Status::Closed, &self.inner.events);
        Ok(())
    }
}

use std::sync::Arc;

use ::zookeeper::CreateMode;
use ::zookeeper::WatchedEvent;
use ::zookeeper::ZkResult;
use ::zookeeper::ZkState;

use super::config::ZookeeperConfig;

pub mod zookeeper;

/// Callback invoked with every session state change reported by a `Keeper`.
pub type StateCallback = Arc<dyn Fn(ZkState) + Send + Sync>;

/// One-shot children watch installed with `Keeper::get_children_w`.
pub type ChildWatcher = Box<dyn Fn(WatchedEvent) + Send + Sync>;

/// Kinds of znodes that can be created.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum NodeKind {
    Persistent,
    PersistentSequential,
    Ephemeral,
    EphemeralSequential,
}

impl NodeKind {
    pub fn new(ephemeral: bool, sequential: bool) -> NodeKind {
        match (ephemeral, sequential) {
            (false, false) => NodeKind::Persistent,
            (false, true) => NodeKind::PersistentSequential,
            (true, false) => NodeKind::Ephemeral,
            (true, true) => NodeKind::EphemeralSequential,
        }
    }

    pub fn is_ephemeral(self) -> bool {
        matches!(self, NodeKind::Ephemeral | NodeKind::EphemeralSequential)
    }

    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            NodeKind::PersistentSequential | NodeKind::EphemeralSequential
        )
    }

    pub fn mode(self) -> CreateMode {
        match self {
            NodeKind::Persistent => CreateMode::Persistent,
            NodeKind::PersistentSequential => CreateMode::PersistentSequential,
            NodeKind::Ephemeral => CreateMode::Ephemeral,
            NodeKind::EphemeralSequential => CreateMode::EphemeralSequential,
        }
    }
}

/// Operations the client needs from a single zookeeper session.
///
/// Errors are reported as raw `ZkError`s so the client can decide which ones to absorb.
pub trait Keeper: Send + Sync {
    /// Create a znode and return the path the ensemble assigned to it.
    fn create(&self, path: &str, data: Vec<u8>, kind: NodeKind) -> ZkResult<String>;

    /// Delete a znode regardless of its version.
    fn delete(&self, path: &str) -> ZkResult<()>;

    /// Check if a znode exists.
    fn exists(&self, path: &str) -> ZkResult<bool>;

    /// Fetch the data stored in a znode.
    fn get_data(&self, path: &str) -> ZkResult<Vec<u8>>;

    /// Replace the data stored in a znode regardless of its version.
    fn set_data(&self, path: &str, data: Vec<u8>) -> ZkResult<()>;

    /// List the direct children of a znode.
    fn get_children(&self, path: &str) -> ZkResult<Vec<String>>;

    /// List the direct children of a znode and watch them for changes.
    ///
    /// The watcher is invoked at most once; no watch is set if the znode does not exist.
    fn get_children_w(&self, path: &str, watcher: ChildWatcher) -> ZkResult<Vec<String>>;

    /// Terminate the session.
    fn close(&self) -> ZkResult<()>;
}

/// Create new sessions with the ensemble.
pub trait Connector: Send + Sync {
    /// Start a new session that reports its state changes to the given callback.
    fn connect(&self, config: &ZookeeperConfig, states: StateCallback)
        -> ZkResult<Arc<dyn Keeper>>;
}

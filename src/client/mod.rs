use std::sync::Arc;

use failure::ResultExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use slog::debug;
use slog::Logger;
use zookeeper::ZkError;

use super::backend::zookeeper::ZookeeperConnector;
use super::backend::Connector;
use super::backend::NodeKind;
use super::config::ZookeeperConfig;
use super::path;
use super::serializer::JsonSerializer;
use super::serializer::Serializer;
use super::ChildListener;
use super::ErrorKind;
use super::Result;
use super::StateListener;

mod callback;
mod session;
mod state;
mod watch;


use self::session::Session;

/// Uniform interface to a zookeeper ensemble.
///
/// Calls are synchronous and share a single session.
/// Sessions expired by the ensemble are replaced in the background and
/// children watches are restored on the new session.
/// Typed payloads are encoded with the configured `Serializer` while `*_raw`
/// methods store and return bytes verbatim.
///
/// Errors are reported as follows:
///
///   * Creating a non-sequential node that already exists succeeds and returns the path.
///   * Deleting a node that does not exist succeeds.
///   * Listing children of a node that does not exist returns `None`.
///   * Any other failure is a coordination failure (see `Error::is_coordination_failure`).
pub struct ZookeeperClient<S: Serializer = JsonSerializer> {
    logger: Logger,
    serializer: S,
    session: Arc<Session>,
}

impl ZookeeperClient<JsonSerializer> {
    /// Create a client storing typed payloads as JSON.
    pub fn new(config: ZookeeperConfig, logger: Logger) -> Result<ZookeeperClient> {
        ZookeeperClient::with_serializer(config, JsonSerializer, logger)
    }

    /// Create a client for the given ensemble connection string with default options.
    pub fn connect(ensemble: &str, logger: Logger) -> Result<ZookeeperClient> {
        ZookeeperClient::new(ZookeeperConfig::with_ensemble(ensemble), logger)
    }
}

impl<S: Serializer> ZookeeperClient<S> {
    /// Create a client with a custom payload serializer.
    pub fn with_serializer(
        config: ZookeeperConfig,
        serializer: S,
        logger: Logger,
    ) -> Result<ZookeeperClient<S>> {
        let connector = ZookeeperConnector::new(logger.clone());
        ZookeeperClient::with_connector(config, Box::new(connector), serializer, logger)
    }

    /// Internal method to create a client on top of any session `Connector`.
    pub(crate) fn with_connector(
        config: ZookeeperConfig,
        connector: Box<dyn Connector>,
        serializer: S,
        logger: Logger,
    ) -> Result<ZookeeperClient<S>> {
        let session = Session::new(config, connector, logger.clone())?;
        Ok(ZookeeperClient {
            logger,
            serializer,
            session,
        })
    }
}

impl<S: Serializer> ZookeeperClient<S> {
    /// Create an empty persistent node.
    ///
    /// Sequential nodes are always created and their assigned path is returned.
    pub fn create_persistent(&self, path: &str, sequential: bool) -> Result<String> {
        self.create_node(path, Vec::new(), NodeKind::new(false, sequential))
    }

    /// Create a persistent node storing a typed payload.
    ///
    /// If a non-sequential node already exists its data is left untouched.
    pub fn create_persistent_data<T>(&self, path: &str, data: &T, sequential: bool) -> Result<String>
    where
        T: Serialize + ?Sized,
    {
        let data = self.serializer.serialize(data)?;
        self.create_node(path, data, NodeKind::new(false, sequential))
    }

    /// Create a persistent node storing raw bytes.
    pub fn create_persistent_raw(&self, path: &str, data: Vec<u8>, sequential: bool) -> Result<String> {
        self.create_node(path, data, NodeKind::new(false, sequential))
    }

    /// Create an empty ephemeral node owned by the current session.
    pub fn create_ephemeral(&self, path: &str, sequential: bool) -> Result<String> {
        self.create_node(path, Vec::new(), NodeKind::new(true, sequential))
    }

    /// Create an ephemeral node storing a typed payload.
    pub fn create_ephemeral_data<T>(&self, path: &str, data: &T, sequential: bool) -> Result<String>
    where
        T: Serialize + ?Sized,
    {
        let data = self.serializer.serialize(data)?;
        self.create_node(path, data, NodeKind::new(true, sequential))
    }

    /// Create an ephemeral node storing raw bytes.
    pub fn create_ephemeral_raw(&self, path: &str, data: Vec<u8>, sequential: bool) -> Result<String> {
        self.create_node(path, data, NodeKind::new(true, sequential))
    }

    /// Create an empty node along with any missing ancestor.
    ///
    /// Ancestors are always created as empty persistent nodes.
    pub fn create(&self, path: &str, ephemeral: bool, sequential: bool) -> Result<String> {
        self.create_ancestors(path)?;
        self.create_node(path, Vec::new(), NodeKind::new(ephemeral, sequential))
    }

    /// Create a node storing a typed payload along with any missing ancestor.
    pub fn create_data<T>(
        &self,
        path: &str,
        data: &T,
        ephemeral: bool,
        sequential: bool,
    ) -> Result<String>
    where
        T: Serialize + ?Sized,
    {
        let data = self.serializer.serialize(data)?;
        self.create_ancestors(path)?;
        self.create_node(path, data, NodeKind::new(ephemeral, sequential))
    }

    /// Delete a node, succeeding if the node does not exist.
    pub fn delete(&self, path: &str) -> Result<bool> {
        let keeper = self.session.get()?;
        match keeper.delete(path) {
            Ok(()) => Ok(true),
            Err(ZkError::NoNode) => {
                debug!(self.logger, "Node to delete does not exist"; "path" => path);
                Ok(true)
            }
            Err(error) => Err(error).context(ErrorKind::Backend("node deletion"))?,
        }
    }

    /// Check if a node exists.
    pub fn exists(&self, path: &str) -> Result<bool> {
        let keeper = self.session.get()?;
        let exists = keeper
            .exists(path)
            .context(ErrorKind::Backend("node lookup"))?;
        Ok(exists)
    }

    /// Fetch and decode the typed payload of a node.
    pub fn get_data<T>(&self, path: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let data = self.get_data_raw(path)?;
        self.serializer.deserialize(&data)
    }

    /// Fetch the bytes stored in a node.
    pub fn get_data_raw(&self, path: &str) -> Result<Vec<u8>> {
        let keeper = self.session.get()?;
        let data = keeper
            .get_data(path)
            .context(ErrorKind::Backend("node read"))?;
        Ok(data)
    }

    /// Encode and store a typed payload in an existing node.
    pub fn set_data<T>(&self, path: &str, data: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let data = self.serializer.serialize(data)?;
        self.set_data_raw(path, data)
    }

    /// Store bytes verbatim in an existing node.
    pub fn set_data_raw(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let keeper = self.session.get()?;
        keeper
            .set_data(path, data)
            .context(ErrorKind::Backend("node write"))?;
        Ok(())
    }

    /// List the names of the direct children of a node.
    ///
    /// Returns `None` if the node does not exist, which is distinct from a node without children.
    pub fn get_children(&self, path: &str) -> Result<Option<Vec<String>>> {
        let keeper = self.session.get()?;
        match keeper.get_children(path) {
            Ok(children) => Ok(Some(children)),
            Err(ZkError::NoNode) => Ok(None),
            Err(error) => Err(error).context(ErrorKind::Backend("children lookup"))?,
        }
    }

    /// Lightweight check of the session connectivity.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Terminate the session.
    ///
    /// Ephemeral nodes owned by the session are removed by the ensemble,
    /// listeners are detached and all further operations fail.
    pub fn close(&self) {
        self.session.close();
    }
}

impl<S: Serializer> ZookeeperClient<S> {
    /// Watch the children of a path and return the current children.
    ///
    /// The listener is invoked with a new snapshot of the children every time they change,
    /// until it is removed. Adding the same listener to the same path again
    /// does not register a second remote watch.
    ///
    /// Returns `None` if the path does not exist: the listener stays registered
    /// but is not notified until the subscription is renewed, for example by
    /// adding the listener again.
    pub fn add_child_listener(
        &self,
        path: &str,
        listener: Arc<dyn ChildListener>,
    ) -> Result<Option<Vec<String>>> {
        self.session.add_child_listener(path, listener)
    }

    /// Stop notifying a listener about children of a path.
    ///
    /// One event already in flight may still be delivered.
    pub fn remove_child_listener(&self, path: &str, listener: &Arc<dyn ChildListener>) {
        self.session.remove_child_listener(path, listener)
    }

    /// Receive connection state events.
    pub fn add_state_listener(&self, listener: Arc<dyn StateListener>) {
        self.session.add_state_listener(listener)
    }

    pub fn remove_state_listener(&self, listener: &Arc<dyn StateListener>) {
        self.session.remove_state_listener(listener)
    }
}

impl<S: Serializer> ZookeeperClient<S> {
    /// Create any missing ancestor of a path as an empty persistent node.
    fn create_ancestors(&self, path: &str) -> Result<()> {
        for ancestor in path::ancestors(path) {
            if !self.exists(ancestor)? {
                self.create_node(ancestor, Vec::new(), NodeKind::Persistent)?;
            }
        }
        Ok(())
    }

    fn create_node(&self, path: &str, data: Vec<u8>, kind: NodeKind) -> Result<String> {
        let keeper = self.session.get()?;
        match keeper.create(path, data, kind) {
            Ok(created) => Ok(created),
            Err(ZkError::NodeExists) if !kind.is_sequential() => {
                debug!(self.logger, "Node to create already exists"; "path" => path);
                Ok(path.to_string())
            }
            Err(error) => Err(error).context(ErrorKind::Backend("node creation"))?,
        }
    }
}

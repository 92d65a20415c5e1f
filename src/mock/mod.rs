use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::bounded;
use crossbeam_channel::unbounded;
use crossbeam_channel::Sender;
use humthreads::Builder;
use slog::Logger;
use zookeeper::ZkError;
use zookeeper::ZkResult;
use zookeeper::ZkState;

use super::backend::Connector;
use super::backend::Keeper;
use super::backend::StateCallback;
use super::config::ZookeeperConfig;
use super::serializer::JsonSerializer;
use super::serializer::Serializer;
use super::Result;
use super::ZookeeperClient;

mod ensemble;

use self::ensemble::EnsembleState;
use self::ensemble::MockKeeper;

/// Work queued for the mock event thread.
type Job = Box<dyn FnOnce() + Send>;

/// In-memory zookeeper ensemble to test code using `ZookeeperClient`s.
///
/// Watches and session state changes are delivered on a background thread,
/// in the order they are generated, like the real client library does.
#[derive(Clone)]
pub struct MockEnsemble {
    inner: Arc<EnsembleInner>,
}

impl MockEnsemble {
    pub fn new() -> MockEnsemble {
        let (sender, receiver) = unbounded::<Job>();
        // The thread exits once every handle to the ensemble is dropped.
        Builder::new("r:zk:mock-events")
            .full_name("replicore:util:zookeeper:mock-events")
            .spawn(move |scope| {
                scope.activity("delivering mock zookeeper events");
                for job in receiver.iter() {
                    job();
                }
            })
            .expect("unable to spawn mock zookeeper event thread");
        let inner = EnsembleInner {
            events: sender,
            state: Mutex::new(EnsembleState::new()),
        };
        MockEnsemble {
            inner: Arc::new(inner),
        }
    }

    /// Create a client connected to this ensemble.
    pub fn client(&self, logger: Logger) -> Result<ZookeeperClient> {
        self.client_with(ZookeeperConfig::with_ensemble("mock:2181"), JsonSerializer, logger)
    }

    /// Create a client with custom options connected to this ensemble.
    pub fn client_with<S: Serializer>(
        &self,
        config: ZookeeperConfig,
        serializer: S,
        logger: Logger,
    ) -> Result<ZookeeperClient<S>> {
        let connector = MockConnector {
            inner: Arc::clone(&self.inner),
        };
        ZookeeperClient::with_connector(config, Box::new(connector), serializer, logger)
    }
}

impl MockEnsemble {
    /// Return the bytes stored in a node, if it exists.
    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.lock().data(path)
    }

    /// Drop connections for all sessions without expiring them.
    pub fn disconnect(&self) {
        self.inner.lock().broadcast(&self.inner.events, ZkState::Connecting);
    }

    /// Expire all live sessions, removing their ephemeral nodes.
    pub fn expire_sessions(&self) {
        self.inner.lock().expire_all(&self.inner.events);
    }

    /// Fail the next operation performed by any session with the given error.
    pub fn fail_next(&self, error: ZkError) {
        self.inner.lock().fail_next(error);
    }

    /// Check if the node was created as an ephemeral node.
    pub fn is_ephemeral(&self, path: &str) -> bool {
        self.inner.lock().is_ephemeral(path)
    }

    /// Restore connections dropped with `disconnect`.
    pub fn reconnect(&self) {
        self.inner.lock().broadcast(&self.inner.events, ZkState::Connected);
    }

    /// Make new session requests fail (or succeed again).
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.lock().refuse_connections = refuse;
    }

    /// Wait for all watch and state events queued so far to be delivered.
    pub fn sync(&self) {
        let (sender, receiver) = bounded(1);
        let job: Job = Box::new(move || {
            let _ = sender.send(());
        });
        self.inner
            .events
            .send(job)
            .expect("mock zookeeper event thread is gone");
        receiver
            .recv_timeout(Duration::from_secs(10))
            .expect("mock zookeeper events not delivered in time");
    }
}

impl Default for MockEnsemble {
    fn default() -> MockEnsemble {
        MockEnsemble::new()
    }
}

/// Shared ensemble data and event queue.
struct EnsembleInner {
    events: Sender<Job>,
    state: Mutex<EnsembleState>,
}

impl EnsembleInner {
    fn lock(&self) -> ::std::sync::MutexGuard<EnsembleState> {
        self.state.lock().expect("MockEnsemble state lock poisoned")
    }
}

/// Open sessions on a `MockEnsemble`.
struct MockConnector {
    inner: Arc<EnsembleInner>,
}

impl Connector for MockConnector {
    fn connect(
        &self,
        _config: &ZookeeperConfig,
        states: StateCallback,
    ) -> ZkResult<Arc<dyn Keeper>> {
        let mut state = self.inner.lock();
        if state.refuse_connections {
            return Err(ZkError::ConnectionLoss);
        }
        let id = state.open_session(Arc::clone(&states));
        let job: Job = Box::new(move || states(ZkState::Connected));
        let _ = self.inner.events.send(job);
        Ok(Arc::new(MockKeeper::new(id, Arc::clone(&self.inner))))
    }
}

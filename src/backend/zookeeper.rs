use std::sync::Arc;

use slog::debug;
use slog::Logger;
use zookeeper::Acl;
use zookeeper::KeeperState;
use zookeeper::WatchedEvent;
use zookeeper::WatchedEventType;
use zookeeper::ZkError;
use zookeeper::ZkResult;
use zookeeper::ZkState;
use zookeeper::ZooKeeper;

use super::super::config::ZookeeperConfig;
use super::super::metrics::ZOO_OP_DURATION;
use super::super::metrics::ZOO_OP_ERRORS_COUNT;
use super::super::metrics::ZOO_TIMEOUTS_COUNT;
use super::ChildWatcher;
use super::Connector;
use super::Keeper;
use super::NodeKind;
use super::StateCallback;

/// Time a zookeeper operation and track failures.
///
/// `NoNode` and `NodeExists` are expected by the client and are not counted as errors.
fn observe<T, F>(operation: &'static str, block: F) -> ZkResult<T>
where
    F: FnOnce() -> ZkResult<T>,
{
    let timer = ZOO_OP_DURATION
        .with_label_values(&[operation])
        .start_timer();
    let result = block();
    timer.observe_duration();
    match &result {
        Err(ZkError::NoNode) | Err(ZkError::NodeExists) | Ok(_) => (),
        Err(error) => {
            ZOO_OP_ERRORS_COUNT.with_label_values(&[operation]).inc();
            if let ZkError::OperationTimeout = error {
                ZOO_TIMEOUTS_COUNT.inc();
            }
        }
    };
    result
}

/// Open sessions with the `zookeeper` crate.
pub struct ZookeeperConnector {
    logger: Logger,
}

impl ZookeeperConnector {
    pub fn new(logger: Logger) -> ZookeeperConnector {
        ZookeeperConnector { logger }
    }
}

impl Connector for ZookeeperConnector {
    fn connect(
        &self,
        config: &ZookeeperConfig,
        states: StateCallback,
    ) -> ZkResult<Arc<dyn Keeper>> {
        debug!(self.logger, "Connecting to zookeeper"; "ensemble" => &config.ensemble);

        // The session watcher sees the first connection even if it happens before
        // the state listener below is attached.
        let first_connect = Arc::clone(&states);
        let keeper = ZooKeeper::connect(
            &config.ensemble,
            config.timeout(),
            move |event: WatchedEvent| {
                let connected = matches!(event.event_type, WatchedEventType::None)
                    && matches!(event.keeper_state, KeeperState::SyncConnected);
                if connected {
                    first_connect(ZkState::Connected);
                }
            },
        )?;
        let _subscription = keeper.add_listener(move |state| states(state));
        Ok(Arc::new(ZookeeperKeeper { keeper }))
    }
}

/// `Keeper` backed by a `zookeeper::ZooKeeper` session.
struct ZookeeperKeeper {
    keeper: ZooKeeper,
}

impl Keeper for ZookeeperKeeper {
    fn create(&self, path: &str, data: Vec<u8>, kind: NodeKind) -> ZkResult<String> {
        observe("create", || {
            self.keeper
                .create(path, data, Acl::open_unsafe().clone(), kind.mode())
        })
    }

    fn delete(&self, path: &str) -> ZkResult<()> {
        observe("delete", || self.keeper.delete(path, None))
    }

    fn exists(&self, path: &str) -> ZkResult<bool> {
        observe("exists", || self.keeper.exists(path, false)).map(|stat| stat.is_some())
    }

    fn get_data(&self, path: &str) -> ZkResult<Vec<u8>> {
        observe("get_data", || self.keeper.get_data(path, false)).map(|(data, _)| data)
    }

    fn set_data(&self, path: &str, data: Vec<u8>) -> ZkResult<()> {
        observe("set_data", || self.keeper.set_data(path, data, None)).map(|_| ())
    }

    fn get_children(&self, path: &str) -> ZkResult<Vec<String>> {
        observe("get_children", || self.keeper.get_children(path, false))
    }

    fn get_children_w(&self, path: &str, watcher: ChildWatcher) -> ZkResult<Vec<String>> {
        observe("get_children_w", || {
            self.keeper
                .get_children_w(path, move |event| watcher(event))
        })
    }

    fn close(&self) -> ZkResult<()> {
        observe("close", || self.keeper.close())
    }
}

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::Weak;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::bounded;
use crossbeam_channel::select;
use crossbeam_channel::unbounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use failure::ResultExt;
use humthreads::Builder;
use humthreads::Thread;
use humthreads::ThreadScope;
use slog::debug;
use slog::error;
use slog::info;
use slog::warn;
use slog::Logger;
use zookeeper::ZkResult;
use zookeeper::ZkState;

use super::super::backend::Connector;
use super::super::backend::Keeper;
use super::super::backend::StateCallback;
use super::super::config::ZookeeperConfig;
use super::super::error::failure_chain;
use super::super::metrics::ZOO_CONNECTION_COUNT;
use super::super::ChildListener;
use super::super::ErrorKind;
use super::super::Result;
use super::super::StateListener;
use super::callback;
use super::state::StateFanout;
use super::watch::ChildWatch;

/// Owner of the current zookeeper session and of all listener registries.
///
/// Sessions closed by the ensemble are replaced in the background, retrying every
/// `retry_interval` until a new session is established. Requests made while the
/// session is gone attempt the replacement themselves.
/// Every active children watch is registered again on the new session.
pub struct Session {
    config: ZookeeperConfig,
    connector: Box<dyn Connector>,
    fanout: Arc<StateFanout>,
    logger: Logger,
    replacer: Mutex<Option<Thread<()>>>,
    requests: Sender<u64>,
    shutdown: Mutex<Option<Sender<()>>>,
    slot: Mutex<SessionSlot>,
    watches: Mutex<BTreeMap<String, Vec<Arc<ChildWatch>>>>,
}

impl Session {
    pub fn new(
        config: ZookeeperConfig,
        connector: Box<dyn Connector>,
        logger: Logger,
    ) -> Result<Arc<Session>> {
        let fanout = Arc::new(StateFanout::new(logger.clone())?);
        let (requests, expired) = unbounded();
        let (shutdown, shutdown_signal) = bounded(0);
        let retry_interval = config.retry_interval();
        let session = Arc::new(Session {
            config,
            connector,
            fanout,
            logger,
            replacer: Mutex::new(None),
            requests,
            shutdown: Mutex::new(Some(shutdown)),
            slot: Mutex::new(SessionSlot {
                closed: false,
                current: None,
                generation: 0,
                last_failure: None,
            }),
            watches: Mutex::new(BTreeMap::new()),
        });
        let current = session.new_keeper(0).context(ErrorKind::Connect)?;
        session.lock_slot().current = Some(current);

        let replacer = {
            let logger = session.logger.clone();
            let session = Arc::downgrade(&session);
            Builder::new("r:zk:session")
                .full_name("replicore:util:zookeeper:session-replacer")
                .spawn(move |scope| {
                    callback::mark_thread();
                    let replacer = Replacer {
                        expired,
                        logger,
                        retry_interval,
                        session,
                        shutdown: shutdown_signal,
                    };
                    replacer.run(&scope);
                })
                .with_context(|_| ErrorKind::SpawnThread("zookeeper session replacer"))?
        };
        *session
            .replacer
            .lock()
            .expect("session replacer lock poisoned") = Some(replacer);
        Ok(session)
    }

    /// Return the current zookeeper session or replace an expired one.
    pub fn get(&self) -> Result<Arc<dyn Keeper>> {
        let slot = self.lock_slot();
        if slot.closed {
            return Err(ErrorKind::Closed.into());
        }
        if let Some(current) = slot.current.as_ref() {
            if current.active() {
                return Ok(current.client());
            }
        }
        if let Some(failed) = slot.last_failure {
            if failed.elapsed() < self.config.retry_interval() {
                return Err(ErrorKind::Backend("session replacement").into());
            }
        }
        self.renew(slot)
    }

    /// Check if the session is believed to be connected.
    pub fn is_connected(&self) -> bool {
        let slot = self.lock_slot();
        let active = match slot.current.as_ref() {
            None => false,
            Some(current) => current.active(),
        };
        !slot.closed && active && self.fanout.is_connected()
    }

    /// Terminate the session and stop all listeners.
    pub fn close(&self) {
        let current = {
            let mut slot = self.lock_slot();
            if slot.closed {
                return;
            }
            slot.closed = true;
            slot.current.take()
        };
        info!(self.logger, "Closing zookeeper session");
        let watches = std::mem::take(&mut *self.lock_watches());
        for watch in watches.into_values().flatten() {
            watch.unwatch();
        }
        drop(
            self.shutdown
                .lock()
                .expect("session shutdown lock poisoned")
                .take(),
        );
        self.fanout.close();
        if let Some(current) = current {
            if let Err(error) = current.keeper.close() {
                warn!(self.logger, "Failed to close zookeeper session"; "error" => %error);
            }
        }

        let replacer = self
            .replacer
            .lock()
            .expect("session replacer lock poisoned")
            .take();
        if let Some(replacer) = replacer {
            if callback::active() {
                return;
            }
            if replacer.join().is_err() {
                error!(self.logger, "Zookeeper session replacer thread paniced");
            }
        }
    }
}

impl Session {
    /// Attach a listener to the children of a path and return the current children.
    pub fn add_child_listener(
        self: &Arc<Self>,
        path: &str,
        listener: Arc<dyn ChildListener>,
    ) -> Result<Option<Vec<String>>> {
        let keeper = self.get()?;
        let watch = {
            let mut watches = self.lock_watches();
            let registered = watches.entry(path.to_string()).or_insert_with(Vec::new);
            let known = registered
                .iter()
                .find(|watch| watch.is_for(&listener))
                .map(Arc::clone);
            match known {
                Some(watch) => watch,
                None => {
                    let watch = Arc::new(ChildWatch::new(
                        path.to_string(),
                        listener,
                        Arc::downgrade(self),
                        self.logger.clone(),
                    ));
                    registered.push(Arc::clone(&watch));
                    watch
                }
            }
        };
        let children = watch
            .watch(keeper.as_ref())
            .context(ErrorKind::Backend("children watch"))?;
        Ok(children)
    }

    /// Detach a listener from the children of a path.
    pub fn remove_child_listener(&self, path: &str, listener: &Arc<dyn ChildListener>) {
        let mut watches = self.lock_watches();
        let empty = match watches.get_mut(path) {
            None => return,
            Some(registered) => {
                registered.retain(|watch| {
                    if watch.is_for(listener) {
                        watch.unwatch();
                        return false;
                    }
                    true
                });
                registered.is_empty()
            }
        };
        if empty {
            watches.remove(path);
        }
    }

    pub fn add_state_listener(&self, listener: Arc<dyn StateListener>) {
        self.fanout.add(listener);
    }

    pub fn remove_state_listener(&self, listener: &Arc<dyn StateListener>) {
        self.fanout.remove(listener);
    }
}

impl Session {
    fn lock_slot(&self) -> MutexGuard<SessionSlot> {
        self.slot.lock().expect("zookeeper session lock poisoned")
    }

    fn lock_watches(&self) -> MutexGuard<BTreeMap<String, Vec<Arc<ChildWatch>>>> {
        self.watches.lock().expect("children watches lock poisoned")
    }

    /// Return a new zookeeper session that will clear itself when closed.
    fn new_keeper(&self, generation: u64) -> ZkResult<CurrentKeeper> {
        info!(
            self.logger, "Initiating new zookeeper session";
            "ensemble" => &self.config.ensemble, "generation" => generation,
        );
        self.fanout.begin(generation);

        let active = Arc::new(AtomicBool::new(true));
        let notify_close = Arc::clone(&active);
        let fanout = Arc::clone(&self.fanout);
        let requests = self.requests.clone();
        let states: StateCallback = Arc::new(move |state: ZkState| {
            let closed = matches!(state, ZkState::Closed);
            // The loss must be tracked before a replacement session can begin.
            fanout.observe(generation, state);
            if closed {
                notify_close.store(false, Ordering::SeqCst);
                let _ = requests.send(generation);
            }
        });
        let keeper = self.connector.connect(&self.config, states)?;
        ZOO_CONNECTION_COUNT.inc();
        Ok(CurrentKeeper { active, keeper })
    }

    /// Register all live children watches with a new session.
    ///
    /// Listeners receive the current children as changes may have been missed.
    fn rearm_watches(&self, keeper: &dyn Keeper) {
        let watches: Vec<Arc<ChildWatch>> = self
            .lock_watches()
            .values()
            .flat_map(|watches| watches.iter().cloned())
            .collect();
        if watches.is_empty() {
            return;
        }
        info!(
            self.logger, "Registering children watches with new zookeeper session";
            "watches" => watches.len(),
        );
        for watch in watches {
            watch.disarm();
            if watch.is_live() {
                watch.refresh(keeper);
            }
        }
    }

    /// Replace the session held by the slot with a new one.
    fn renew(&self, mut slot: MutexGuard<SessionSlot>) -> Result<Arc<dyn Keeper>> {
        let stale = slot.current.take();
        slot.generation += 1;
        let renewed = match self.new_keeper(slot.generation) {
            Ok(current) => {
                slot.last_failure = None;
                let keeper = current.client();
                slot.current = Some(current);
                Ok(keeper)
            }
            Err(error) => {
                slot.last_failure = Some(Instant::now());
                Err(error)
            }
        };
        drop(slot);

        if let Some(stale) = stale {
            if let Err(error) = stale.keeper.close() {
                debug!(self.logger, "Failed to close expired zookeeper session"; "error" => %error);
            }
        }
        let keeper = renewed.context(ErrorKind::Backend("session replacement"))?;
        self.rearm_watches(keeper.as_ref());
        Ok(keeper)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Background replacement of sessions closed by the ensemble.
struct Replacer {
    expired: Receiver<u64>,
    logger: Logger,
    retry_interval: Duration,
    session: Weak<Session>,
    shutdown: Receiver<()>,
}

impl Replacer {
    fn run(&self, scope: &ThreadScope) {
        loop {
            scope.activity("waiting for expired zookeeper sessions");
            let generation = select! {
                recv(self.shutdown) -> _ => return,
                recv(self.expired) -> generation => match generation {
                    Ok(generation) => generation,
                    Err(_) => return,
                },
            };
            scope.activity("replacing expired zookeeper session");
            if !self.replace(generation) {
                return;
            }
        }
    }

    /// Attempt to replace the session until it succeeds.
    ///
    /// Returns `false` once the session is closed or dropped.
    fn replace(&self, generation: u64) -> bool {
        loop {
            let session = match self.session.upgrade() {
                Some(session) => session,
                None => return false,
            };
            match session.get() {
                Ok(_) => return true,
                Err(error) if error.kind() == ErrorKind::Closed => return false,
                Err(error) => warn!(
                    self.logger, "Failed to replace expired zookeeper session";
                    "generation" => generation, "error" => failure_chain(&error),
                ),
            };
            drop(session);
            select! {
                recv(self.shutdown) -> _ => return false,
                default(self.retry_interval) => (),
            };
        }
    }
}

/// Mutable session state.
struct SessionSlot {
    closed: bool,
    current: Option<CurrentKeeper>,
    generation: u64,
    last_failure: Option<Instant>,
}

/// Holder of the current zookeeper session with its `active` flag.
struct CurrentKeeper {
    active: Arc<AtomicBool>,
    keeper: Arc<dyn Keeper>,
}

impl CurrentKeeper {
    fn active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn client(&self) -> Arc<dyn Keeper> {
        Arc::clone(&self.keeper)
    }
}

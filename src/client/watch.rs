use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

use slog::debug;
use slog::error;
use slog::warn;
use slog::Logger;
use zookeeper::WatchedEvent;
use zookeeper::ZkError;
use zookeeper::ZkResult;

use super::super::backend::ChildWatcher;
use super::super::backend::Keeper;
use super::super::error::failure_chain;
use super::super::metrics::ZOO_LISTENER_PANICS;
use super::super::metrics::ZOO_WATCH_FIRED;
use super::super::metrics::ZOO_WATCH_LOST;
use super::super::ChildListener;
use super::callback;
use super::session::Session;

/// Bridge between one-shot zookeeper children watches and a `ChildListener`.
///
/// Each (path, listener) subscription owns exactly one `ChildWatch`.
/// When the remote watch fires the same `ChildWatch` is registered again
/// before the listener sees the new children, so changes keep flowing.
///
/// Snapshots are fetched and delivered while holding `delivery`, so the listener
/// sees one call at a time and never an older snapshot after a newer one.
///
/// Removing the listener does not remove the remote watch: the next event
/// is dropped and the watch is not renewed.
pub struct ChildWatch {
    /// Set while a remote watch for this subscription is pending.
    armed: AtomicBool,
    delivery: Mutex<()>,
    /// Set if the znode existed at the last lookup.
    found: AtomicBool,
    listener: Mutex<Option<Arc<dyn ChildListener>>>,
    logger: Logger,
    path: String,
    session: Weak<Session>,
}

impl ChildWatch {
    pub fn new(
        path: String,
        listener: Arc<dyn ChildListener>,
        session: Weak<Session>,
        logger: Logger,
    ) -> ChildWatch {
        ChildWatch {
            armed: AtomicBool::new(false),
            delivery: Mutex::new(()),
            found: AtomicBool::new(false),
            listener: Mutex::new(Some(listener)),
            logger,
            path,
            session,
        }
    }

    /// Forget any pending remote watch, such as when its session is replaced.
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    /// Check if this watch delivers to the given listener.
    pub fn is_for(&self, listener: &Arc<dyn ChildListener>) -> bool {
        match self.listener().as_ref() {
            None => false,
            Some(known) => Arc::ptr_eq(known, listener),
        }
    }

    /// Check if the subscription should be restored on a new session.
    ///
    /// Subscriptions to znodes that were missing at the last lookup are only
    /// renewed by adding the listener again.
    pub fn is_live(&self) -> bool {
        self.found.load(Ordering::SeqCst) && self.listener().is_some()
    }

    /// Stop delivering events to the listener.
    pub fn unwatch(&self) {
        self.listener
            .lock()
            .expect("child watch listener lock poisoned")
            .take();
    }

    /// Ensure a remote watch is pending and return the current children.
    ///
    /// `None` is returned when the znode does not exist, in which case no watch is set.
    pub fn watch(self: &Arc<Self>, keeper: &dyn Keeper) -> ZkResult<Option<Vec<String>>> {
        let children = if self.armed.swap(true, Ordering::SeqCst) {
            keeper.get_children(&self.path)
        } else {
            let watch = Arc::clone(self);
            let watcher: ChildWatcher = Box::new(move |event| ChildWatch::fire(&watch, event));
            let children = keeper.get_children_w(&self.path, watcher);
            if children.is_err() {
                self.disarm();
            }
            children
        };
        match children {
            Ok(children) => {
                self.found.store(true, Ordering::SeqCst);
                Ok(Some(children))
            }
            Err(ZkError::NoNode) => {
                self.found.store(false, Ordering::SeqCst);
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Re-register the watch and deliver the current children to the listener.
    ///
    /// A znode deleted while the watch was being renewed results in a final
    /// notification with no children and the watch is not renewed.
    pub fn refresh(self: &Arc<Self>, keeper: &dyn Keeper) {
        let _delivery = self
            .delivery
            .lock()
            .expect("child watch delivery lock poisoned");
        match self.watch(keeper) {
            Ok(Some(children)) => {
                debug!(self.logger, "Refreshed children watch"; "path" => &self.path);
                self.notify(children);
            }
            Ok(None) => {
                ZOO_WATCH_LOST.inc();
                warn!(self.logger, "Watched znode was deleted"; "path" => &self.path);
                self.notify(Vec::new());
            }
            Err(error) => {
                ZOO_WATCH_LOST.inc();
                error!(
                    self.logger, "Failed to re-register children watch";
                    "path" => &self.path, "error" => %error,
                );
            }
        };
    }
}

impl ChildWatch {
    /// Handle a zookeeper watch event.
    fn fire(watch: &Arc<ChildWatch>, event: WatchedEvent) {
        watch.disarm();
        ZOO_WATCH_FIRED.inc();
        if watch.listener().is_none() {
            debug!(
                watch.logger, "Dropping children event for removed listener";
                "path" => &watch.path,
            );
            return;
        }
        let session = match watch.session.upgrade() {
            Some(session) => session,
            None => return,
        };
        debug!(
            watch.logger, "Children watch triggered";
            "path" => &watch.path, "event" => ?event.event_type,
        );
        let keeper = match session.get() {
            Ok(keeper) => keeper,
            Err(error) => {
                ZOO_WATCH_LOST.inc();
                error!(
                    watch.logger, "Children watch lost without a zookeeper session";
                    "path" => &watch.path, "error" => failure_chain(&error),
                );
                return;
            }
        };
        watch.refresh(keeper.as_ref());
    }

    fn listener(&self) -> Option<Arc<dyn ChildListener>> {
        self.listener
            .lock()
            .expect("child watch listener lock poisoned")
            .clone()
    }

    /// Invoke the listener, if still attached, isolating panics.
    fn notify(&self, children: Vec<String>) {
        let listener = match self.listener() {
            Some(listener) => listener,
            None => return,
        };
        let path = self.path.as_str();
        let result = callback::run(|| {
            catch_unwind(AssertUnwindSafe(|| listener.child_changed(path, children)))
        });
        if result.is_err() {
            ZOO_LISTENER_PANICS.inc();
            error!(self.logger, "Child listener paniced"; "path" => path);
        }
    }
}

//! Store definition and lifecycle.

use std::fmt::{self, Debug};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::getters::{Getters, GettersLayer, NoGetters};
use super::modules::Modules;
use super::subscription::{Ctx, On};
use crate::reactive::{Scheduler, Unsubscribe};
use crate::value::Snapshot;

/// A set of modules composed into one store.
///
/// Cloning a store yields another handle to the same modules, getters,
/// scheduler, and subscriptions.
pub struct Store<G = NoGetters> {
    inner: Arc<StoreInner<G>>,
}

struct StoreInner<G> {
    modules: Modules,
    getters: G,
    scheduler: Scheduler,
    /// Handles of every live subscription, in registration order.
    handles: Mutex<Vec<Unsubscribe>>,
}

/// Compose `modules` into a store without getters.
pub fn define_store(modules: Modules) -> Store<NoGetters> {
    Store::new(modules, NoGetters)
}

/// Compose `modules` into a store whose getters are `project(modules)`.
///
/// `project` runs once before this returns; if it panics, so does this
/// call. Afterwards it runs again on the first read following a change to
/// any field it read.
pub fn define_store_with_getters<S, F>(modules: Modules, project: F) -> Store<Getters<S>>
where
    S: Snapshot + Clone + Send + Sync + 'static,
    F: Fn(&Modules) -> S + Send + Sync + 'static,
{
    let getters = Getters::new(&modules, project);
    Store::new(modules, getters)
}

impl<G: GettersLayer> Store<G> {
    fn new(modules: Modules, getters: G) -> Self {
        debug!(modules = ?modules.names(), "store defined");
        Self {
            inner: Arc::new(StoreInner {
                modules,
                getters,
                scheduler: Scheduler::new(),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The registry this store was defined with.
    pub fn modules(&self) -> &Modules {
        &self.inner.modules
    }

    /// Start a subscription over `mapper(ctx)`.
    pub fn on<U, M>(&self, mapper: M) -> On<'_, G, U>
    where
        U: Snapshot + PartialEq + Clone + Send + Sync + 'static,
        M: Fn(&Ctx<'_, G>) -> U + Send + Sync + 'static,
    {
        On::new(self, mapper)
    }

    /// Stop every subscription registered so far.
    ///
    /// Handles are stopped in registration order. Subscriptions registered
    /// while this runs are left alone.
    pub fn unwatch_all(&self) {
        let released: Vec<Unsubscribe> = self.inner.handles.lock().clone();
        for handle in &released {
            handle.unsubscribe();
        }

        self.inner
            .handles
            .lock()
            .retain(|handle| !released.iter().any(|gone| gone.id() == handle.id()));

        debug!(released = released.len(), "unwatched all subscriptions");
    }

    /// Run every queued watcher.
    pub fn flush(&self) {
        self.inner.scheduler.flush();
    }

    /// Flush and wait for asynchronous trigger reactions, until nothing is
    /// queued and nothing is in flight.
    pub async fn settle(&self) {
        self.inner.scheduler.settle().await;
    }

    /// Asynchronous reactions that have not completed.
    pub fn pending_reactions(&self) -> usize {
        self.inner.scheduler.pending_reactions()
    }

    /// Subscriptions registered and not yet released by
    /// [`unwatch_all`](Self::unwatch_all).
    pub fn subscription_count(&self) -> usize {
        self.inner.handles.lock().len()
    }

    /// The scheduler running this store's watchers.
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub(crate) fn getters_layer(&self) -> &G {
        &self.inner.getters
    }

    pub(crate) fn register(&self, handle: Unsubscribe) {
        debug!(subscription = handle.id().raw(), "subscription registered");
        self.inner.handles.lock().push(handle);
    }
}

impl<S> Store<Getters<S>>
where
    S: Snapshot + Clone + Send + Sync + 'static,
{
    /// Current getters value. Never stale: a read after a module change
    /// recomputes.
    pub fn getters(&self) -> S {
        self.inner.getters.get()
    }

    /// The getters layer itself, for sharing or untracked reads.
    pub fn getters_handle(&self) -> &Getters<S> {
        &self.inner.getters
    }
}

impl<G> Clone for Store<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G: GettersLayer + Debug> Debug for Store<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("modules", &self.inner.modules)
            .field("getters", &self.inner.getters)
            .field("subscriptions", &self.subscription_count())
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

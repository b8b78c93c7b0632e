//! Subscription Engine
//!
//! [`Store::on`](super::Store::on) starts a small builder over a projection
//! of the store. The builder's type decides what may follow:
//!
//! ```text
//! On ──watch──▶ Watching ──watch──▶ Watching ...
//!  │
//!  ├──trigger──▶ Triggering ──trigger──▶ Triggering ...
//!  │
//!  └──filter──▶ Filtered ──trigger──▶ Triggering ...
//! ```
//!
//! A filter gates triggers only; `Filtered` and `Watching` have no way to
//! combine the two. Every `watch` or `trigger` call registers one more
//! subscription against the same projection and records its
//! [`Unsubscribe`] handle with the store.
//!
//! # How Triggers Work
//!
//! 1. A change to the projection is checked against the filter predicate,
//!    if one was given. A rejected change does nothing.
//!
//! 2. The action factory is handed the store's modules and returns the
//!    action, which runs with `(newer, older, clean_up)`.
//!
//! 3. An action may return a pending [`Reaction`]. Until it completes the
//!    trigger is busy: changes arriving in the meantime wait in a backlog
//!    and are processed in arrival order once the reaction is done.
//!
//! 4. An action that keeps feeding its own backlog (a sync trigger writing
//!    to its own projection) stops after [`RECURSION_LIMIT`] runs in a row;
//!    the rest of the backlog is dropped with a warning.

use std::collections::VecDeque;
use std::fmt::{self, Debug, Display};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use super::getters::GettersLayer;
use super::modules::Modules;
use super::store::Store;
use crate::reactive::{guarded, watch, CleanUp, Scheduler, Unsubscribe, WatchOptions, RECURSION_LIMIT};
use crate::value::{copy, Snapshot};

/// What a projection sees: the store's modules and its getters layer.
pub struct Ctx<'a, G> {
    pub modules: &'a Modules,
    pub getters: &'a G,
}

type Mapper<G, U> = Arc<dyn Fn(&Ctx<'_, G>) -> U + Send + Sync>;
type Predicate<U> = Arc<dyn Fn(&U, Option<&U>) -> bool + Send + Sync>;

// ----------------------------------------------------------------------------
// Reactions
// ----------------------------------------------------------------------------

/// Outcome of a trigger action.
pub enum Reaction {
    /// The action finished.
    Done,

    /// The action failed. The message is logged.
    Failed(String),

    /// The action continues asynchronously. The trigger stays busy until the
    /// future completes.
    Pending(BoxFuture<'static, Result<(), String>>),
}

impl Reaction {
    /// An asynchronous reaction.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Reaction::Pending(future.map(Ok).boxed())
    }

    /// An asynchronous reaction whose error is logged.
    pub fn try_pending<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        Reaction::Pending(future.map(|result| result.map_err(|err| err.to_string())).boxed())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Reaction::Pending(_))
    }
}

impl Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reaction::Done => f.write_str("Done"),
            Reaction::Failed(message) => f.debug_tuple("Failed").field(message).finish(),
            Reaction::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Return types a trigger action may have.
pub trait IntoReaction {
    fn into_reaction(self) -> Reaction;
}

impl IntoReaction for () {
    fn into_reaction(self) -> Reaction {
        Reaction::Done
    }
}

impl IntoReaction for Reaction {
    fn into_reaction(self) -> Reaction {
        self
    }
}

impl<E: Display> IntoReaction for Result<(), E> {
    fn into_reaction(self) -> Reaction {
        match self {
            Ok(()) => Reaction::Done,
            Err(err) => Reaction::Failed(err.to_string()),
        }
    }
}

// ----------------------------------------------------------------------------
// Builders
// ----------------------------------------------------------------------------

/// A fresh subscription builder: accepts `watch`, `filter`, or `trigger`.
pub struct On<'s, G, U> {
    store: &'s Store<G>,
    mapper: Mapper<G, U>,
}

/// A builder carrying a filter predicate: accepts only `trigger`.
pub struct Filtered<'s, G, U> {
    on: On<'s, G, U>,
    predicate: Predicate<U>,
}

/// Returned by `watch`: accepts further `watch` calls.
pub struct Watching<'s, G, U> {
    on: On<'s, G, U>,
    handle: Unsubscribe,
}

/// Returned by `trigger`: accepts further `trigger` calls, gated by the
/// same predicate.
pub struct Triggering<'s, G, U> {
    on: On<'s, G, U>,
    predicate: Option<Predicate<U>>,
    handle: Unsubscribe,
}

impl<'s, G, U> On<'s, G, U>
where
    G: GettersLayer,
    U: Snapshot + PartialEq + Clone + Send + Sync + 'static,
{
    pub(crate) fn new<M>(store: &'s Store<G>, mapper: M) -> Self
    where
        M: Fn(&Ctx<'_, G>) -> U + Send + Sync + 'static,
    {
        Self {
            store,
            mapper: Arc::new(mapper),
        }
    }

    fn source(&self) -> impl Fn() -> U + Send + Sync + 'static {
        let modules = self.store.modules().clone();
        let getters = self.store.getters_layer().clone();
        let mapper = Arc::clone(&self.mapper);
        move || {
            let ctx = Ctx {
                modules: &modules,
                getters: &getters,
            };
            copy(&mapper(&ctx))
        }
    }

    /// Observe the projection with default options.
    pub fn watch<E>(self, effect: E) -> Watching<'s, G, U>
    where
        E: Fn(&U, Option<&U>) + Send + Sync + 'static,
    {
        self.watch_with(effect, WatchOptions::default())
    }

    /// Observe the projection: `effect(newer, older)` runs whenever a
    /// re-evaluation differs from the previous snapshot.
    pub fn watch_with<E>(self, effect: E, options: WatchOptions) -> Watching<'s, G, U>
    where
        E: Fn(&U, Option<&U>) + Send + Sync + 'static,
    {
        let handle = watch(
            self.store.scheduler(),
            self.source(),
            move |newer: &U, older: Option<&U>, _: &CleanUp| effect(newer, older),
            options,
        );
        self.store.register(handle.clone());
        Watching { on: self, handle }
    }

    /// Gate the triggers that follow on `predicate(newer, older)`.
    pub fn filter<P>(self, predicate: P) -> Filtered<'s, G, U>
    where
        P: Fn(&U, Option<&U>) -> bool + Send + Sync + 'static,
    {
        Filtered {
            on: self,
            predicate: Arc::new(predicate),
        }
    }

    /// Run an action on every change, with default options.
    pub fn trigger<F, A, R>(self, factory: F) -> Triggering<'s, G, U>
    where
        F: Fn(&Modules) -> A + Send + Sync + 'static,
        A: FnOnce(U, Option<U>, CleanUp) -> R,
        R: IntoReaction,
    {
        self.trigger_with(factory, WatchOptions::default())
    }

    /// Run an action on every change: `factory(modules)` produces the action
    /// and the action receives `(newer, older, clean_up)`.
    pub fn trigger_with<F, A, R>(self, factory: F, options: WatchOptions) -> Triggering<'s, G, U>
    where
        F: Fn(&Modules) -> A + Send + Sync + 'static,
        A: FnOnce(U, Option<U>, CleanUp) -> R,
        R: IntoReaction,
    {
        self.register_trigger(None, factory, options)
    }

    fn register_trigger<F, A, R>(
        self,
        predicate: Option<Predicate<U>>,
        factory: F,
        options: WatchOptions,
    ) -> Triggering<'s, G, U>
    where
        F: Fn(&Modules) -> A + Send + Sync + 'static,
        A: FnOnce(U, Option<U>, CleanUp) -> R,
        R: IntoReaction,
    {
        let modules = self.store.modules().clone();
        let action = move |newer: U, older: Option<U>, clean_up: CleanUp| {
            factory(&modules)(newer, older, clean_up).into_reaction()
        };
        let state = Arc::new(TriggerState::new(self.store.scheduler().clone(), action));

        let gate = predicate.clone();
        let handle = watch(
            self.store.scheduler(),
            self.source(),
            move |newer: &U, older: Option<&U>, clean_up: &CleanUp| {
                if let Some(predicate) = &gate {
                    if !predicate(newer, older) {
                        return;
                    }
                }
                state.dispatch((newer.clone(), older.cloned()), clean_up);
            },
            options,
        );
        self.store.register(handle.clone());

        Triggering {
            on: self,
            predicate,
            handle,
        }
    }
}

impl<'s, G, U> Filtered<'s, G, U>
where
    G: GettersLayer,
    U: Snapshot + PartialEq + Clone + Send + Sync + 'static,
{
    /// Run an action on every change the predicate accepts.
    pub fn trigger<F, A, R>(self, factory: F) -> Triggering<'s, G, U>
    where
        F: Fn(&Modules) -> A + Send + Sync + 'static,
        A: FnOnce(U, Option<U>, CleanUp) -> R,
        R: IntoReaction,
    {
        self.trigger_with(factory, WatchOptions::default())
    }

    pub fn trigger_with<F, A, R>(self, factory: F, options: WatchOptions) -> Triggering<'s, G, U>
    where
        F: Fn(&Modules) -> A + Send + Sync + 'static,
        A: FnOnce(U, Option<U>, CleanUp) -> R,
        R: IntoReaction,
    {
        self.on.register_trigger(Some(self.predicate), factory, options)
    }
}

impl<'s, G, U> Watching<'s, G, U>
where
    G: GettersLayer,
    U: Snapshot + PartialEq + Clone + Send + Sync + 'static,
{
    pub fn watch<E>(self, effect: E) -> Watching<'s, G, U>
    where
        E: Fn(&U, Option<&U>) + Send + Sync + 'static,
    {
        self.on.watch(effect)
    }

    pub fn watch_with<E>(self, effect: E, options: WatchOptions) -> Watching<'s, G, U>
    where
        E: Fn(&U, Option<&U>) + Send + Sync + 'static,
    {
        self.on.watch_with(effect, options)
    }

    /// Handle for the subscription registered last.
    pub fn handle(&self) -> Unsubscribe {
        self.handle.clone()
    }
}

impl<'s, G, U> Triggering<'s, G, U>
where
    G: GettersLayer,
    U: Snapshot + PartialEq + Clone + Send + Sync + 'static,
{
    pub fn trigger<F, A, R>(self, factory: F) -> Triggering<'s, G, U>
    where
        F: Fn(&Modules) -> A + Send + Sync + 'static,
        A: FnOnce(U, Option<U>, CleanUp) -> R,
        R: IntoReaction,
    {
        self.trigger_with(factory, WatchOptions::default())
    }

    pub fn trigger_with<F, A, R>(self, factory: F, options: WatchOptions) -> Triggering<'s, G, U>
    where
        F: Fn(&Modules) -> A + Send + Sync + 'static,
        A: FnOnce(U, Option<U>, CleanUp) -> R,
        R: IntoReaction,
    {
        self.on.register_trigger(self.predicate, factory, options)
    }

    /// Handle for the subscription registered last.
    pub fn handle(&self) -> Unsubscribe {
        self.handle.clone()
    }
}

// ----------------------------------------------------------------------------
// Trigger state
// ----------------------------------------------------------------------------

type Change<U> = (U, Option<U>);
type Action<U> = Box<dyn Fn(U, Option<U>, CleanUp) -> Reaction + Send + Sync>;

struct TriggerState<U> {
    scheduler: Scheduler,
    action: Action<U>,
    queue: Mutex<Backlog<U>>,
}

struct Backlog<U> {
    busy: bool,
    changes: VecDeque<Change<U>>,
}

impl<U> TriggerState<U>
where
    U: Clone + Send + Sync + 'static,
{
    fn new<A>(scheduler: Scheduler, action: A) -> Self
    where
        A: Fn(U, Option<U>, CleanUp) -> Reaction + Send + Sync + 'static,
    {
        Self {
            scheduler,
            action: Box::new(action),
            queue: Mutex::new(Backlog {
                busy: false,
                changes: VecDeque::new(),
            }),
        }
    }

    /// Run the action for `change`, or park it behind the action in flight.
    fn dispatch(self: &Arc<Self>, change: Change<U>, clean_up: &CleanUp) {
        {
            let mut queue = self.queue.lock();
            if queue.busy {
                queue.changes.push_back(change);
                debug!(backlog = queue.changes.len(), "trigger busy; change deferred");
                return;
            }
            queue.busy = true;
        }
        self.drain(change, clean_up.clone());
    }

    /// Run actions until the backlog is empty or one of them goes pending.
    fn drain(self: &Arc<Self>, first: Change<U>, clean_up: CleanUp) {
        let mut change = first;
        let mut runs = 0usize;
        loop {
            runs += 1;
            if runs > RECURSION_LIMIT {
                let dropped = self.abandon();
                warn!(
                    limit = RECURSION_LIMIT,
                    dropped,
                    "trigger keeps feeding its own backlog; dropping the rest"
                );
                return;
            }

            clean_up.run();
            let (newer, older) = change;
            let reaction = guarded("trigger action", || (self.action)(newer, older, clean_up.clone()));

            match reaction {
                Some(Reaction::Pending(future)) => {
                    let this = Arc::clone(self);
                    self.scheduler.spawn(async move {
                        match AssertUnwindSafe(future).catch_unwind().await {
                            Ok(Ok(())) => {}
                            Ok(Err(message)) => error!(error = %message, "trigger reaction failed"),
                            Err(_) => error!("trigger reaction panicked"),
                        }
                        if let Some(next) = this.next_change(&clean_up) {
                            this.drain(next, clean_up);
                        }
                    });
                    return;
                }
                Some(Reaction::Failed(message)) => {
                    error!(error = %message, "trigger action failed");
                }
                Some(Reaction::Done) | None => {}
            }

            match self.next_change(&clean_up) {
                Some(next) => change = next,
                None => return,
            }
        }
    }

    /// Drop the backlog and mark the trigger idle. Returns the number of
    /// changes dropped, counting the one that was about to run.
    fn abandon(&self) -> usize {
        let mut queue = self.queue.lock();
        let dropped = queue.changes.len() + 1;
        queue.changes.clear();
        queue.busy = false;
        dropped
    }

    /// Pop the next deferred change, or mark the trigger idle. A stopped
    /// subscription drops whatever is left.
    fn next_change(&self, clean_up: &CleanUp) -> Option<Change<U>> {
        let mut queue = self.queue.lock();
        if clean_up.is_disposed() {
            queue.changes.clear();
        }
        let next = queue.changes.pop_front();
        if next.is_none() {
            queue.busy = false;
        }
        next
    }
}

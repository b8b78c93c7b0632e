//! Watch Implementation
//!
//! A watcher evaluates a source function inside a reactive context, keeps
//! the result, and calls back whenever a re-evaluation produces a different
//! value.
//!
//! # How Watchers Work
//!
//! 1. When created, the watcher evaluates its source once to establish its
//!    dependencies and the baseline value (and calls back right away if
//!    `immediate` is set).
//!
//! 2. When a dependency changes, the watcher queues itself on its
//!    [`Scheduler`] (or re-runs inline in [`FlushMode::Sync`]).
//!
//! 3. On re-run the source is evaluated again. If the new value differs from
//!    the previous one (or `deep` is set), the pending clean-up runs and the
//!    callback receives `(newer, Some(older))`.
//!
//! 4. A sync watcher whose callback writes to its own source re-enters
//!    itself. Nesting deeper than [`RECURSION_LIMIT`] is dropped with a
//!    warning, mirroring the scheduler's cap for queued watchers.
//!
//! # Differences from Memo
//!
//! - Memos are lazy (compute on access); watchers are eager (re-run when a
//!   dependency changes).
//! - Memos cache a value for readers; watchers only compare consecutive
//!   values and hand them to a callback.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::cleanup::CleanUp;
use super::context::{untracked, Dependencies, ReactiveContext};
use super::dep::release_stale;
use super::scheduler::{guarded, Job, Scheduler, RECURSION_LIMIT};
use super::subscriber::{Reactive, SubscriberId};
use crate::value::Snapshot;

/// When a notified watcher re-runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlushMode {
    /// Queue on the scheduler and run during the next flush.
    #[default]
    Queued,

    /// Run inline, as part of the write that changed a dependency.
    Sync,
}

/// Options recognised by [`watch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Call back once at creation, with no older value.
    pub immediate: bool,

    /// Track every nested field of the value and call back on every
    /// re-run, even when the new value compares equal to the old one.
    pub deep: bool,

    /// When a notified watcher re-runs.
    pub flush: FlushMode,
}

impl WatchOptions {
    /// Default options: lazy, shallow, queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Call back once at creation.
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    /// Track nested fields and call back on every re-run.
    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    /// Re-run inline on write instead of at the next flush.
    pub fn sync(mut self) -> Self {
        self.flush = FlushMode::Sync;
        self
    }
}

/// Something an [`Unsubscribe`] handle can stop.
pub(crate) trait Stop: Send + Sync {
    fn stop(&self);
    fn is_active(&self) -> bool;
}

/// Handle that stops one subscription.
///
/// Cloning the handle is cheap. Stopping is idempotent: only the first call
/// releases dependencies and runs the pending clean-up.
#[derive(Clone)]
pub struct Unsubscribe {
    id: SubscriberId,
    target: Arc<dyn Stop>,
}

impl Unsubscribe {
    pub(crate) fn new(id: SubscriberId, target: Arc<dyn Stop>) -> Self {
        Self { id, target }
    }

    /// The subscriber this handle stops.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Stop the subscription.
    pub fn unsubscribe(&self) {
        self.target.stop();
    }

    /// Whether the subscription is still running.
    pub fn is_active(&self) -> bool {
        self.target.is_active()
    }
}

impl Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

type Source<V> = Box<dyn Fn() -> V + Send + Sync>;
type Callback<V> = Box<dyn Fn(&V, Option<&V>, &CleanUp) + Send + Sync>;

/// Watch `source` and call `callback` with `(newer, older, clean_up)` each
/// time a re-evaluation produces a different value.
///
/// The watcher lives until the returned handle is used to stop it; dropping
/// every clone of the handle also drops the watcher.
pub fn watch<V, S, C>(scheduler: &Scheduler, source: S, callback: C, options: WatchOptions) -> Unsubscribe
where
    V: Snapshot + PartialEq + Clone + Send + Sync + 'static,
    S: Fn() -> V + Send + Sync + 'static,
    C: Fn(&V, Option<&V>, &CleanUp) + Send + Sync + 'static,
{
    let watcher = Arc::new_cyclic(|this| Watcher {
        id: SubscriberId::new(),
        this: this.clone(),
        source: Box::new(source),
        callback: Box::new(callback),
        options,
        scheduler: scheduler.clone(),
        last: Mutex::new(None),
        dependencies: Mutex::new(Dependencies::new()),
        active: AtomicBool::new(true),
        run_count: AtomicUsize::new(0),
        sync_depth: AtomicUsize::new(0),
        clean_up: CleanUp::new(),
    });

    debug!(
        watcher = watcher.id.raw(),
        immediate = options.immediate,
        deep = options.deep,
        "watcher registered"
    );

    if options.immediate {
        guarded("watcher", || watcher.fire());
    } else if let Some(baseline) = guarded("watch source", || watcher.evaluate()) {
        *watcher.last.lock() = Some(baseline);
    }

    let id = watcher.id;
    Unsubscribe::new(id, watcher)
}

struct Watcher<V> {
    id: SubscriberId,
    this: Weak<Watcher<V>>,
    source: Source<V>,
    callback: Callback<V>,
    options: WatchOptions,
    scheduler: Scheduler,
    /// Value from the previous evaluation.
    last: Mutex<Option<V>>,
    dependencies: Mutex<Dependencies>,
    active: AtomicBool,
    run_count: AtomicUsize,
    /// Nested inline runs in progress.
    sync_depth: AtomicUsize,
    clean_up: CleanUp,
}

impl<V> Watcher<V>
where
    V: Snapshot + PartialEq + Clone + Send + Sync + 'static,
{
    /// Evaluate the source inside a reactive context.
    fn evaluate(&self) -> V {
        let this: Weak<Watcher<V>> = self.this.clone();
        let ctx = ReactiveContext::enter(self.id, this);

        let value = (self.source)();
        if self.options.deep {
            value.traverse();
        }

        let new_deps = ctx.finish();
        let mut deps = self.dependencies.lock();
        release_stale(self.id, &deps, &new_deps);
        *deps = new_deps;

        value
    }

    /// Re-evaluate and call back if the value changed.
    fn fire(&self) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }

        let newer = self.evaluate();
        let older = self.last.lock().replace(newer.clone());
        let changed = self.options.deep || older.as_ref() != Some(&newer);
        if !changed {
            return;
        }

        self.clean_up.run();
        self.run_count.fetch_add(1, Ordering::SeqCst);
        untracked(|| (self.callback)(&newer, older.as_ref(), &self.clean_up));
    }
}

impl<V> Reactive for Watcher<V>
where
    V: Snapshot + PartialEq + Clone + Send + Sync + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn notify(&self) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        match self.options.flush {
            FlushMode::Queued => {
                if let Some(this) = self.this.upgrade() {
                    self.scheduler.queue(this);
                }
            }
            FlushMode::Sync => {
                let depth = self.sync_depth.fetch_add(1, Ordering::SeqCst) + 1;
                if depth > RECURSION_LIMIT {
                    if depth == RECURSION_LIMIT + 1 {
                        warn!(
                            watcher = self.id.raw(),
                            limit = RECURSION_LIMIT,
                            "sync watcher keeps re-entering itself; dropping the nested run"
                        );
                    }
                } else {
                    guarded("watcher", || self.fire());
                }
                self.sync_depth.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

impl<V> Job for Watcher<V>
where
    V: Snapshot + PartialEq + Clone + Send + Sync + 'static,
{
    fn job_id(&self) -> SubscriberId {
        self.id
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn run(&self) {
        self.fire();
    }
}

impl<V> Stop for Watcher<V>
where
    V: Snapshot + PartialEq + Clone + Send + Sync + 'static,
{
    fn stop(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }

        let deps = std::mem::take(&mut *self.dependencies.lock());
        for dep in &deps {
            dep.unsubscribe(self.id);
        }
        self.clean_up.dispose();

        debug!(
            watcher = self.id.raw(),
            runs = self.run_count.load(Ordering::SeqCst),
            "watcher stopped"
        );
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Map, Value};
    use std::sync::atomic::AtomicI32;

    fn counter_state() -> Map {
        let state = Map::new();
        state.set("value", 0);
        state
    }

    fn recording(log: &Arc<Mutex<Vec<(Value, Option<Value>)>>>) -> impl Fn(&Value, Option<&Value>, &CleanUp) + Send + Sync + 'static {
        let log = log.clone();
        move |newer: &Value, older: Option<&Value>, _: &CleanUp| {
            log.lock().push((newer.clone(), older.cloned()));
        }
    }

    #[test]
    fn watch_fires_after_flush_on_change() {
        let scheduler = Scheduler::new();
        let state = counter_state();
        let log = Arc::new(Mutex::new(Vec::new()));

        let source = state.clone();
        let _handle = watch(&scheduler, move || source.get("value"), recording(&log), WatchOptions::new());

        state.set("value", 1);
        assert!(log.lock().is_empty());
        assert_eq!(scheduler.pending_jobs(), 1);

        scheduler.flush();
        assert_eq!(*log.lock(), vec![(Value::Int(1), Some(Value::Int(0)))]);
    }

    #[test]
    fn watch_batches_writes_within_one_flush() {
        let scheduler = Scheduler::new();
        let state = counter_state();
        let log = Arc::new(Mutex::new(Vec::new()));

        let source = state.clone();
        let _handle = watch(&scheduler, move || source.get("value"), recording(&log), WatchOptions::new());

        state.set("value", 1);
        state.set("value", 2);
        state.set("value", 3);
        scheduler.flush();

        assert_eq!(*log.lock(), vec![(Value::Int(3), Some(Value::Int(0)))]);
    }

    #[test]
    fn watch_skips_equal_values() {
        let scheduler = Scheduler::new();
        let state = counter_state();
        state.set("other", 0);
        let log = Arc::new(Mutex::new(Vec::new()));

        // Reads both fields but only reports the parity of "value"
        let source = state.clone();
        let _handle = watch(
            &scheduler,
            move || {
                let _ = source.get("other");
                Value::Bool(source.get("value").as_int().unwrap_or_default() % 2 == 0)
            },
            recording(&log),
            WatchOptions::new(),
        );

        state.set("other", 1);
        state.set("value", 2);
        scheduler.flush();
        assert!(log.lock().is_empty());

        state.set("value", 3);
        scheduler.flush();
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn immediate_fires_without_older_value() {
        let scheduler = Scheduler::new();
        let state = counter_state();
        let log = Arc::new(Mutex::new(Vec::new()));

        let source = state.clone();
        let _handle = watch(
            &scheduler,
            move || source.get("value"),
            recording(&log),
            WatchOptions::new().immediate(),
        );

        assert_eq!(*log.lock(), vec![(Value::Int(0), None)]);
    }

    #[test]
    fn sync_mode_fires_on_every_write() {
        let scheduler = Scheduler::new();
        let state = counter_state();
        let log = Arc::new(Mutex::new(Vec::new()));

        let source = state.clone();
        let _handle = watch(&scheduler, move || source.get("value"), recording(&log), WatchOptions::new().sync());

        state.set("value", 1);
        state.set("value", 2);

        assert_eq!(
            *log.lock(),
            vec![
                (Value::Int(1), Some(Value::Int(0))),
                (Value::Int(2), Some(Value::Int(1))),
            ]
        );
        assert_eq!(scheduler.pending_jobs(), 0);
    }

    #[test]
    fn sync_watcher_writing_its_source_is_capped() {
        let scheduler = Scheduler::new();
        let state = counter_state();
        let runs = Arc::new(AtomicI32::new(0));

        let source = state.clone();
        let target = state.clone();
        let counter = runs.clone();
        let handle = watch(
            &scheduler,
            move || source.get("value"),
            move |newer: &Value, _: Option<&Value>, _: &CleanUp| {
                counter.fetch_add(1, Ordering::SeqCst);
                target.set("value", newer.as_int().unwrap_or_default() + 1);
            },
            WatchOptions::new().sync(),
        );

        state.set("value", 1);

        assert_eq!(runs.load(Ordering::SeqCst), RECURSION_LIMIT as i32);
        assert_eq!(state.peek("value"), Value::Int(RECURSION_LIMIT as i64 + 1));
        assert!(handle.is_active());

        // The cap is per write: the next outside write runs again
        state.set("value", 0);
        assert_eq!(runs.load(Ordering::SeqCst), 2 * RECURSION_LIMIT as i32);
    }

    #[test]
    fn deep_tracks_nested_fields() {
        let scheduler = Scheduler::new();
        let nested = Map::new();
        nested.set("x", 1);
        let state = Map::new();
        state.set("nested", nested.clone());

        let shallow_hits = Arc::new(AtomicI32::new(0));
        let deep_hits = Arc::new(AtomicI32::new(0));

        let source = state.clone();
        let hits = shallow_hits.clone();
        let _shallow = watch(
            &scheduler,
            move || source.snapshot(),
            move |_: &Map, _: Option<&Map>, _: &CleanUp| {
                hits.fetch_add(1, Ordering::SeqCst);
            },
            WatchOptions::new(),
        );

        let source = state.clone();
        let hits = deep_hits.clone();
        let _deep = watch(
            &scheduler,
            move || source.snapshot(),
            move |_: &Map, _: Option<&Map>, _: &CleanUp| {
                hits.fetch_add(1, Ordering::SeqCst);
            },
            WatchOptions::new().deep(),
        );

        nested.set("x", 2);
        scheduler.flush();

        assert_eq!(shallow_hits.load(Ordering::SeqCst), 0);
        assert_eq!(deep_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clean_up_runs_before_next_callback_and_on_stop() {
        let scheduler = Scheduler::new();
        let state = counter_state();
        let cleaned = Arc::new(AtomicI32::new(0));

        let source = state.clone();
        let counter = cleaned.clone();
        let handle = watch(
            &scheduler,
            move || source.get("value"),
            move |_: &Value, _: Option<&Value>, clean_up: &CleanUp| {
                let counter = counter.clone();
                clean_up.register(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            },
            WatchOptions::new(),
        );

        state.set("value", 1);
        scheduler.flush();
        assert_eq!(cleaned.load(Ordering::SeqCst), 0);

        state.set("value", 2);
        scheduler.flush();
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);

        handle.unsubscribe();
        assert_eq!(cleaned.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let scheduler = Scheduler::new();
        let state = counter_state();
        let log = Arc::new(Mutex::new(Vec::new()));

        let source = state.clone();
        let handle = watch(&scheduler, move || source.get("value"), recording(&log), WatchOptions::new());

        handle.unsubscribe();
        handle.clone().unsubscribe();
        assert!(!handle.is_active());

        state.set("value", 1);
        scheduler.flush();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn panicking_callback_keeps_watcher_registered() {
        let scheduler = Scheduler::new();
        let state = counter_state();
        let calls = Arc::new(AtomicI32::new(0));

        let source = state.clone();
        let counter = calls.clone();
        let handle = watch(
            &scheduler,
            move || source.get("value"),
            move |newer: &Value, _: Option<&Value>, _: &CleanUp| {
                counter.fetch_add(1, Ordering::SeqCst);
                if newer == &Value::Int(1) {
                    panic!("callback failed");
                }
            },
            WatchOptions::new(),
        );

        state.set("value", 1);
        scheduler.flush();
        state.set("value", 2);
        scheduler.flush();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(handle.is_active());
    }
}

//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. The computation runs on first access and the result is cached.
//!
//! 2. Every location read during the computation becomes a dependency.
//!
//! 3. When a dependency changes, the memo is marked dirty and forwards the
//!    notification to whatever depends on the memo itself (watchers reading
//!    store getters, other memos).
//!
//! 4. The next access recomputes. Memos that are never read again stay dirty
//!    and cost nothing.
//!
//! 5. A computation that panics leaves the memo `Failed` with nothing
//!    cached. The panic reaches the reader; the next change to anything the
//!    computation read is still forwarded.
//!
//! A memo therefore never hands out a stale value: a read after a change
//! always sees the recomputed result, whether or not a flush happened.

use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use super::context::{Dependencies, ReactiveContext};
use super::dep::{release_stale, Dep};
use super::subscriber::{Reactive, SubscriberId};

/// Dirty state for a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency changed since the last computation.
    Dirty,

    /// The last computation panicked. Nothing is cached; the next change
    /// to a location it read still reaches dependents.
    Failed,
}

/// A cached derived value that recomputes only when dependencies change.
///
/// Cloning a memo yields another handle to the same cache.
pub struct Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<MemoInner<T>>,
}

struct MemoInner<T> {
    /// The subscriber ID used for dependency tracking.
    subscriber_id: SubscriberId,

    /// The computation function.
    compute: Box<dyn Fn() -> T + Send + Sync>,

    /// The cached value (None if never computed).
    value: RwLock<Option<T>>,

    /// Current dirty state.
    state: Mutex<MemoState>,

    /// Locations read by the last computation.
    dependencies: Mutex<Dependencies>,

    /// Subscribers that read this memo.
    dependents: Dep,
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new memo with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(MemoInner {
                subscriber_id: SubscriberId::new(),
                compute: Box::new(compute),
                value: RwLock::new(None),
                state: Mutex::new(MemoState::Dirty),
                dependencies: Mutex::new(Dependencies::new()),
                dependents: Dep::new(),
            }),
        }
    }

    /// Get the subscriber ID for this memo.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Inside a reactive context the running computation starts depending
    /// on this memo.
    pub fn get(&self) -> T {
        self.inner.dependents.track();

        if self.state() == MemoState::Clean {
            if let Some(value) = self.inner.value.read().as_ref() {
                return value.clone();
            }
        }
        self.recompute()
    }

    /// Get the current value without establishing a dependency.
    pub fn get_untracked(&self) -> T {
        super::context::untracked(|| self.get())
    }

    /// Mark the memo as needing recomputation and notify its dependents.
    pub fn mark_dirty(&self) {
        self.inner.invalidate();
    }

    fn recompute(&self) -> T {
        let weak: Weak<MemoInner<T>> = Arc::downgrade(&self.inner);
        let ctx = ReactiveContext::enter(self.inner.subscriber_id, weak);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.inner.compute)()));

        let new_deps = ctx.finish();
        let new_value = match outcome {
            Ok(value) => value,
            Err(payload) => {
                // Partial reads are already subscribed; keep them with the old set.
                {
                    let mut deps = self.inner.dependencies.lock();
                    for dep in new_deps {
                        if !deps.iter().any(|known| known.id() == dep.id()) {
                            deps.push(dep);
                        }
                    }
                }
                *self.inner.value.write() = None;
                *self.inner.state.lock() = MemoState::Failed;
                panic::resume_unwind(payload);
            }
        };

        {
            let mut deps = self.inner.dependencies.lock();
            release_stale(self.inner.subscriber_id, &deps, &new_deps);
            *deps = new_deps;
        }

        *self.inner.value.write() = Some(new_value.clone());
        *self.inner.state.lock() = MemoState::Clean;

        new_value
    }

    /// Get the current dirty state.
    pub fn state(&self) -> MemoState {
        *self.inner.state.lock()
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }

    /// Get the number of subscribers reading this memo.
    pub fn dependent_count(&self) -> usize {
        self.inner.dependents.subscriber_count()
    }

    /// Get the number of locations the last computation read.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.lock().len()
    }

    /// Check whether two handles share one cache.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> MemoInner<T> {
    fn invalidate(&self) {
        {
            let mut state = self.state.lock();
            if *state == MemoState::Dirty {
                return;
            }
            *state = MemoState::Dirty;
        }
        self.dependents.trigger();
    }
}

impl<T> Reactive for MemoInner<T>
where
    T: Send + Sync,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn notify(&self) {
        self.invalidate();
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("subscriber_id", &self.subscriber_id())
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

//! Dependency Implementation
//!
//! A `Dep` is the unit of change notification. Every observable location
//! (one field of a [`Map`](crate::value::Map), the contents of a
//! [`List`](crate::value::List), the output of a [`Memo`](super::Memo)) owns
//! one. Reading the location calls [`Dep::track`]; a write that changes the
//! location calls [`Dep::trigger`].
//!
//! # How Dependencies Work
//!
//! 1. When a dep is tracked within a reactive context, the running
//!    computation is registered as a subscriber.
//!
//! 2. When the dep is triggered, every live subscriber is notified.
//!
//! 3. Subscribers are held weakly; dead entries are pruned on trigger.
//!
//! # Thread Safety
//!
//! The subscriber set is protected by a mutex that is never held while a
//! subscriber runs, so a subscriber may freely read or write other
//! locations from its notification.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::subscriber::{Reactive, SubscriberId};

/// Counter for generating unique dep IDs.
static DEP_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_dep_id() -> u64 {
    DEP_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A set of subscribers interested in one observable location.
///
/// Cloning a `Dep` yields another handle to the same set.
#[derive(Clone)]
pub struct Dep {
    inner: Arc<DepInner>,
}

struct DepInner {
    id: u64,
    subscribers: Mutex<IndexMap<SubscriberId, Weak<dyn Reactive>>>,
}

impl Dep {
    /// Create a dep with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DepInner {
                id: next_dep_id(),
                subscribers: Mutex::new(IndexMap::new()),
            }),
        }
    }

    /// Get the dep's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Register the running computation, if any, as a subscriber.
    pub fn track(&self) {
        ReactiveContext::track(self);
    }

    /// Notify every live subscriber that the location changed.
    pub fn trigger(&self) {
        let live: SmallVec<[Arc<dyn Reactive>; 4]> = {
            let mut subscribers = self.inner.subscribers.lock();
            subscribers.retain(|_, weak| weak.strong_count() > 0);
            subscribers.values().filter_map(|weak| weak.upgrade()).collect()
        };

        for subscriber in live {
            subscriber.notify();
        }
    }

    pub(crate) fn subscribe(&self, subscriber_id: SubscriberId, subscriber: Weak<dyn Reactive>) {
        self.inner
            .subscribers
            .lock()
            .insert(subscriber_id, subscriber);
    }

    pub(crate) fn unsubscribe(&self, subscriber_id: SubscriberId) {
        self.inner.subscribers.lock().shift_remove(&subscriber_id);
    }

    /// Get the number of registered subscribers, live or not yet pruned.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Dep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.id())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Drop `subscriber_id` from every dep in `old` that is missing from `new`.
///
/// Computations call this after a successful re-run so that a panicking run
/// never leaves them detached from the locations they were watching.
pub(crate) fn release_stale(subscriber_id: SubscriberId, old: &[Dep], new: &[Dep]) {
    for dep in old {
        if !new.iter().any(|kept| kept.id() == dep.id()) {
            dep.unsubscribe(subscriber_id);
        }
    }
}

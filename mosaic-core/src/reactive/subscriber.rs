//! Subscriber types for the reactive system.
//!
//! A subscriber is any computation that depends on reactive values: the
//! getters memo of a store, or a watcher created by `on(..).watch(..)` /
//! `on(..).trigger(..)`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a subscriber.
///
/// IDs are handed out from a monotonic counter, so comparing two IDs tells
/// which subscriber was created first. The scheduler relies on this to run
/// queued watchers in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// A computation that can be notified when one of its dependencies changes.
///
/// Dependencies only hold weak references to their subscribers, so a
/// subscriber that is dropped silently stops receiving notifications.
pub trait Reactive: Send + Sync {
    /// Get the subscriber ID for this reactive value.
    fn subscriber_id(&self) -> SubscriberId;

    /// A dependency changed.
    ///
    /// Memos mark themselves dirty and forward the notification to their own
    /// dependents. Watchers queue themselves on their scheduler (or run
    /// inline in sync mode).
    fn notify(&self);
}

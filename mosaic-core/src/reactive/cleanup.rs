//! Disposer registration for watcher callbacks.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;

use super::scheduler::guarded;

type Disposer = Box<dyn FnOnce() + Send>;

/// Hook handed to every watcher callback for registering a disposer.
///
/// At most one disposer is pending at a time. It runs before the callback
/// runs again, or when the watcher is stopped, whichever comes first.
#[derive(Clone, Default)]
pub struct CleanUp {
    slot: Arc<Mutex<Slot>>,
}

#[derive(Default)]
struct Slot {
    disposer: Option<Disposer>,
    disposed: bool,
}

impl CleanUp {
    /// Create a hook with nothing registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `disposer`.
    ///
    /// A disposer that was still pending is run first. If the owning watcher
    /// has already been stopped, `disposer` runs immediately.
    pub fn register<F>(&self, disposer: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.slot.lock();
        if slot.disposed {
            drop(slot);
            guarded("clean-up", disposer);
            return;
        }
        let previous = slot.disposer.replace(Box::new(disposer));
        drop(slot);
        run(previous);
    }

    /// Whether a disposer is waiting to run.
    pub fn is_pending(&self) -> bool {
        self.slot.lock().disposer.is_some()
    }

    /// Whether the owning watcher has been stopped.
    pub fn is_disposed(&self) -> bool {
        self.slot.lock().disposed
    }

    /// Run the pending disposer, if any.
    pub(crate) fn run(&self) {
        let pending = self.slot.lock().disposer.take();
        run(pending);
    }

    /// Run the pending disposer and refuse further registrations.
    pub(crate) fn dispose(&self) {
        let pending = {
            let mut slot = self.slot.lock();
            slot.disposed = true;
            slot.disposer.take()
        };
        run(pending);
    }
}

fn run(disposer: Option<Disposer>) {
    if let Some(disposer) = disposer {
        guarded("clean-up", disposer);
    }
}

impl Debug for CleanUp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanUp")
            .field("pending", &self.is_pending())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn counting(hits: &Arc<AtomicI32>) -> impl FnOnce() + Send + 'static {
        let hits = hits.clone();
        move || {
            hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn run_invokes_pending_disposer_once() {
        let hits = Arc::new(AtomicI32::new(0));
        let clean_up = CleanUp::new();

        clean_up.register(counting(&hits));
        assert!(clean_up.is_pending());

        clean_up.run();
        clean_up.run();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!clean_up.is_pending());
    }

    #[test]
    fn second_registration_runs_the_first() {
        let first = Arc::new(AtomicI32::new(0));
        let second = Arc::new(AtomicI32::new(0));
        let clean_up = CleanUp::new();

        clean_up.register(counting(&first));
        clean_up.register(counting(&second));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);

        clean_up.dispose();
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registration_after_dispose_runs_immediately() {
        let hits = Arc::new(AtomicI32::new(0));
        let clean_up = CleanUp::new();

        clean_up.dispose();
        clean_up.register(counting(&hits));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!clean_up.is_pending());
        assert!(clean_up.is_disposed());
    }
}

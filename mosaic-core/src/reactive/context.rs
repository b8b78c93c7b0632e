//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! When a map field, list, or memo is read, the [`Dep`] guarding it asks the
//! context for the current subscriber and registers it as a dependent.
//!
//! # Implementation
//!
//! We use a thread-local stack to track the currently executing computation.
//! When a memo recomputes or a watcher evaluates its source, it pushes an
//! entry onto the stack. When the computation completes, the entry is popped
//! and the dependencies collected during the run are handed back.
//!
//! Nested contexts are supported (a watcher source reading the getters memo
//! recomputes the memo inside its own context). An entry without a
//! subscriber suspends tracking, which is how [`untracked`] works.

use std::cell::RefCell;
use std::sync::Weak;

use smallvec::SmallVec;

use super::dep::Dep;
use super::subscriber::{Reactive, SubscriberId};

/// Dependencies collected during one run of a computation.
pub type Dependencies = SmallVec<[Dep; 8]>;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the reactive context stack.
struct ContextEntry {
    /// The running computation. `None` while tracking is suspended.
    subscriber: Option<(SubscriberId, Weak<dyn Reactive>)>,
    /// Dependencies read during this computation, deduplicated by id.
    dependencies: Dependencies,
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack balanced even if the computation panics.
pub struct ReactiveContext {
    subscriber_id: Option<SubscriberId>,
    popped: bool,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given subscriber.
    ///
    /// While this context is active, any dependency that is read registers
    /// the subscriber as a dependent.
    pub fn enter(subscriber_id: SubscriberId, subscriber: Weak<dyn Reactive>) -> Self {
        Self::push(Some((subscriber_id, subscriber)))
    }

    /// Enter a context in which reads are not tracked.
    pub fn suspend() -> Self {
        Self::push(None)
    }

    fn push(subscriber: Option<(SubscriberId, Weak<dyn Reactive>)>) -> Self {
        let subscriber_id = subscriber.as_ref().map(|(id, _)| *id);
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                subscriber,
                dependencies: SmallVec::new(),
            });
        });

        Self {
            subscriber_id,
            popped: false,
        }
    }

    /// Check if reads are currently being tracked.
    pub fn is_tracking() -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .is_some_and(|entry| entry.subscriber.is_some())
        })
    }

    /// Get the current subscriber ID, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .and_then(|entry| entry.subscriber.as_ref().map(|(id, _)| *id))
        })
    }

    /// Record a read of `dep` by the running computation.
    ///
    /// Called by dependencies when they are read. Does nothing outside a
    /// tracking context.
    pub fn track(dep: &Dep) {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let Some(entry) = stack.last_mut() else {
                return;
            };
            let Some((id, subscriber)) = entry.subscriber.as_ref() else {
                return;
            };
            if entry.dependencies.iter().any(|known| known.id() == dep.id()) {
                return;
            }
            dep.subscribe(*id, subscriber.clone());
            entry.dependencies.push(dep.clone());
        });
    }

    /// Get the dependencies collected so far in the current context.
    pub fn get_dependencies() -> Dependencies {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.dependencies.clone())
                .unwrap_or_default()
        })
    }

    /// Leave the context, returning the dependencies it collected.
    pub fn finish(mut self) -> Dependencies {
        self.popped = true;
        self.pop().map(|entry| entry.dependencies).unwrap_or_default()
    }

    fn pop(&self) -> Option<ContextEntry> {
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());

        // Catch mismatched enter/leave pairs in debug builds.
        if let Some(entry) = &popped {
            debug_assert_eq!(
                entry.subscriber.as_ref().map(|(id, _)| *id),
                self.subscriber_id,
                "ReactiveContext mismatch"
            );
        }
        popped
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if !self.popped {
            self.pop();
        }
    }
}

/// Run `f` without tracking any reads it performs.
pub fn untracked<T>(f: impl FnOnce() -> T) -> T {
    let _ctx = ReactiveContext::suspend();
    f()
}

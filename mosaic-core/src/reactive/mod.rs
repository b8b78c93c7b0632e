//! Reactive Primitives
//!
//! This module implements the dependency-tracking engine the store rides on:
//! dependencies, memos, watchers, and the scheduler that batches watcher
//! re-runs into flushes.
//!
//! # Concepts
//!
//! ## Dependencies
//!
//! A [`Dep`] guards one observable location. Reading the location inside a
//! tracking context registers the running computation with the dep; a write
//! that changes the location notifies every registered computation.
//!
//! ## Memos
//!
//! A [`Memo`] is a derived value that caches its result. It re-evaluates
//! only when one of its dependencies changed since the last read. Store
//! getters are a memo.
//!
//! ## Watchers
//!
//! A watcher (see [`watch`]) re-evaluates a source when its dependencies
//! change and calls back when the value differs from the previous one.
//! Every `on(..).watch(..)` and `on(..).trigger(..)` is a watcher.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to detect
//! dependencies automatically. Writes are synchronous; watcher callbacks
//! run when the owning [`Scheduler`] is flushed.

mod cleanup;
mod context;
mod dep;
mod memo;
mod scheduler;
mod subscriber;
mod watch;

pub use cleanup::CleanUp;
pub use context::{untracked, Dependencies, ReactiveContext};
pub use dep::Dep;
pub use memo::{Memo, MemoState};
pub use scheduler::{Job, Scheduler, RECURSION_LIMIT};
pub use subscriber::{Reactive, SubscriberId};
pub use watch::{watch, FlushMode, Unsubscribe, WatchOptions};

pub(crate) use scheduler::guarded;

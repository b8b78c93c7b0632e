//! Mosaic Core
//!
//! This crate composes independently built state modules into a single
//! reactive store. It implements:
//!
//! - A dynamic, observable value model (maps, lists, actions, computed refs)
//! - Snapshot copying for change detection
//! - A small dependency-tracking engine (deps, memos, watchers, scheduler)
//! - Stores with a derived getters layer and watch / filter / trigger
//!   subscriptions
//!
//! # Architecture
//!
//! The crate is organized into three modules:
//!
//! - `value`: module state values and the `Snapshot` copy rules
//! - `reactive`: dependency tracking, memos, watchers, flush scheduling
//! - `store`: module registry, getters, subscriptions, injection
//!
//! # Example
//!
//! ```rust
//! use mosaic_core::{define_store, Func, Map, Modules, Value};
//! use std::sync::{Arc, Mutex};
//!
//! // A counter module with one action
//! let counter = Map::new().with("count", 0);
//! let target = counter.clone();
//! counter.set(
//!     "increment",
//!     Func::action(move || target.update("count", |v| Value::Int(v.as_int().unwrap_or(0) + 1))),
//! );
//!
//! let store = define_store(Modules::new().with("counter", counter));
//!
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let sink = log.clone();
//! store
//!     .on(|ctx| ctx.modules.field("counter", "count"))
//!     .watch(move |newer, older| sink.lock().unwrap().push((older.cloned(), newer.clone())));
//!
//! store.modules().call("counter", "increment", &[]).unwrap();
//! store.flush();
//!
//! assert_eq!(*log.lock().unwrap(), vec![(Some(Value::Int(0)), Value::Int(1))]);
//! ```

pub mod reactive;
pub mod store;
pub mod value;

mod error;

pub use error::{Result, StoreError};
pub use reactive::{CleanUp, FlushMode, Unsubscribe, WatchOptions};
pub use store::{
    define_store, define_store_with_getters, inject_getters, inject_store, provide_store, Ctx, Filtered, Getters,
    GettersLayer, InjectKind, Injected, InjectionKey, IntoReaction, Modules, NoGetters, On, ProvideGuard, Reaction,
    Store, Triggering, Watching,
};
pub use value::{copy, Computed, Func, List, Map, Opaque, Snapshot, Value};

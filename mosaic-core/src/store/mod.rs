//! Store Composition
//!
//! A store gathers independently built modules under one registry, derives
//! an optional getters value from them, and lets callers subscribe to any
//! projection of the two.
//!
//! # Overview
//!
//! ```text
//! Modules ──▶ define_store ──▶ Store ──on(mapper)──▶ watch / filter / trigger
//!                  │                                          │
//!                  └─ getters memo                 Unsubscribe handles
//!                                                             │
//!                                                        unwatch_all
//! ```
//!
//! Module writes are synchronous. Watchers and triggers run when the store
//! is flushed ([`Store::flush`]), or inline for subscriptions registered
//! with [`FlushMode::Sync`](crate::reactive::FlushMode::Sync). Asynchronous
//! trigger reactions complete under [`Store::settle`].

mod getters;
mod inject;
mod modules;
#[allow(clippy::module_inception)]
mod store;
mod subscription;

pub use getters::{Getters, GettersLayer, NoGetters};
pub use inject::{inject_getters, inject_store, provide_store, InjectKind, Injected, InjectionKey, ProvideGuard};
pub use modules::Modules;
pub use store::{define_store, define_store_with_getters, Store};
pub use subscription::{Ctx, Filtered, IntoReaction, On, Reaction, Triggering, Watching};

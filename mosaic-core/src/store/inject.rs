//! Contextual store injection.
//!
//! [`provide_store`] makes a store reachable under a key for the rest of the
//! current scope on this thread; [`inject_store`] looks it up again from
//! code that was not handed the store directly. Provisions nest: a later
//! provision under the same key shadows an earlier one until its guard is
//! dropped.

use std::any::Any;
use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt::{self, Debug, Display};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::getters::{Getters, GettersLayer};
use super::modules::Modules;
use super::store::Store;
use crate::value::{Map, Snapshot};

/// Name a store is provided under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InjectionKey(Cow<'static, str>);

impl InjectionKey {
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for InjectionKey {
    fn from(name: &'static str) -> Self {
        Self::new(name)
    }
}

impl From<String> for InjectionKey {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl Display for InjectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What [`inject_store`] should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectKind {
    /// One named module.
    Module,
    /// The store's getters layer.
    Getter,
}

/// Result of [`inject_store`].
#[derive(Clone)]
pub enum Injected {
    Module(Map),
    /// A [`Getters<S>`], type-erased. See [`Injected::getters`].
    Getters(Arc<dyn Any + Send + Sync>),
}

impl Injected {
    pub fn into_module(self) -> Option<Map> {
        match self {
            Injected::Module(module) => Some(module),
            Injected::Getters(_) => None,
        }
    }

    /// The getters layer, if it holds values of type `S`.
    pub fn getters<S>(self) -> Option<Getters<S>>
    where
        S: Snapshot + Clone + Send + Sync + 'static,
    {
        match self {
            Injected::Getters(erased) => erased
                .downcast::<Getters<S>>()
                .ok()
                .map(|getters| getters.as_ref().clone()),
            Injected::Module(_) => None,
        }
    }
}

impl Debug for Injected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Injected::Module(module) => f.debug_tuple("Module").field(module).finish(),
            Injected::Getters(_) => f.write_str("Getters(..)"),
        }
    }
}

struct Provision {
    id: u64,
    key: InjectionKey,
    modules: Modules,
    getters: Option<Arc<dyn Any + Send + Sync>>,
}

thread_local! {
    static PROVISIONS: RefCell<Vec<Provision>> = const { RefCell::new(Vec::new()) };
}

static NEXT_PROVISION: AtomicU64 = AtomicU64::new(0);

/// Keeps a provision alive. Dropping it withdraws the store.
///
/// The guard must be dropped on the thread that created it.
#[must_use = "the store is withdrawn as soon as the guard is dropped"]
pub struct ProvideGuard {
    id: u64,
    key: InjectionKey,
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for ProvideGuard {
    fn drop(&mut self) {
        PROVISIONS.with(|provisions| {
            provisions.borrow_mut().retain(|provision| provision.id != self.id);
        });
        debug!(key = %self.key, "store withdrawn");
    }
}

impl Debug for ProvideGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvideGuard").field("key", &self.key).finish()
    }
}

/// Make `store` injectable under `key` until the returned guard drops.
pub fn provide_store<G: GettersLayer>(key: impl Into<InjectionKey>, store: &Store<G>) -> ProvideGuard {
    let key = key.into();
    let id = NEXT_PROVISION.fetch_add(1, Ordering::Relaxed);

    PROVISIONS.with(|provisions| {
        provisions.borrow_mut().push(Provision {
            id,
            key: key.clone(),
            modules: store.modules().clone(),
            getters: store.getters_layer().erased(),
        });
    });
    debug!(key = %key, "store provided");

    ProvideGuard {
        id,
        key,
        _thread_bound: PhantomData,
    }
}

/// Look up part of the store most recently provided under `key`.
///
/// - [`InjectKind::Module`] returns the module called `name`, or `None` if
///   there is no such module. Leaving `name` out logs a warning.
/// - [`InjectKind::Getter`] returns the getters layer, or `None` if the
///   store has none. A `name` is ignored with a warning.
///
/// Returns `None` if no store was provided under `key`.
pub fn inject_store(key: impl Into<InjectionKey>, kind: InjectKind, name: Option<&str>) -> Option<Injected> {
    let key = key.into();

    PROVISIONS.with(|provisions| {
        let provisions = provisions.borrow();
        let provision = provisions.iter().rev().find(|provision| provision.key == key)?;

        match kind {
            InjectKind::Module => {
                let Some(name) = name else {
                    warn!(key = %key, "module injection needs a module name");
                    return None;
                };
                provision.modules.get(name).map(Injected::Module)
            }
            InjectKind::Getter => {
                if let Some(name) = name {
                    warn!(key = %key, name, "getter injection ignores the name argument");
                }
                provision.getters.clone().map(Injected::Getters)
            }
        }
    })
}

/// Typed shorthand for injecting a getters layer.
pub fn inject_getters<S>(key: impl Into<InjectionKey>) -> Option<Getters<S>>
where
    S: Snapshot + Clone + Send + Sync + 'static,
{
    inject_store(key, InjectKind::Getter, None)?.getters()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{define_store, define_store_with_getters};
    use crate::value::Value;

    const KEY: InjectionKey = InjectionKey::new("counter-store");

    fn modules() -> Modules {
        Modules::new().with("counter", Map::new().with("value", 3))
    }

    #[test]
    fn nothing_provided_injects_nothing() {
        assert!(inject_store(KEY, InjectKind::Module, Some("counter")).is_none());
        assert!(inject_store(KEY, InjectKind::Getter, None).is_none());
    }

    #[test]
    fn injects_named_modules() {
        let store = define_store(modules());
        let _guard = provide_store(KEY, &store);

        let module = inject_store(KEY, InjectKind::Module, Some("counter"))
            .and_then(Injected::into_module)
            .unwrap();
        assert_eq!(module.get("value"), Value::Int(3));

        assert!(inject_store(KEY, InjectKind::Module, Some("missing")).is_none());
        assert!(inject_store(KEY, InjectKind::Module, None).is_none());
    }

    #[test]
    fn injects_getters_and_ignores_names() {
        let store = define_store_with_getters(modules(), |m| {
            m.field("counter", "value").as_int().unwrap_or_default() + 1
        });
        let _guard = provide_store("with-getters", &store);

        let getters = inject_getters::<i64>("with-getters").unwrap();
        assert_eq!(getters.get(), 4);

        let named = inject_store("with-getters", InjectKind::Getter, Some("ignored"))
            .and_then(Injected::getters::<i64>)
            .unwrap();
        assert_eq!(named.get(), 4);

        assert!(inject_getters::<String>("with-getters").is_none());
    }

    #[test]
    fn stores_without_getters_inject_none() {
        let store = define_store(modules());
        let _guard = provide_store(KEY, &store);

        assert!(inject_store(KEY, InjectKind::Getter, None).is_none());
    }

    #[test]
    fn inner_provisions_shadow_until_dropped() {
        let outer = define_store(modules());
        let inner = define_store(Modules::new().with("counter", Map::new().with("value", 9)));

        let _outer_guard = provide_store(KEY, &outer);
        {
            let _inner_guard = provide_store(KEY, &inner);
            let module = inject_store(KEY, InjectKind::Module, Some("counter")).and_then(Injected::into_module);
            assert_eq!(module.unwrap().get("value"), Value::Int(9));
        }

        let module = inject_store(KEY, InjectKind::Module, Some("counter")).and_then(Injected::into_module);
        assert_eq!(module.unwrap().get("value"), Value::Int(3));
    }
}

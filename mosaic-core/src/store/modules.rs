//! Module registry.

use std::fmt::{self, Debug};

use crate::error::StoreError;
use crate::value::{Map, Value};

/// The named modules a store is composed of.
///
/// The registry is itself a reactive [`Map`] from module name to module, so
/// a projection that looks a module up by name depends on that entry as
/// well as on the fields it reads. Cloning yields another handle to the same
/// registry.
#[derive(Clone, Default)]
pub struct Modules {
    root: Map,
}

impl Modules {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `module` under `name`, replacing any module of the same name.
    pub fn with(self, name: impl Into<String>, module: Map) -> Self {
        self.root.set(name, module);
        self
    }

    /// The module registered as `name`, tracked.
    pub fn get(&self, name: &str) -> Option<Map> {
        match self.root.get(name) {
            Value::Map(module) => Some(module),
            _ => None,
        }
    }

    /// Read `key` from module `name`, tracked. Reads [`Value::Absent`] if
    /// either is missing.
    pub fn field(&self, name: &str, key: &str) -> Value {
        self.get(name)
            .map(|module| module.get(key))
            .unwrap_or_default()
    }

    /// Call the action `key` on module `name`.
    pub fn call(&self, name: &str, key: &str, args: &[Value]) -> Result<Value, StoreError> {
        let module = self.get(name).ok_or_else(|| StoreError::UnknownKey {
            key: name.to_string(),
        })?;
        module.call(key, args)
    }

    /// Module names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.root.keys()
    }

    pub fn len(&self) -> usize {
        self.root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Whether both handles refer to the same registry.
    pub fn ptr_eq(&self, other: &Modules) -> bool {
        self.root.ptr_eq(&other.root)
    }

    /// The registry as a plain map of name to module.
    pub fn as_map(&self) -> &Map {
        &self.root
    }
}

impl<K: Into<String>> FromIterator<(K, Map)> for Modules {
    fn from_iter<I: IntoIterator<Item = (K, Map)>>(iter: I) -> Self {
        Self {
            root: iter.into_iter().collect(),
        }
    }
}

impl Debug for Modules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Modules").field(&self.root).finish()
    }
}
